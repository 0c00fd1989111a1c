//! maskgit-rs: non-autoregressive masked-token modeling using Candle
//!
//! Wraps a sequence model to train it with a MaskGIT/BERT-style denoising
//! objective and to sample from it by iterative parallel decoding: start fully
//! masked, predict everything, keep the confident tokens, re-mask the rest,
//! repeat for a fixed number of rounds.

pub mod config;
pub mod decoding;
pub mod engine;
pub mod error;
pub mod masking;
pub mod model;
pub mod schedule;
pub mod self_cond;
pub mod training;
pub mod weights;
pub mod wrapper;

pub use config::{EncoderConfig, NarConfig};
pub use decoding::{DecodeStats, GenerateParams};
pub use engine::NarEngine;
pub use error::{NarError, Result};
pub use model::{ForwardMode, ModelOutput, SequenceModel};
pub use schedule::Schedule;
pub use training::TrainingOutput;
pub use wrapper::NonAutoregressiveWrapper;

/// Default number of refinement rounds
pub const DEFAULT_STEPS: usize = 18;
