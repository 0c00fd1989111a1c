//! Iterative parallel decoding
//!
//! - Confidence-based re-masking on a precomputed schedule
//! - Annealed temperature with top-k filtering
//! - Optional self-conditioning on the previous round's embeddings

pub mod iterative;
pub mod sampler;

pub use iterative::{DecodeState, DecodeStats};
pub use sampler::{GenerateParams, MIN_TEMPERATURE};
