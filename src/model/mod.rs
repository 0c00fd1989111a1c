//! Sequence model collaborator and a reference bidirectional transformer
//!
//! The wrapper only needs a model that maps `[batch, seq]` token ids (plus an
//! optional additive embedding bias) to per-position logits, embeddings or
//! both. [`MaskedTransformer`] is a small implementation used by the CLI and
//! the tests; any other network can be plugged in through [`SequenceModel`].

pub mod attention;
pub mod encoder;
pub mod layer;
pub mod masked_lm;
pub mod mlp;
pub mod rope;

use candle_core::{Device, Result, Tensor};

use crate::error::NarError;

pub use attention::{EncoderAttention, RMSNorm};
pub use encoder::TransformerEncoder;
pub use layer::EncoderLayer;
pub use masked_lm::MaskedTransformer;
pub use mlp::EncoderMLP;
pub use rope::RotaryEmbedding;

/// Which outputs a forward pass should produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardMode {
    Logits,
    Embeddings,
    LogitsAndEmbeddings,
}

impl ForwardMode {
    pub fn wants_logits(self) -> bool {
        matches!(self, ForwardMode::Logits | ForwardMode::LogitsAndEmbeddings)
    }

    pub fn wants_embeddings(self) -> bool {
        matches!(self, ForwardMode::Embeddings | ForwardMode::LogitsAndEmbeddings)
    }
}

/// Outputs of one forward pass
#[derive(Debug, Clone, Default)]
pub struct ModelOutput {
    /// [batch, seq, num_tokens]
    pub logits: Option<Tensor>,
    /// [batch, seq, emb_dim]
    pub embeddings: Option<Tensor>,
}

impl ModelOutput {
    pub fn logits(self) -> crate::Result<Tensor> {
        self.logits.ok_or(NarError::MissingOutput("logits"))
    }

    pub fn embeddings(self) -> crate::Result<Tensor> {
        self.embeddings.ok_or(NarError::MissingOutput("embeddings"))
    }

    pub fn logits_and_embeddings(self) -> crate::Result<(Tensor, Tensor)> {
        match (self.logits, self.embeddings) {
            (Some(l), Some(e)) => Ok((l, e)),
            (None, _) => Err(NarError::MissingOutput("logits")),
            (_, None) => Err(NarError::MissingOutput("embeddings")),
        }
    }
}

/// Network driven by the masked-token wrapper
pub trait SequenceModel {
    /// Width of the embeddings returned and of `sum_embeds`
    fn emb_dim(&self) -> usize;

    /// Vocabulary size of the logits, mask token included
    fn num_tokens(&self) -> usize;

    /// Fixed sequence length
    fn max_seq_len(&self) -> usize;

    fn device(&self) -> &Device;

    /// Run the model on `input_ids` `[batch, seq]`
    ///
    /// `sum_embeds` must broadcast to `[batch, seq, emb_dim]` and is added to
    /// the token embeddings before the first layer.
    fn forward(
        &self,
        input_ids: &Tensor,
        sum_embeds: Option<&Tensor>,
        mode: ForwardMode,
    ) -> Result<ModelOutput>;
}
