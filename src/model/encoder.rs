//! Transformer encoder backbone
//!
//! Token embedding (+ optional additive bias) -> layers -> final norm.
//! The final-norm output doubles as the per-position embeddings handed back
//! for self-conditioning.

use candle_core::{Device, Module, Result, Tensor};
use candle_nn::{embedding, Embedding, VarBuilder};

use crate::config::EncoderConfig;

use super::attention::RMSNorm;
use super::layer::EncoderLayer;
use super::rope::RotaryEmbedding;

pub struct TransformerEncoder {
    embed_tokens: Embedding,
    layers: Vec<EncoderLayer>,
    norm: RMSNorm,
    rope: RotaryEmbedding,
}

impl TransformerEncoder {
    pub fn new(config: &EncoderConfig, vb: VarBuilder, device: &Device) -> Result<Self> {
        let embed_tokens = embedding(config.vocab_size, config.hidden_size, vb.pp("embed_tokens"))?;

        let mut layers = Vec::with_capacity(config.num_hidden_layers);
        for i in 0..config.num_hidden_layers {
            layers.push(EncoderLayer::new(config, vb.pp(format!("layers.{}", i)))?);
        }

        let norm = RMSNorm::new(config.hidden_size, config.rms_norm_eps, vb.pp("norm"))?;

        let rope = RotaryEmbedding::new(
            config.head_dim,
            config.max_seq_len,
            config.rope_theta,
            config.candle_dtype(),
            device,
        )?;

        Ok(Self {
            embed_tokens,
            layers,
            norm,
            rope,
        })
    }

    /// Forward pass through the encoder
    ///
    /// # Arguments
    /// * `input_ids` - Token IDs [batch, seq_len]
    /// * `sum_embeds` - Optional bias broadcastable to [batch, seq_len, hidden_size]
    ///
    /// # Returns
    /// Normalized hidden states [batch, seq_len, hidden_size]
    pub fn forward(&self, input_ids: &Tensor, sum_embeds: Option<&Tensor>) -> Result<Tensor> {
        let (_, seq_len) = input_ids.dims2()?;

        let mut hidden_states = self.embed_tokens.forward(input_ids)?;
        if let Some(bias) = sum_embeds {
            hidden_states = hidden_states.broadcast_add(&bias.to_dtype(hidden_states.dtype())?)?;
        }

        let (cos, sin) = self.rope.get_cos_sin(seq_len)?;

        for layer in &self.layers {
            hidden_states = layer.forward(&hidden_states, &cos, &sin)?;
        }

        self.norm.forward(&hidden_states)
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}
