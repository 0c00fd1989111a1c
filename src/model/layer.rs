//! Encoder layer
//!
//! Pre-norm architecture:
//! - residual + attention(norm(x))
//! - residual + mlp(norm(x))

use candle_core::{Module, Result, Tensor};
use candle_nn::VarBuilder;

use crate::config::EncoderConfig;

use super::attention::{EncoderAttention, RMSNorm};
use super::mlp::EncoderMLP;

/// Single bidirectional transformer layer
pub struct EncoderLayer {
    self_attn: EncoderAttention,
    mlp: EncoderMLP,
    /// Pre-attention layer norm
    input_layernorm: RMSNorm,
    /// Pre-MLP layer norm
    post_attention_layernorm: RMSNorm,
}

impl EncoderLayer {
    pub fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            self_attn: EncoderAttention::new(config, vb.pp("self_attn"))?,
            mlp: EncoderMLP::new(config, vb.pp("mlp"))?,
            input_layernorm: RMSNorm::new(
                config.hidden_size,
                config.rms_norm_eps,
                vb.pp("input_layernorm"),
            )?,
            post_attention_layernorm: RMSNorm::new(
                config.hidden_size,
                config.rms_norm_eps,
                vb.pp("post_attention_layernorm"),
            )?,
        })
    }

    /// `hidden_states`: [batch, seq_len, hidden_size]
    pub fn forward(&self, hidden_states: &Tensor, cos: &Tensor, sin: &Tensor) -> Result<Tensor> {
        let residual = hidden_states;
        let hidden_states = self.input_layernorm.forward(hidden_states)?;
        let hidden_states = self.self_attn.forward(&hidden_states, cos, sin)?;
        let hidden_states = (residual + hidden_states)?;

        let residual = &hidden_states;
        let hidden_states = self.post_attention_layernorm.forward(&hidden_states)?;
        let hidden_states = self.mlp.forward(&hidden_states)?;
        residual + hidden_states
    }
}
