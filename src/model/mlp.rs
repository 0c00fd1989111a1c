//! SiLU-gated feed-forward block
//!
//! Computes: down_proj(silu(gate_proj(x)) * up_proj(x))

use candle_core::{Module, Result, Tensor};
use candle_nn::{linear_no_bias, Linear, VarBuilder};

use crate::config::EncoderConfig;

/// SwiGLU MLP
pub struct EncoderMLP {
    /// Gate projection: [hidden_size -> intermediate_size]
    gate_proj: Linear,
    /// Up projection: [hidden_size -> intermediate_size]
    up_proj: Linear,
    /// Down projection: [intermediate_size -> hidden_size]
    down_proj: Linear,
}

impl EncoderMLP {
    pub fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        let hidden_size = config.hidden_size;
        let intermediate_size = config.intermediate_size;

        Ok(Self {
            gate_proj: linear_no_bias(hidden_size, intermediate_size, vb.pp("gate_proj"))?,
            up_proj: linear_no_bias(hidden_size, intermediate_size, vb.pp("up_proj"))?,
            down_proj: linear_no_bias(intermediate_size, hidden_size, vb.pp("down_proj"))?,
        })
    }
}

impl Module for EncoderMLP {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let gate = candle_nn::ops::silu(&self.gate_proj.forward(x)?)?;
        let up = self.up_proj.forward(x)?;
        self.down_proj.forward(&(gate * up)?)
    }
}
