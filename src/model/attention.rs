//! Bidirectional grouped-query attention with optional QK-normalization
//!
//! Every position attends to every other position: masked tokens are
//! predicted jointly, so there is no causal mask and no KV cache.
//! Order: Project -> Reshape -> QK-norm -> Transpose -> RoPE.

use candle_core::{DType, Module, Result, Tensor, D};
use candle_nn::{linear_no_bias, Linear, VarBuilder};

use crate::config::EncoderConfig;

/// RMSNorm (Root Mean Square Layer Normalization)
///
/// Computes: x * rsqrt(mean(x^2) + eps) * weight, with the variance in f32
pub struct RMSNorm {
    weight: Tensor,
    eps: f64,
}

impl RMSNorm {
    pub fn new(size: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints(size, "weight", candle_nn::Init::Const(1.0))?;
        Ok(Self { weight, eps })
    }

    /// Load from existing tensor (for testing)
    pub fn from_tensor(weight: Tensor, eps: f64) -> Self {
        Self { weight, eps }
    }
}

impl Module for RMSNorm {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let input_dtype = x.dtype();
        let x_f32 = x.to_dtype(DType::F32)?;

        let variance = x_f32.sqr()?.mean_keepdim(D::Minus1)?;
        let x_normed = x_f32.broadcast_div(&(variance + self.eps)?.sqrt()?)?;

        let result = x_normed.broadcast_mul(&self.weight.to_dtype(DType::F32)?)?;
        result.to_dtype(input_dtype)
    }
}

/// Grouped Query Attention over the full sequence
pub struct EncoderAttention {
    /// Query projection: [hidden_size -> num_heads * head_dim]
    q_proj: Linear,
    /// Key projection: [hidden_size -> num_kv_heads * head_dim]
    k_proj: Linear,
    /// Value projection: [hidden_size -> num_kv_heads * head_dim]
    v_proj: Linear,
    /// Output projection: [num_heads * head_dim -> hidden_size]
    o_proj: Linear,

    q_norm: Option<RMSNorm>,
    k_norm: Option<RMSNorm>,

    num_heads: usize,
    num_kv_heads: usize,
    head_dim: usize,
    /// Number of query heads per KV head
    num_kv_groups: usize,

    /// Scaling factor: 1/sqrt(head_dim)
    scale: f64,
}

impl EncoderAttention {
    pub fn new(config: &EncoderConfig, vb: VarBuilder) -> Result<Self> {
        let hidden_size = config.hidden_size;
        let num_heads = config.num_attention_heads;
        let num_kv_heads = config.num_key_value_heads;
        let head_dim = config.head_dim;

        let q_proj = linear_no_bias(hidden_size, num_heads * head_dim, vb.pp("q_proj"))?;
        let k_proj = linear_no_bias(hidden_size, num_kv_heads * head_dim, vb.pp("k_proj"))?;
        let v_proj = linear_no_bias(hidden_size, num_kv_heads * head_dim, vb.pp("v_proj"))?;
        let o_proj = linear_no_bias(num_heads * head_dim, hidden_size, vb.pp("o_proj"))?;

        let (q_norm, k_norm) = if config.qk_norm {
            (
                Some(RMSNorm::new(head_dim, config.rms_norm_eps, vb.pp("q_norm"))?),
                Some(RMSNorm::new(head_dim, config.rms_norm_eps, vb.pp("k_norm"))?),
            )
        } else {
            (None, None)
        };

        Ok(Self {
            q_proj,
            k_proj,
            v_proj,
            o_proj,
            q_norm,
            k_norm,
            num_heads,
            num_kv_heads,
            head_dim,
            num_kv_groups: num_heads / num_kv_heads,
            scale: 1.0 / (head_dim as f64).sqrt(),
        })
    }

    /// Forward pass through attention
    ///
    /// # Arguments
    /// * `hidden_states` - Input tensor [batch, seq_len, hidden_size]
    /// * `cos` - RoPE cosine values [seq_len, head_dim]
    /// * `sin` - RoPE sine values [seq_len, head_dim]
    pub fn forward(&self, hidden_states: &Tensor, cos: &Tensor, sin: &Tensor) -> Result<Tensor> {
        let (batch_size, seq_len, _) = hidden_states.dims3()?;

        let q = self.q_proj.forward(hidden_states)?;
        let k = self.k_proj.forward(hidden_states)?;
        let v = self.v_proj.forward(hidden_states)?;

        let q = q.reshape((batch_size, seq_len, self.num_heads, self.head_dim))?;
        let k = k.reshape((batch_size, seq_len, self.num_kv_heads, self.head_dim))?;
        let v = v.reshape((batch_size, seq_len, self.num_kv_heads, self.head_dim))?;

        let q = match &self.q_norm {
            Some(norm) => norm.forward(&q)?,
            None => q,
        };
        let k = match &self.k_norm {
            Some(norm) => norm.forward(&k)?,
            None => k,
        };

        let q = q.transpose(1, 2)?.contiguous()?;
        let k = k.transpose(1, 2)?.contiguous()?;
        let v = v.transpose(1, 2)?.contiguous()?;

        let (q, k) = super::rope::RotaryEmbedding::apply(&q, &k, cos, sin)?;

        let k = self.repeat_kv(&k)?;
        let v = self.repeat_kv(&v)?;
        let attn_weights = (q.matmul(&k.t()?)? * self.scale)?;
        let attn_weights = candle_nn::ops::softmax_last_dim(&attn_weights)?;
        let attn_output = attn_weights.matmul(&v)?;

        // [batch, heads, seq, head_dim] -> [batch, seq, hidden_size]
        let attn_output = attn_output
            .transpose(1, 2)?
            .reshape((batch_size, seq_len, self.num_heads * self.head_dim))?;

        self.o_proj.forward(&attn_output)
    }

    /// Repeat KV heads for grouped query attention
    ///
    /// Input: [batch, num_kv_heads, seq, head_dim]
    /// Output: [batch, num_heads, seq, head_dim]
    fn repeat_kv(&self, x: &Tensor) -> Result<Tensor> {
        if self.num_kv_groups == 1 {
            return Ok(x.clone());
        }

        let (batch, num_kv_heads, seq_len, head_dim) = x.dims4()?;
        x.unsqueeze(2)?
            .expand((batch, num_kv_heads, self.num_kv_groups, seq_len, head_dim))?
            .reshape((batch, self.num_heads, seq_len, head_dim))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    #[test]
    fn test_rms_norm() -> Result<()> {
        let weight = Tensor::ones(4, DType::F32, &Device::Cpu)?;
        let norm = RMSNorm::from_tensor(weight, 1e-6);

        let x = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], (1, 4), &Device::Cpu)?;
        let result: Vec<f32> = norm.forward(&x)?.flatten_all()?.to_vec1()?;

        // RMS of [1,2,3,4] = sqrt(7.5)
        let rms = 7.5f32.sqrt();
        for (r, x) in result.iter().zip([1.0f32, 2.0, 3.0, 4.0]) {
            assert!((r - x / rms).abs() < 1e-4);
        }

        Ok(())
    }

    #[test]
    fn test_attention_output_shape() -> Result<()> {
        let device = Device::Cpu;
        let config = EncoderConfig::tiny();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let attn = EncoderAttention::new(&config, vb)?;

        let rope = super::super::rope::RotaryEmbedding::new(
            config.head_dim,
            config.max_seq_len,
            config.rope_theta,
            DType::F32,
            &device,
        )?;
        let (cos, sin) = rope.get_cos_sin(5)?;

        let x = Tensor::randn(0f32, 1.0, (2, 5, config.hidden_size), &device)?;
        let out = attn.forward(&x, &cos, &sin)?;
        assert_eq!(out.dims(), &[2, 5, config.hidden_size]);

        Ok(())
    }
}
