//! Rotary Position Embeddings (RoPE)
//!
//! inv_freq[i] = 1.0 / (theta ^ (2*i / head_dim)); positions are the fixed
//! slots 0..max_seq_len of the sequence being denoised.

use candle_core::{DType, Device, Result, Tensor, D};

/// Precomputed rotary position embeddings
pub struct RotaryEmbedding {
    /// Maximum sequence length for cached values
    max_seq_len: usize,
    /// Cached cosine values: [max_seq_len, head_dim]
    cos_cache: Tensor,
    /// Cached sine values: [max_seq_len, head_dim]
    sin_cache: Tensor,
}

impl RotaryEmbedding {
    pub fn new(
        head_dim: usize,
        max_seq_len: usize,
        theta: f64,
        dtype: DType,
        device: &Device,
    ) -> Result<Self> {
        let half_dim = head_dim / 2;

        let inv_freq: Vec<f32> = (0..half_dim)
            .map(|i| {
                let exponent = (2 * i) as f64 / head_dim as f64;
                1.0 / theta.powf(exponent) as f32
            })
            .collect();
        let inv_freq = Tensor::from_vec(inv_freq, (1, half_dim), device)?;

        let positions: Vec<f32> = (0..max_seq_len).map(|p| p as f32).collect();
        let positions = Tensor::from_vec(positions, (max_seq_len, 1), device)?;

        // freqs: [max_seq_len, half_dim] -> emb: [max_seq_len, head_dim]
        let freqs = positions.matmul(&inv_freq)?;
        let emb = Tensor::cat(&[&freqs, &freqs], D::Minus1)?;

        Ok(Self {
            max_seq_len,
            cos_cache: emb.cos()?.to_dtype(dtype)?,
            sin_cache: emb.sin()?.to_dtype(dtype)?,
        })
    }

    /// cos/sin for positions 0..seq_len, each [seq_len, head_dim]
    pub fn get_cos_sin(&self, seq_len: usize) -> Result<(Tensor, Tensor)> {
        if seq_len > self.max_seq_len {
            return Err(candle_core::Error::Msg(format!(
                "sequence length {} exceeds max_seq_len {}",
                seq_len, self.max_seq_len
            )));
        }

        let cos = self.cos_cache.narrow(0, 0, seq_len)?;
        let sin = self.sin_cache.narrow(0, 0, seq_len)?;
        Ok((cos, sin))
    }

    /// Apply rotary embeddings to query and key tensors
    ///
    /// # Arguments
    /// * `q` - Query tensor of shape [batch, num_heads, seq_len, head_dim]
    /// * `k` - Key tensor of shape [batch, num_kv_heads, seq_len, head_dim]
    /// * `cos` - Cosine values [seq_len, head_dim]
    /// * `sin` - Sine values [seq_len, head_dim]
    pub fn apply(q: &Tensor, k: &Tensor, cos: &Tensor, sin: &Tensor) -> Result<(Tensor, Tensor)> {
        // [1, 1, seq_len, head_dim] for broadcasting
        let cos = cos.unsqueeze(0)?.unsqueeze(0)?;
        let sin = sin.unsqueeze(0)?.unsqueeze(0)?;

        let q_rotated = Self::apply_rotary_emb(q, &cos, &sin)?;
        let k_rotated = Self::apply_rotary_emb(k, &cos, &sin)?;

        Ok((q_rotated, k_rotated))
    }

    fn apply_rotary_emb(x: &Tensor, cos: &Tensor, sin: &Tensor) -> Result<Tensor> {
        let input_dtype = x.dtype();
        let x_f32 = x.to_dtype(DType::F32)?;
        let cos_f32 = cos.to_dtype(DType::F32)?;
        let sin_f32 = sin.to_dtype(DType::F32)?;

        // x * cos + rotate_half(x) * sin
        let x_rotated = rotate_half(&x_f32)?;
        let result = (x_f32.broadcast_mul(&cos_f32)? + x_rotated.broadcast_mul(&sin_f32)?)?;

        result.to_dtype(input_dtype)
    }
}

/// (x1, x2) -> (-x2, x1) over the two halves of the last dimension
fn rotate_half(x: &Tensor) -> Result<Tensor> {
    let last_dim = x.dim(D::Minus1)?;
    let half = last_dim / 2;

    let x1 = x.narrow(D::Minus1, 0, half)?;
    let x2 = x.narrow(D::Minus1, half, half)?;

    Tensor::cat(&[&x2.neg()?, &x1], D::Minus1)
}
