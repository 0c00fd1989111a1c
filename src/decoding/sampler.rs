//! Sampling utilities for iterative decoding

use candle_core::{DType, Result, Tensor, D};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use crate::masking::TokenMask;

/// Smallest temperature used for sampling
pub const MIN_TEMPERATURE: f64 = 1e-3;

/// Per-call decoding parameters
#[derive(Clone, Debug)]
pub struct GenerateParams {
    /// Number of sequences; `None` samples one and drops the batch dimension
    pub batch_size: Option<usize>,
    /// Temperature at round 0, annealed linearly towards 0
    pub start_temperature: f64,
    /// Keep the top `ceil((1 - thres) * vocab)` logits; `None` disables filtering
    pub filter_thres: Option<f64>,
}

impl Default for GenerateParams {
    fn default() -> Self {
        Self {
            batch_size: None,
            start_temperature: 1.0,
            filter_thres: Some(0.9),
        }
    }
}

/// Sampling temperature for a round with `steps_until_x0` rounds after it
pub fn annealed_temperature(start_temperature: f64, steps_until_x0: usize, steps: usize) -> f64 {
    let temperature = start_temperature * (steps_until_x0 as f64 / steps as f64);
    temperature.max(MIN_TEMPERATURE)
}

/// Set the logit of `token_id` to -inf at every position
///
/// Used on the mask token so it can never be sampled as a revealed token.
pub fn suppress_token(logits: &Tensor, token_id: u32) -> Result<Tensor> {
    let vocab_size = logits.dim(D::Minus1)?;
    let bias: Vec<f32> = (0..vocab_size)
        .map(|v| if v == token_id as usize { f32::NEG_INFINITY } else { 0.0 })
        .collect();
    let bias = Tensor::from_vec(bias, vocab_size, logits.device())?.to_dtype(logits.dtype())?;
    logits.broadcast_add(&bias)
}

/// Number of logits kept by top-k filtering
pub fn top_k_count(thres: f64, vocab_size: usize) -> usize {
    let k = ((1.0 - thres) * vocab_size as f64).ceil() as usize;
    k.clamp(1, vocab_size.max(1))
}

/// Set every logit below the k-th largest of its row to -inf
///
/// Logits tied with the k-th largest value are all kept.
pub fn top_k_filter(logits: &Tensor, thres: f64) -> Result<Tensor> {
    let vocab_size = logits.dim(D::Minus1)?;
    let k = top_k_count(thres, vocab_size);
    if k == vocab_size {
        return Ok(logits.clone());
    }

    let logits = logits.contiguous()?;
    let (sorted, _) = logits.sort_last_dim(false)?;
    let kth = sorted.narrow(D::Minus1, k - 1, 1)?;
    let keep = logits.broadcast_ge(&kth)?;
    let neg_inf = Tensor::full(f32::NEG_INFINITY, logits.dims(), logits.device())?
        .to_dtype(logits.dtype())?;
    keep.where_cond(&logits, &neg_inf)
}

/// Softmax over the vocabulary after dividing by the (floored) temperature
pub fn tempered_probs(logits: &Tensor, temperature: f64) -> Result<Tensor> {
    let scaled = (logits / temperature.max(MIN_TEMPERATURE))?;
    candle_nn::ops::softmax_last_dim(&scaled)
}

/// Draw one token id per position from `probs` [batch, seq, vocab]
///
/// # Returns
/// Row-major sampled ids, `batch * seq` long
pub fn sample_multinomial<R: Rng + ?Sized>(probs: &Tensor, rng: &mut R) -> Result<Vec<u32>> {
    let (batch, seq_len, vocab) = probs.dims3()?;
    let flat: Vec<f32> = probs.to_dtype(DType::F32)?.flatten_all()?.to_vec1()?;

    let mut sampled = Vec::with_capacity(batch * seq_len);
    for row in flat.chunks_exact(vocab) {
        let dist = WeightedIndex::new(row)
            .map_err(|e| candle_core::Error::Msg(format!("invalid sampling weights: {}", e)))?;
        sampled.push(dist.sample(rng) as u32);
    }
    Ok(sampled)
}

/// `1 - p(sampled token)` under the softmax of `logits`
///
/// # Arguments
/// * `logits` - [batch, seq, vocab]
/// * `sampled` - [batch, seq] token ids (u32)
///
/// # Returns
/// [batch, seq] penalties; high means low confidence
pub fn confidence_penalties(logits: &Tensor, sampled: &Tensor) -> Result<Tensor> {
    let probs = candle_nn::ops::softmax_last_dim(logits)?;
    let picked = probs
        .gather(&sampled.unsqueeze(D::Minus1)?.contiguous()?, D::Minus1)?
        .squeeze(D::Minus1)?;
    picked.affine(-1.0, 1.0)
}

/// Choose the next round's mask: per row, the `num_tokens` currently masked
/// positions with the highest penalty
///
/// Positions already unmasked are never chosen, so the mask only shrinks;
/// a row with fewer masked positions than `num_tokens` keeps all of them.
/// Equal penalties resolve to the lower position index.
pub fn select_remask(penalties: &[Vec<f32>], mask: &TokenMask, num_tokens: usize) -> TokenMask {
    let (batch, seq_len) = mask.dims();
    let mut next = TokenMask::filled(batch, seq_len, false);

    for (b, row) in penalties.iter().enumerate().take(batch) {
        let mut candidates: Vec<(usize, f32)> = row
            .iter()
            .enumerate()
            .map(|(i, &p)| (i, if mask.get(b, i) { p } else { f32::MIN }))
            .collect();
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

        let k = num_tokens.min(mask.count_row(b));
        for &(i, _) in candidates.iter().take(k) {
            next.set(b, i, true);
        }
    }

    next
}
