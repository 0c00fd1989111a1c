//! Masked-token training objective
//!
//! One call corrupts a batch and scores the model on the corrupted positions:
//!
//! 1. Sample a time per row, map it through the schedule to a masking ratio.
//! 2. Mask a random `ceil(max(ratio * seq_len, 1))` positions per row. Only
//!    these positions contribute to the loss.
//! 3. On a fair coin flip, leave a `no_replace_prob` share of them untouched.
//! 4. On another coin flip, swap a `random_token_prob` share (scaled by what
//!    step 3 left over) of the still-replaced positions for random non-mask
//!    tokens.
//! 5. Everything still flagged gets the mask token.
//! 6. Optionally self-condition on a detached extra pass, then take the
//!    cross-entropy over the step 2 positions.

use candle_core::{DType, Tensor, D};
use rand::Rng;

use crate::error::{NarError, Result};
use crate::masking::{mask_subset_prob, random_primary_mask, TokenMask};
use crate::model::{ForwardMode, SequenceModel};
use crate::wrapper::NonAutoregressiveWrapper;

/// Loss plus the corruption that produced it
#[derive(Debug)]
pub struct TrainingOutput {
    /// Scalar cross-entropy over `loss_mask` positions
    pub loss: Tensor,
    /// Positions whose original tokens are the labels
    pub loss_mask: TokenMask,
    /// Positions fed the mask token
    pub replaced_with_mask: TokenMask,
    /// Positions fed a uniformly random token
    pub random_replaced: TokenMask,
    /// Whether the self-conditioning bias came from a model pass
    pub used_self_cond_pass: bool,
}

impl<M: SequenceModel> NonAutoregressiveWrapper<M> {
    /// Masked-token loss for a batch of sequences `[batch, max_seq_len]`
    pub fn compute_loss<R: Rng + ?Sized>(&self, x: &Tensor, rng: &mut R) -> Result<Tensor> {
        Ok(self.compute_loss_detailed(x, rng)?.loss)
    }

    /// Same as [`Self::compute_loss`], also returning the masks used
    pub fn compute_loss_detailed<R: Rng + ?Sized>(
        &self,
        x: &Tensor,
        rng: &mut R,
    ) -> Result<TrainingOutput> {
        let (batch, seq_len) = x.dims2()?;
        let expected = self.net.max_seq_len();
        if seq_len != expected {
            return Err(NarError::SequenceLengthMismatch {
                expected,
                actual: seq_len,
            });
        }
        let device = x.device();

        let mut tokens: Vec<u32> = x.to_dtype(DType::U32)?.flatten_all()?.to_vec1()?;

        let rand_times: Vec<f64> = (0..batch).map(|_| rng.gen::<f64>()).collect();
        let fractions = self.schedule.eval_many(&rand_times);
        let loss_mask = random_primary_mask(&fractions, seq_len, rng);

        let positions = loss_mask.flat_indices();
        let labels: Vec<u32> = positions.iter().map(|&i| tokens[i as usize]).collect();

        let mut replaced_with_mask = loss_mask.clone();
        let mut frac_seq_left = 1.0;

        if self.no_replace_prob > 0.0 && rng.gen_bool(0.5) {
            frac_seq_left -= self.no_replace_prob;
            let keep_original = mask_subset_prob(&loss_mask, self.no_replace_prob, 0.0, rng);
            replaced_with_mask.clear_where(&keep_original);
        }

        let mut random_replaced = TokenMask::filled(batch, seq_len, false);
        if self.random_token_prob > 0.0 && rng.gen_bool(0.5) {
            random_replaced = mask_subset_prob(
                &replaced_with_mask,
                self.random_token_prob * frac_seq_left,
                0.0,
                rng,
            );
            // uniform over the vocabulary without the mask token
            let num_tokens = self.net.num_tokens() as u32;
            for (token, &swap) in tokens.iter_mut().zip(random_replaced.as_slice()) {
                if swap {
                    let id = rng.gen_range(0..num_tokens - 1);
                    *token = if id >= self.mask_token_id { id + 1 } else { id };
                }
            }
            replaced_with_mask.clear_where(&random_replaced);
        }

        for (token, &masked) in tokens.iter_mut().zip(replaced_with_mask.as_slice()) {
            if masked {
                *token = self.mask_token_id;
            }
        }
        let masked_input = Tensor::from_vec(tokens, (batch, seq_len), device)?;

        tracing::debug!(
            "loss: masked per row {:?}, mask-token {}, random {}",
            loss_mask.row_counts(),
            replaced_with_mask.count(),
            random_replaced.count()
        );

        let mut used_self_cond_pass = false;
        let sum_embeds = match &self.self_cond {
            Some(sc) => {
                let previous = if rng.gen_bool(self.self_cond_train_prob) {
                    used_self_cond_pass = true;
                    let embeds = self
                        .net
                        .forward(&masked_input, None, ForwardMode::Embeddings)?
                        .embeddings()?;
                    Some(embeds.detach())
                } else {
                    None
                };
                Some(sc.project(previous.as_ref())?)
            }
            None => None,
        };

        let logits = self
            .net
            .forward(&masked_input, sum_embeds.as_ref(), ForwardMode::Logits)?
            .logits()?;
        let vocab_size = logits.dim(D::Minus1)?;
        let flat_logits = logits
            .reshape((batch * seq_len, vocab_size))?
            .to_dtype(DType::F32)?;

        let num_masked = positions.len();
        let positions = Tensor::from_vec(positions, num_masked, device)?;
        let labels = Tensor::from_vec(labels, num_masked, device)?;
        let masked_logits = flat_logits.index_select(&positions, 0)?;
        let loss = candle_nn::loss::cross_entropy(&masked_logits, &labels)?;

        Ok(TrainingOutput {
            loss,
            loss_mask,
            replaced_with_mask,
            random_replaced,
            used_self_cond_pass,
        })
    }
}
