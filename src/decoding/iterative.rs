//! Iterative parallel decoding
//!
//! Starts from an all-mask sequence and runs `steps` rounds. Each round:
//! predict every position, sample tokens for the masked ones, then re-mask the
//! least confident of those so the next round can refine them. The number of
//! positions left masked after round `i` is fixed up front by the schedule.
//!
//! The mask token is never sampled and unmasked positions are never
//! re-selected, so masked sets only shrink and a revealed token keeps its
//! value for the rest of the call.

use candle_core::{DType, Tensor};
use rand::Rng;

use crate::error::Result;
use crate::masking::TokenMask;
use crate::model::{ForwardMode, SequenceModel};
use crate::wrapper::NonAutoregressiveWrapper;

use super::sampler::{
    annealed_temperature, confidence_penalties, sample_multinomial, select_remask, suppress_token,
    tempered_probs, top_k_filter, GenerateParams,
};

/// Working state threaded through the rounds of one `generate` call
#[derive(Debug, Clone)]
pub struct DecodeState {
    /// Row-major token ids [batch * seq_len]
    pub tokens: Vec<u32>,
    pub mask: TokenMask,
    /// Embeddings from the previous round (self-conditioning only)
    pub last_embed: Option<Tensor>,
}

impl DecodeState {
    /// All positions masked
    pub fn new(batch: usize, seq_len: usize, mask_token_id: u32) -> Self {
        Self {
            tokens: vec![mask_token_id; batch * seq_len],
            mask: TokenMask::filled(batch, seq_len, true),
            last_embed: None,
        }
    }
}

/// Statistics from one generation call
#[derive(Debug, Default, Clone)]
pub struct DecodeStats {
    pub rounds: usize,
    /// Masked positions per row after each round
    pub mask_counts: Vec<Vec<usize>>,
    /// Sampling temperature used in each round
    pub temperatures: Vec<f64>,
    /// Mean probability of the tokens sampled at masked positions
    pub avg_confidence: f32,
}

impl<M: SequenceModel> NonAutoregressiveWrapper<M> {
    /// Sample sequences by iterative unmasking
    ///
    /// # Returns
    /// `[batch, max_seq_len]` token ids, or `[max_seq_len]` when
    /// `params.batch_size` is `None`
    pub fn generate<R: Rng + ?Sized>(
        &self,
        params: &GenerateParams,
        rng: &mut R,
    ) -> Result<Tensor> {
        Ok(self.generate_with_stats(params, rng)?.0)
    }

    pub fn generate_with_stats<R: Rng + ?Sized>(
        &self,
        params: &GenerateParams,
        rng: &mut R,
    ) -> Result<(Tensor, DecodeStats)> {
        let sample_one = params.batch_size.is_none();
        let batch = params.batch_size.unwrap_or(1);
        let seq_len = self.net.max_seq_len();
        let device = self.net.device();

        let all_mask_num_tokens = self.mask_counts();
        if let Some(&residual) = all_mask_num_tokens.last() {
            if residual > 0 {
                tracing::warn!(
                    "schedule leaves {} of {} positions masked at t = 1",
                    residual,
                    seq_len
                );
            }
        }

        let mut state = DecodeState::new(batch, seq_len, self.mask_token_id);
        let mut stats = DecodeStats::default();
        let mut confidence_sum = 0.0f64;
        let mut confidence_count = 0usize;

        let mode = if self.self_cond.is_some() {
            ForwardMode::LogitsAndEmbeddings
        } else {
            ForwardMode::Logits
        };

        for (round, (&mask_num_tokens, steps_until_x0)) in all_mask_num_tokens
            .iter()
            .zip((0..self.steps).rev())
            .enumerate()
        {
            let input = Tensor::from_vec(state.tokens.clone(), (batch, seq_len), device)?;

            let self_cond = match &self.self_cond {
                Some(sc) => Some(sc.project(state.last_embed.as_ref())?),
                None => None,
            };

            let output = self.net.forward(&input, self_cond.as_ref(), mode)?;
            let logits = if self.self_cond.is_some() {
                let (logits, embeds) = output.logits_and_embeddings()?;
                state.last_embed = Some(embeds);
                logits
            } else {
                output.logits()?
            };
            let logits = suppress_token(&logits.to_dtype(DType::F32)?, self.mask_token_id)?;

            let logits = match params.filter_thres {
                Some(thres) => top_k_filter(&logits, thres)?,
                None => logits,
            };

            let temperature =
                annealed_temperature(params.start_temperature, steps_until_x0, self.steps);
            let probs = tempered_probs(&logits, temperature)?;
            let sampled = sample_multinomial(&probs, rng)?;

            for ((token, &new), &masked) in state
                .tokens
                .iter_mut()
                .zip(sampled.iter())
                .zip(state.mask.as_slice())
            {
                if masked {
                    *token = new;
                }
            }

            let sampled = Tensor::from_vec(sampled, (batch, seq_len), device)?;
            let penalties: Vec<Vec<f32>> = confidence_penalties(&logits, &sampled)?.to_vec2()?;

            for (b, row) in penalties.iter().enumerate() {
                for (i, &p) in row.iter().enumerate() {
                    if state.mask.get(b, i) {
                        confidence_sum += 1.0 - p as f64;
                        confidence_count += 1;
                    }
                }
            }

            state.mask = select_remask(&penalties, &state.mask, mask_num_tokens);
            for (token, &masked) in state.tokens.iter_mut().zip(state.mask.as_slice()) {
                if masked {
                    *token = self.mask_token_id;
                }
            }

            tracing::debug!(
                "round {}: temperature={:.4}, target masked={}, masked per row {:?}",
                round,
                temperature,
                mask_num_tokens,
                state.mask.row_counts()
            );

            stats.rounds += 1;
            stats.temperatures.push(temperature);
            stats.mask_counts.push(state.mask.row_counts());
        }

        if confidence_count > 0 {
            stats.avg_confidence = (confidence_sum / confidence_count as f64) as f32;
        }

        let seq = Tensor::from_vec(state.tokens, (batch, seq_len), device)?;
        let seq = if sample_one { seq.squeeze(0)? } else { seq };

        Ok((seq, stats))
    }
}
