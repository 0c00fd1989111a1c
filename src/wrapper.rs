//! Non-autoregressive wrapper around a sequence model
//!
//! Owns the network plus everything the masked objective needs around it:
//! the resolved schedule, corruption probabilities and the optional
//! self-conditioning parameters. Training lives in [`crate::training`],
//! iterative decoding in [`crate::decoding`].

use candle_nn::VarBuilder;

use crate::config::NarConfig;
use crate::error::{NarError, Result};
use crate::model::SequenceModel;
use crate::schedule::Schedule;
use crate::self_cond::SelfConditioning;

/// MaskGIT-style trainer and sampler for a [`SequenceModel`]
pub struct NonAutoregressiveWrapper<M: SequenceModel> {
    pub(crate) net: M,
    pub(crate) mask_token_id: u32,
    pub(crate) steps: usize,
    pub(crate) schedule: Schedule,
    pub(crate) no_replace_prob: f64,
    pub(crate) random_token_prob: f64,
    pub(crate) self_cond_train_prob: f64,
    pub(crate) self_cond: Option<SelfConditioning>,
}

impl<M: SequenceModel> NonAutoregressiveWrapper<M> {
    /// Wrap `net`; self-conditioning parameters are created under `vb` when enabled
    pub fn new(net: M, config: &NarConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let schedule = Schedule::from_name(&config.schedule)?;

        if config.mask_token_id as usize >= net.num_tokens() {
            return Err(NarError::InvalidConfig(format!(
                "mask_token_id {} is outside the model vocabulary of {} tokens",
                config.mask_token_id,
                net.num_tokens()
            )));
        }
        if net.num_tokens() < 2 {
            return Err(NarError::InvalidConfig(
                "model vocabulary has no tokens besides the mask token".to_string(),
            ));
        }

        let self_cond = if config.self_cond {
            Some(SelfConditioning::new(net.emb_dim(), vb)?)
        } else {
            None
        };

        tracing::debug!(
            "wrapper: steps={}, schedule={:?}, self_cond={}",
            config.steps,
            schedule,
            self_cond.is_some()
        );

        Ok(Self {
            net,
            mask_token_id: config.mask_token_id,
            steps: config.steps,
            schedule,
            no_replace_prob: config.no_replace_prob,
            random_token_prob: config.random_token_prob,
            self_cond_train_prob: config.self_cond_train_prob,
            self_cond,
        })
    }

    /// Replace the named schedule, e.g. with [`Schedule::custom`]
    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn net(&self) -> &M {
        &self.net
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn mask_token_id(&self) -> u32 {
        self.mask_token_id
    }

    pub fn max_seq_len(&self) -> usize {
        self.net.max_seq_len()
    }

    pub fn self_conditioning(&self) -> Option<&SelfConditioning> {
        self.self_cond.as_ref()
    }

    /// Per-round target mask counts for `generate`
    pub fn mask_counts(&self) -> Vec<usize> {
        self.schedule.mask_counts(self.steps, self.net.max_seq_len())
    }
}
