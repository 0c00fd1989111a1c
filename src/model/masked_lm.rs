//! Reference sequence model: encoder + language modeling head

use candle_core::{Device, Module, Result, Tensor};
use candle_nn::{linear_no_bias, Linear, VarBuilder};

use crate::config::EncoderConfig;

use super::encoder::TransformerEncoder;
use super::{ForwardMode, ModelOutput, SequenceModel};

/// Bidirectional transformer predicting every position at once
pub struct MaskedTransformer {
    model: TransformerEncoder,
    /// Language modeling head: [hidden_size -> vocab_size]
    lm_head: Linear,
    config: EncoderConfig,
    device: Device,
}

impl MaskedTransformer {
    pub fn new(config: &EncoderConfig, vb: VarBuilder, device: &Device) -> Result<Self> {
        let model = TransformerEncoder::new(config, vb.pp("model"), device)?;
        let lm_head = linear_no_bias(config.hidden_size, config.vocab_size, vb.pp("lm_head"))?;

        Ok(Self {
            model,
            lm_head,
            config: config.clone(),
            device: device.clone(),
        })
    }

    pub fn num_layers(&self) -> usize {
        self.model.num_layers()
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }
}

impl SequenceModel for MaskedTransformer {
    fn emb_dim(&self) -> usize {
        self.config.hidden_size
    }

    fn num_tokens(&self) -> usize {
        self.config.vocab_size
    }

    fn max_seq_len(&self) -> usize {
        self.config.max_seq_len
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn forward(
        &self,
        input_ids: &Tensor,
        sum_embeds: Option<&Tensor>,
        mode: ForwardMode,
    ) -> Result<ModelOutput> {
        let hidden_states = self.model.forward(input_ids, sum_embeds)?;
        let logits = if mode.wants_logits() {
            Some(self.lm_head.forward(&hidden_states)?)
        } else {
            None
        };
        Ok(ModelOutput {
            logits,
            embeddings: mode.wants_embeddings().then_some(hidden_states),
        })
    }
}
