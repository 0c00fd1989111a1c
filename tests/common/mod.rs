//! Deterministic stub model shared by the integration tests

#![allow(dead_code)]

use std::cell::RefCell;

use candle_core::{Device, Result, Tensor};
use maskgit_rs::{ForwardMode, ModelOutput, SequenceModel};

/// Model whose logits are a fixed function of position, candidate token and
/// input token. The last vocabulary id is the mask token and always gets the
/// highest logit, so decoding must exclude it explicitly.
pub struct ScriptedModel {
    pub vocab: usize,
    pub dim: usize,
    pub seq_len: usize,
    pub device: Device,
    /// Token ids seen by every forward call
    pub inputs: RefCell<Vec<Vec<Vec<u32>>>>,
    /// Shape of `sum_embeds` for every forward call
    pub biases: RefCell<Vec<Option<Vec<usize>>>>,
    /// Mode requested by every forward call
    pub modes: RefCell<Vec<ForwardMode>>,
}

impl ScriptedModel {
    pub fn new(vocab: usize, dim: usize, seq_len: usize) -> Self {
        Self {
            vocab,
            dim,
            seq_len,
            device: Device::Cpu,
            inputs: RefCell::new(Vec::new()),
            biases: RefCell::new(Vec::new()),
            modes: RefCell::new(Vec::new()),
        }
    }

    pub fn mask_token_id(&self) -> u32 {
        (self.vocab - 1) as u32
    }

    /// Logit for candidate `v` at position `i` given input token `token`
    pub fn logit(&self, i: usize, v: usize, token: u32) -> f32 {
        if v == self.vocab - 1 {
            return 10.0;
        }
        ((i * 7 + v * 13 + token as usize * 3) % 11) as f32 * 0.5
    }

    pub fn logits_for(&self, ids: &[Vec<u32>]) -> Vec<f32> {
        let mut data = Vec::with_capacity(ids.len() * self.seq_len * self.vocab);
        for row in ids {
            for (i, &token) in row.iter().enumerate() {
                for v in 0..self.vocab {
                    data.push(self.logit(i, v, token));
                }
            }
        }
        data
    }
}

impl SequenceModel for ScriptedModel {
    fn emb_dim(&self) -> usize {
        self.dim
    }

    fn num_tokens(&self) -> usize {
        self.vocab
    }

    fn max_seq_len(&self) -> usize {
        self.seq_len
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
        let ids: Vec<Vec<u32>> = input_ids.to_vec2()?;
        let batch = ids.len();

        self.inputs.borrow_mut().push(ids.clone());
        self.biases
            .borrow_mut()
            .push(sum_embeds.map(|t| t.dims().to_vec()));
        self.modes.borrow_mut().push(mode);

        let logits = if mode.wants_logits() {
            Some(Tensor::from_vec(
                self.logits_for(&ids),
                (batch, self.seq_len, self.vocab),
                &self.device,
            )?)
        } else {
            None
        };
        let embeddings = if mode.wants_embeddings() {
            Some(Tensor::full(0.1f32, (batch, self.seq_len, self.dim), &self.device)?)
        } else {
            None
        };

        Ok(ModelOutput { logits, embeddings })
    }
}
