//! High-level engine: device selection, model construction and seeded sampling

use std::path::Path;

use anyhow::Result;
use candle_core::{Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{EncoderConfig, NarConfig};
use crate::decoding::{DecodeStats, GenerateParams};
use crate::model::MaskedTransformer;
use crate::training::TrainingOutput;
use crate::weights::load_model_vb;
use crate::wrapper::NonAutoregressiveWrapper;

/// Reference transformer wrapped for masked training and iterative decoding
pub struct NarEngine {
    wrapper: NonAutoregressiveWrapper<MaskedTransformer>,
    /// Trainable parameters when the model was freshly initialised
    varmap: Option<VarMap>,
    device: Device,
    rng: StdRng,
}

impl NarEngine {
    /// Build the engine, loading weights when a path is given
    ///
    /// Without weights every parameter is randomly initialised in a
    /// [`VarMap`], ready for an external optimizer.
    pub fn new(
        encoder_config: &EncoderConfig,
        nar_config: &NarConfig,
        weights: Option<&Path>,
        seed: u64,
    ) -> Result<Self> {
        let device = Self::select_device()?;
        tracing::info!("Using device: {:?}", device);
        // CPU parameter init draws from the thread rng and cannot be seeded
        if !device.is_cpu() {
            device.set_seed(seed)?;
        }

        let dtype = encoder_config.candle_dtype();
        tracing::info!(
            "Model config: {} layers, {} hidden, {} tokens, length {}, dtype={:?}",
            encoder_config.num_hidden_layers,
            encoder_config.hidden_size,
            encoder_config.vocab_size,
            encoder_config.max_seq_len,
            dtype
        );

        let (vb, varmap) = match weights {
            Some(path) => {
                tracing::info!("Loading weights from {}...", path.display());
                (load_model_vb(path, dtype, &device)?, None)
            }
            None => {
                tracing::info!("Initialising random weights");
                let varmap = VarMap::new();
                let vb = VarBuilder::from_varmap(&varmap, dtype, &device);
                (vb, Some(varmap))
            }
        };

        let model = MaskedTransformer::new(encoder_config, vb.clone(), &device)?;
        let wrapper = NonAutoregressiveWrapper::new(model, nar_config, vb)?;

        Ok(Self {
            wrapper,
            varmap,
            device,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Select the best available device
    fn select_device() -> Result<Device> {
        #[cfg(feature = "metal")]
        {
            if candle_core::utils::metal_is_available() {
                return Ok(Device::new_metal(0)?);
            }
        }

        #[cfg(feature = "cuda")]
        {
            if candle_core::utils::cuda_is_available() {
                return Ok(Device::new_cuda(0)?);
            }
        }

        Ok(Device::Cpu)
    }

    /// Sample sequences; one row per sequence
    pub fn generate(&mut self, params: &GenerateParams) -> Result<(Vec<Vec<u32>>, DecodeStats)> {
        let (seq, stats) = self.wrapper.generate_with_stats(params, &mut self.rng)?;
        let seq = if seq.rank() == 1 { seq.unsqueeze(0)? } else { seq };
        Ok((seq.to_vec2::<u32>()?, stats))
    }

    /// Masked-token loss on the given sequences
    pub fn loss(&mut self, sequences: &[Vec<u32>]) -> Result<TrainingOutput> {
        let seq_len = self.wrapper.max_seq_len();
        let flat: Vec<u32> = sequences.iter().flatten().copied().collect();
        let batch = sequences.len();
        if flat.len() != batch * seq_len {
            anyhow::bail!(
                "every sequence must have length {} (got {} tokens for {} sequences)",
                seq_len,
                flat.len(),
                batch
            );
        }
        let x = Tensor::from_vec(flat, (batch, seq_len), &self.device)?;
        Ok(self.wrapper.compute_loss_detailed(&x, &mut self.rng)?)
    }

    /// Uniformly random sequences over the non-mask vocabulary
    pub fn random_sequences(&mut self, batch: usize) -> Vec<Vec<u32>> {
        let seq_len = self.wrapper.max_seq_len();
        let mask_token_id = self.wrapper.mask_token_id();
        let vocab_size = self.wrapper.net().config().vocab_size as u32;

        let mut sequences = Vec::with_capacity(batch);
        for _ in 0..batch {
            let mut row = Vec::with_capacity(seq_len);
            while row.len() < seq_len {
                let token = self.rng.gen_range(0..vocab_size);
                if token != mask_token_id {
                    row.push(token);
                }
            }
            sequences.push(row);
        }
        sequences
    }

    pub fn wrapper(&self) -> &NonAutoregressiveWrapper<MaskedTransformer> {
        &self.wrapper
    }

    pub fn varmap(&self) -> Option<&VarMap> {
        self.varmap.as_ref()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}
