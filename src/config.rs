//! Wrapper options and reference-model configuration

use candle_core::DType;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{NarError, Result};

/// Options for the non-autoregressive wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarConfig {
    /// Reserved token id fed to the model at masked positions
    pub mask_token_id: u32,

    /// Number of refinement rounds used by `generate`
    #[serde(default = "default_steps")]
    pub steps: usize,

    /// Feed the previous round's embeddings back as an additive bias
    #[serde(default)]
    pub self_cond: bool,

    /// Probability of running the extra self-conditioning pass during training
    #[serde(default = "default_self_cond_train_prob")]
    pub self_cond_train_prob: f64,

    /// Fraction of masked positions that keep their original token
    #[serde(default = "default_no_replace_prob")]
    pub no_replace_prob: f64,

    /// Fraction of masked positions replaced by a uniformly random token
    #[serde(default = "default_random_token_prob")]
    pub random_token_prob: f64,

    /// Schedule name: "linear" or "cosine"
    #[serde(default = "default_schedule")]
    pub schedule: String,
}

fn default_steps() -> usize {
    crate::DEFAULT_STEPS
}

fn default_self_cond_train_prob() -> f64 {
    0.75
}

fn default_no_replace_prob() -> f64 {
    0.15
}

fn default_random_token_prob() -> f64 {
    0.05
}

fn default_schedule() -> String {
    "linear".to_string()
}

impl NarConfig {
    /// Config with the default options and the given mask token
    pub fn new(mask_token_id: u32) -> Self {
        Self {
            mask_token_id,
            steps: default_steps(),
            self_cond: false,
            self_cond_train_prob: default_self_cond_train_prob(),
            no_replace_prob: default_no_replace_prob(),
            random_token_prob: default_random_token_prob(),
            schedule: default_schedule(),
        }
    }

    /// Load configuration from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_steps(mut self, steps: usize) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_self_cond(mut self, self_cond: bool) -> Self {
        self.self_cond = self_cond;
        self
    }

    pub fn with_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = schedule.into();
        self
    }

    /// Check ranges of the numeric options
    pub fn validate(&self) -> Result<()> {
        if self.steps == 0 {
            return Err(NarError::InvalidConfig("steps must be at least 1".into()));
        }
        for (name, p) in [
            ("self_cond_train_prob", self.self_cond_train_prob),
            ("no_replace_prob", self.no_replace_prob),
            ("random_token_prob", self.random_token_prob),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(NarError::InvalidConfig(format!(
                    "{} must be in [0, 1], got {}",
                    name, p
                )));
            }
        }
        Ok(())
    }
}

/// Configuration for the reference bidirectional transformer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Embedding table size, mask token included
    pub vocab_size: usize,

    /// Model width
    pub hidden_size: usize,

    pub num_hidden_layers: usize,

    pub num_attention_heads: usize,

    /// Number of key-value heads for GQA
    pub num_key_value_heads: usize,

    pub head_dim: usize,

    /// MLP intermediate size
    pub intermediate_size: usize,

    /// Fixed sequence length the model is trained and sampled at
    pub max_seq_len: usize,

    #[serde(default = "default_rope_theta")]
    pub rope_theta: f64,

    #[serde(default = "default_rms_norm_eps")]
    pub rms_norm_eps: f64,

    /// Whether to normalize queries and keys per head
    #[serde(default)]
    pub qk_norm: bool,

    /// Data type: "float32", "float16" or "bfloat16"
    #[serde(default = "default_dtype")]
    pub dtype: String,
}

fn default_rope_theta() -> f64 {
    10_000.0
}

fn default_rms_norm_eps() -> f64 {
    1e-6
}

fn default_dtype() -> String {
    "float32".to_string()
}

impl EncoderConfig {
    /// Load configuration from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Compute the number of query heads per KV head group (for GQA)
    pub fn num_kv_groups(&self) -> usize {
        self.num_attention_heads / self.num_key_value_heads
    }

    /// Get the candle DType based on config
    /// - On Metal, half precision is served as F16 (BF16 lacks full support)
    /// - Unknown names fall back to F32
    pub fn candle_dtype(&self) -> DType {
        let config_dtype = match self.dtype.to_lowercase().as_str() {
            "float32" | "f32" => DType::F32,
            "float16" | "f16" | "half" => DType::F16,
            "bfloat16" | "bf16" => DType::BF16,
            _ => DType::F32,
        };

        if config_dtype == DType::F32 {
            return DType::F32;
        }

        #[cfg(feature = "metal")]
        {
            if candle_core::utils::metal_is_available() {
                return DType::F16;
            }
        }

        config_dtype
    }

    /// Small model for tests and demos: 64 tokens + mask, width 32, length 16
    pub fn tiny() -> Self {
        Self {
            vocab_size: 65,
            hidden_size: 32,
            num_hidden_layers: 2,
            num_attention_heads: 4,
            num_key_value_heads: 2,
            head_dim: 8,
            intermediate_size: 64,
            max_seq_len: 16,
            rope_theta: default_rope_theta(),
            rms_norm_eps: default_rms_norm_eps(),
            qk_norm: true,
            dtype: default_dtype(),
        }
    }
}
