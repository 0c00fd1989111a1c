//! Noise schedules
//!
//! A schedule maps normalized time `t` in [0, 1] to the fraction of positions
//! that stay masked: 1 at `t = 0`, 0 at `t = 1`, non-increasing in between.
//!
//! - Training samples one `t` per example to pick its masking ratio.
//! - Generation evaluates the schedule at `steps` evenly spaced points in
//!   (0, 1] to get the number of tokens left masked after each round.

use std::f64::consts::FRAC_PI_2;
use std::fmt;
use std::sync::Arc;

use candle_core::Tensor;

use crate::error::{NarError, Result};

/// Caller-supplied schedule function
pub type ScheduleFn = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

/// Masking schedule, resolved once at construction
#[derive(Clone)]
pub enum Schedule {
    /// `1 - t`
    Linear,
    /// `cos(t * π/2)` (MaskGIT)
    Cosine,
    Custom(ScheduleFn),
}

impl fmt::Debug for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Linear => write!(f, "Linear"),
            Schedule::Cosine => write!(f, "Cosine"),
            Schedule::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl Schedule {
    /// Resolve a built-in schedule by name
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "linear" => Ok(Schedule::Linear),
            "cosine" => Ok(Schedule::Cosine),
            other => Err(NarError::InvalidSchedule(format!(
                "unknown schedule '{}' (expected 'linear' or 'cosine')",
                other
            ))),
        }
    }

    /// Wrap a custom schedule, probing it at both ends of the time range
    ///
    /// The function must return finite values in [0, 1]. A non-zero value at
    /// `t = 1` is accepted but leaves masked tokens in generated output.
    pub fn custom<F>(f: F) -> Result<Self>
    where
        F: Fn(f64) -> f64 + Send + Sync + 'static,
    {
        for t in [0.0, 1.0] {
            let v = f(t);
            if !v.is_finite() || !(0.0..=1.0).contains(&v) {
                return Err(NarError::InvalidSchedule(format!(
                    "custom schedule returned {} at t = {}",
                    v, t
                )));
            }
        }
        Ok(Schedule::Custom(Arc::new(f)))
    }

    /// Masked fraction at time `t`
    pub fn eval(&self, t: f64) -> f64 {
        match self {
            Schedule::Linear => 1.0 - t,
            Schedule::Cosine => (t * FRAC_PI_2).cos(),
            Schedule::Custom(f) => f(t),
        }
    }

    pub fn eval_many(&self, times: &[f64]) -> Vec<f64> {
        times.iter().map(|&t| self.eval(t)).collect()
    }

    /// Elementwise evaluation on a float tensor of times
    pub fn apply_tensor(&self, t: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Schedule::Linear => t.affine(-1.0, 1.0),
            Schedule::Cosine => t.affine(FRAC_PI_2, 0.0)?.cos(),
            Schedule::Custom(f) => {
                let dtype = t.dtype();
                let values: Vec<f64> = t
                    .to_dtype(candle_core::DType::F64)?
                    .flatten_all()?
                    .to_vec1::<f64>()?
                    .into_iter()
                    .map(|x| f(x))
                    .collect();
                Tensor::from_vec(values, t.shape(), t.device())?.to_dtype(dtype)
            }
        }
    }

    /// Target number of masked tokens left after each decoding round
    ///
    /// Evaluated at `i / steps` for `i = 1..=steps`, so the last entry is
    /// taken at exactly `t = 1`. Fractions are truncated and clamped to
    /// `[0, seq_len]`.
    pub fn mask_counts(&self, steps: usize, seq_len: usize) -> Vec<usize> {
        (1..=steps)
            .map(|i| {
                let t = i as f64 / steps as f64;
                let count = (self.eval(t) * seq_len as f64).trunc();
                count.clamp(0.0, seq_len as f64) as usize
            })
            .collect()
    }
}
