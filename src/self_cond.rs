//! Self-conditioning parameters
//!
//! A learned null vector stands in for "no previous prediction"; both it and
//! real embeddings go through a bias-free linear map before being added to the
//! model's token embeddings.

use candle_core::{Module, Result, Tensor};
use candle_nn::{linear_no_bias, Init, Linear, VarBuilder};

/// Null embedding plus projection, present only when self-conditioning is on
pub struct SelfConditioning {
    /// Learned "no prior information" vector: [dim]
    null_embed: Tensor,
    /// Projection: [dim -> dim], no bias
    to_self_cond: Linear,
}

impl SelfConditioning {
    pub fn new(dim: usize, vb: VarBuilder) -> Result<Self> {
        let null_embed = vb.get_with_hints(
            dim,
            "null_embed",
            Init::Randn {
                mean: 0.0,
                stdev: 1.0,
            },
        )?;
        let to_self_cond = linear_no_bias(dim, dim, vb.pp("to_self_cond"))?;
        Ok(Self {
            null_embed,
            to_self_cond,
        })
    }

    pub fn null_embed(&self) -> &Tensor {
        &self.null_embed
    }

    /// Project a previous embedding into an additive bias
    ///
    /// `None` projects the null embedding, giving a `[1, dim]` bias that
    /// broadcasts over every position. Per-position embeddings
    /// `[batch, seq, dim]` keep their shape.
    pub fn project(&self, embed: Option<&Tensor>) -> Result<Tensor> {
        let embed = embed.unwrap_or(&self.null_embed);
        if embed.rank() == 1 {
            self.to_self_cond.forward(&embed.unsqueeze(0)?)
        } else {
            self.to_self_cond.forward(embed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_projection_shapes() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let sc = SelfConditioning::new(8, vb)?;

        assert_eq!(sc.null_embed().dims(), &[8]);
        assert_eq!(sc.project(None)?.dims(), &[1, 8]);

        let embeds = Tensor::randn(0f32, 1.0, (2, 5, 8), &device)?;
        assert_eq!(sc.project(Some(&embeds))?.dims(), &[2, 5, 8]);

        // null_embed and to_self_cond.weight are trainable
        assert_eq!(varmap.all_vars().len(), 2);
        Ok(())
    }
}
