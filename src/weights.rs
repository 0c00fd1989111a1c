//! Reference-model weight loading from safetensors
//!
//! Accepts either a `.safetensors` file or a directory holding
//! `model.safetensors`. Tensor names follow the module paths of
//! [`crate::model::MaskedTransformer`] (`model.layers.0.self_attn.q_proj.weight`,
//! `lm_head.weight`, ...) plus `null_embed` / `to_self_cond.weight` when the
//! wrapper uses self-conditioning.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use memmap2::Mmap;
use safetensors::SafeTensors;

/// Resolve the weights file for a path
pub fn weights_file<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
    let path = path.as_ref();
    if path.is_dir() {
        let file = path.join("model.safetensors");
        if !file.exists() {
            anyhow::bail!("No model.safetensors found in {}", path.display());
        }
        Ok(file)
    } else if path.exists() {
        Ok(path.to_path_buf())
    } else {
        anyhow::bail!("Weights not found: {}", path.display())
    }
}

/// Load weights into a read-only VarBuilder
pub fn load_model_vb<P: AsRef<Path>>(
    path: P,
    dtype: DType,
    device: &Device,
) -> Result<VarBuilder<'static>> {
    let file = weights_file(path)?;
    let tensors = load_safetensors_file(&file, dtype, device)?;
    tracing::info!("Loaded {} tensors from {}", tensors.len(), file.display());
    Ok(VarBuilder::from_tensors(tensors, dtype, device))
}

/// Load every tensor of a safetensors file, converting floats to `dtype`
fn load_safetensors_file(
    path: &Path,
    dtype: DType,
    device: &Device,
) -> Result<HashMap<String, Tensor>> {
    let file = std::fs::File::open(path).context(format!("Failed to open {}", path.display()))?;

    // Memory-map for efficient loading
    let mmap = unsafe { Mmap::map(&file)? };
    let st = SafeTensors::deserialize(&mmap)?;

    let mut tensors = HashMap::new();
    for name in st.names() {
        let view = st.tensor(name)?;
        let tensor = tensor_from_view(&view, device)
            .with_context(|| format!("Failed to read tensor {}", name))?
            .to_dtype(dtype)?;
        tensors.insert(name.to_string(), tensor);
    }

    Ok(tensors)
}

/// Convert a float safetensors view to a candle tensor
fn tensor_from_view(view: &safetensors::tensor::TensorView, device: &Device) -> Result<Tensor> {
    use safetensors::Dtype as StDtype;

    let shape: Vec<usize> = view.shape().to_vec();
    let data = view.data();

    let tensor = match view.dtype() {
        StDtype::BF16 => {
            let data: Vec<half::bf16> = data
                .chunks_exact(2)
                .map(|b| half::bf16::from_le_bytes([b[0], b[1]]))
                .collect();
            Tensor::from_vec(data, shape.as_slice(), device)?
        }
        StDtype::F16 => {
            let data: Vec<half::f16> = data
                .chunks_exact(2)
                .map(|b| half::f16::from_le_bytes([b[0], b[1]]))
                .collect();
            Tensor::from_vec(data, shape.as_slice(), device)?
        }
        StDtype::F32 => {
            let data: Vec<f32> = data
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            Tensor::from_vec(data, shape.as_slice(), device)?
        }
        other => anyhow::bail!("Unsupported weight dtype: {:?}", other),
    };

    Ok(tensor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_through_safetensors() -> Result<()> {
        let device = Device::Cpu;
        let dir = std::env::temp_dir().join(format!("maskgit-weights-{}", std::process::id()));
        std::fs::create_dir_all(&dir)?;
        let file = dir.join("model.safetensors");

        let weight = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3), &device)?;
        candle_core::safetensors::save(
            &HashMap::from([("lm_head.weight".to_string(), weight)]),
            &file,
        )?;

        let vb = load_model_vb(&dir, DType::F32, &device)?;
        let loaded: Vec<Vec<f32>> = vb.get((2, 3), "lm_head.weight")?.to_vec2()?;
        assert_eq!(loaded, vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);

        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[test]
    fn test_missing_weights_error() {
        assert!(weights_file("/nonexistent/maskgit/weights.safetensors").is_err());
    }
}
