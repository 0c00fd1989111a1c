//! Invariants of iterative parallel decoding
//!
//! Uses a deterministic stub model, so every difference between runs comes
//! from the seeded sampler.

mod common;

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use rand::rngs::StdRng;
use rand::SeedableRng;

use common::ScriptedModel;
use maskgit_rs::decoding::MIN_TEMPERATURE;
use maskgit_rs::model::MaskedTransformer;
use maskgit_rs::{
    EncoderConfig, ForwardMode, GenerateParams, NarConfig, NarError, NonAutoregressiveWrapper,
    Result, Schedule,
};

const VOCAB: usize = 17;
const DIM: usize = 6;
const SEQ_LEN: usize = 12;

fn wrapper(
    steps: usize,
    schedule: &str,
    self_cond: bool,
) -> NonAutoregressiveWrapper<ScriptedModel> {
    let model = ScriptedModel::new(VOCAB, DIM, SEQ_LEN);
    let config = NarConfig::new(model.mask_token_id())
        .with_steps(steps)
        .with_schedule(schedule)
        .with_self_cond(self_cond);
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    NonAutoregressiveWrapper::new(model, &config, vb).expect("valid wrapper config")
}

fn batch_params(batch_size: usize) -> GenerateParams {
    GenerateParams {
        batch_size: Some(batch_size),
        ..Default::default()
    }
}

#[test]
fn test_mask_count_matches_schedule_every_round() -> Result<()> {
    for schedule in ["linear", "cosine"] {
        let w = wrapper(6, schedule, false);
        let mut rng = StdRng::seed_from_u64(11);
        let (_, stats) = w.generate_with_stats(&batch_params(3), &mut rng)?;

        let expected = w.mask_counts();
        assert_eq!(stats.rounds, 6);
        assert_eq!(stats.mask_counts.len(), expected.len());
        for (per_row, &target) in stats.mask_counts.iter().zip(expected.iter()) {
            assert!(per_row.iter().all(|&c| c == target), "{:?} vs {}", per_row, target);
        }
    }
    Ok(())
}

#[test]
fn test_revealed_tokens_never_change() -> Result<()> {
    let w = wrapper(5, "cosine", false);
    let mask_id = w.mask_token_id();
    let mut rng = StdRng::seed_from_u64(3);
    let out: Vec<Vec<u32>> = w.generate(&batch_params(2), &mut rng)?.to_vec2()?;

    // inputs of every round after the first show what was revealed so far
    let inputs = w.net().inputs.borrow();
    assert_eq!(inputs.len(), 5);
    for round_input in inputs.iter() {
        for (b, row) in round_input.iter().enumerate() {
            for (i, &token) in row.iter().enumerate() {
                if token != mask_id {
                    assert_eq!(token, out[b][i], "position {} of row {} changed", i, b);
                }
            }
        }
    }

    // revealed sets grow monotonically
    let revealed: Vec<usize> = inputs
        .iter()
        .map(|r| r.iter().flatten().filter(|&&t| t != mask_id).count())
        .collect();
    assert!(revealed.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(revealed[0], 0);
    Ok(())
}

#[test]
fn test_single_linear_step_fully_unmasks() -> Result<()> {
    let w = wrapper(1, "linear", false);
    assert_eq!(w.mask_counts(), vec![0]);

    let mut rng = StdRng::seed_from_u64(5);
    let out: Vec<Vec<u32>> = w.generate(&batch_params(4), &mut rng)?.to_vec2()?;
    assert_eq!(out.len(), 4);
    assert!(out.iter().flatten().all(|&t| t != w.mask_token_id()));
    assert_eq!(w.net().inputs.borrow().len(), 1);
    Ok(())
}

#[test]
fn test_transformer_output_never_contains_mask_token() -> Result<()> {
    let device = Device::Cpu;
    let encoder = EncoderConfig::tiny();
    let mask_id = (encoder.vocab_size - 1) as u32;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = MaskedTransformer::new(&encoder, vb.clone(), &device)?;
    let config = NarConfig::new(mask_id).with_steps(4);
    let w = NonAutoregressiveWrapper::new(model, &config, vb)?;
    assert_eq!(w.mask_counts().last(), Some(&0));

    for seed in 0..20 {
        let mut rng = StdRng::seed_from_u64(seed);
        let out: Vec<Vec<u32>> = w.generate(&batch_params(16), &mut rng)?.to_vec2()?;
        let leaked = out.iter().flatten().filter(|&&t| t == mask_id).count();
        assert_eq!(leaked, 0, "seed {} left {} mask tokens", seed, leaked);
    }
    Ok(())
}

#[test]
fn test_omitted_batch_size_drops_batch_dim() -> Result<()> {
    let single = wrapper(4, "linear", false);
    let batched = wrapper(4, "linear", false);

    let mut rng = StdRng::seed_from_u64(42);
    let one = single.generate(&GenerateParams::default(), &mut rng)?;

    let mut rng = StdRng::seed_from_u64(42);
    let batch_of_one = batched.generate(&batch_params(1), &mut rng)?;

    assert_eq!(one.dims(), &[SEQ_LEN]);
    assert_eq!(batch_of_one.dims(), &[1, SEQ_LEN]);
    assert_eq!(one.to_vec1::<u32>()?, batch_of_one.squeeze(0)?.to_vec1::<u32>()?);
    Ok(())
}

#[test]
fn test_residual_masks_when_schedule_ends_above_zero() -> Result<()> {
    let schedule = Schedule::custom(|t| 1.0 - 0.5 * t)?;
    let w = wrapper(3, "linear", false).with_schedule(schedule);
    assert_eq!(*w.mask_counts().last().unwrap(), SEQ_LEN / 2);

    let mut rng = StdRng::seed_from_u64(9);
    let out: Vec<Vec<u32>> = w.generate(&batch_params(2), &mut rng)?.to_vec2()?;
    for row in out {
        let residual = row.iter().filter(|&&t| t == w.mask_token_id()).count();
        assert_eq!(residual, SEQ_LEN / 2);
    }
    Ok(())
}

#[test]
fn test_self_conditioning_feeds_previous_embeddings() -> Result<()> {
    let w = wrapper(3, "cosine", true);
    let mut rng = StdRng::seed_from_u64(1);
    w.generate(&batch_params(2), &mut rng)?;

    let biases = w.net().biases.borrow();
    assert_eq!(biases.len(), 3);
    // round 0 projects the null embedding, later rounds the model's own output
    assert_eq!(biases[0], Some(vec![1, DIM]));
    assert_eq!(biases[1], Some(vec![2, SEQ_LEN, DIM]));
    assert_eq!(biases[2], Some(vec![2, SEQ_LEN, DIM]));
    assert!(w.net().modes.borrow().iter().all(|&m| m == ForwardMode::LogitsAndEmbeddings));
    Ok(())
}

#[test]
fn test_temperature_anneals_to_floor() -> Result<()> {
    let w = wrapper(4, "linear", false);
    let mut rng = StdRng::seed_from_u64(0);
    let params = GenerateParams {
        batch_size: Some(1),
        start_temperature: 2.0,
        filter_thres: None,
    };
    let (_, stats) = w.generate_with_stats(&params, &mut rng)?;
    assert_eq!(stats.temperatures, vec![1.5, 1.0, 0.5, MIN_TEMPERATURE]);
    assert!(stats.avg_confidence > 0.0 && stats.avg_confidence <= 1.0);
    Ok(())
}

#[test]
fn test_unknown_schedule_is_rejected() {
    let model = ScriptedModel::new(VOCAB, DIM, SEQ_LEN);
    let config = NarConfig::new(model.mask_token_id()).with_schedule("sigmoid");
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    assert!(matches!(
        NonAutoregressiveWrapper::new(model, &config, vb),
        Err(NarError::InvalidSchedule(_))
    ));
}

#[test]
fn test_mask_token_outside_vocab_is_rejected() {
    let model = ScriptedModel::new(VOCAB, DIM, SEQ_LEN);
    let config = NarConfig::new(VOCAB as u32);
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    assert!(matches!(
        NonAutoregressiveWrapper::new(model, &config, vb),
        Err(NarError::InvalidConfig(_))
    ));
}
