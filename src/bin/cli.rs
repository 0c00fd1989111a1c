//! maskgit-rs CLI
//!
//! Command-line interface for iterative parallel decoding and the masked
//! training objective on the reference transformer.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use maskgit_rs::{EncoderConfig, GenerateParams, NarConfig, NarEngine, Schedule};

#[derive(Parser)]
#[command(name = "maskgit-cli")]
#[command(about = "Non-autoregressive masked-token decoding", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Model and wrapper options shared by `generate` and `loss`
#[derive(Args)]
struct ModelArgs {
    /// Encoder config JSON (defaults to the tiny built-in model)
    #[arg(long)]
    encoder_config: Option<PathBuf>,

    /// Wrapper config JSON (mask token, steps, schedule, ...)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// safetensors file or directory; random init when omitted
    #[arg(short, long)]
    weights: Option<PathBuf>,

    /// Override the number of refinement rounds
    #[arg(long)]
    steps: Option<usize>,

    /// Override the schedule: linear or cosine
    #[arg(long)]
    schedule: Option<String>,

    /// Enable self-conditioning
    #[arg(long)]
    self_cond: bool,

    /// Seed for masking and sampling
    #[arg(long, default_value = "0")]
    seed: u64,
}

impl ModelArgs {
    fn build(&self) -> Result<NarEngine> {
        let encoder = match &self.encoder_config {
            Some(path) => EncoderConfig::from_file(path)?,
            None => EncoderConfig::tiny(),
        };

        // the last vocabulary id is the mask token unless a config says otherwise
        let mut nar = match &self.config {
            Some(path) => NarConfig::from_file(path)?,
            None => NarConfig::new(encoder.vocab_size as u32 - 1),
        };
        if let Some(steps) = self.steps {
            nar.steps = steps;
        }
        if let Some(schedule) = &self.schedule {
            nar.schedule = schedule.clone();
        }
        nar.self_cond |= self.self_cond;

        NarEngine::new(&encoder, &nar, self.weights.as_deref(), self.seed)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Sample sequences by iterative unmasking
    Generate {
        #[command(flatten)]
        model: ModelArgs,

        /// Number of sequences
        #[arg(short = 'n', long, default_value = "1")]
        batch_size: usize,

        /// Temperature at the first round
        #[arg(short, long, default_value = "1.0")]
        temperature: f64,

        /// Top-k filter threshold: keep the top (1 - thres) share of logits
        #[arg(long, default_value = "0.9")]
        filter_thres: f64,

        /// Sample from the full distribution
        #[arg(long)]
        no_filter: bool,
    },

    /// Evaluate the masked training loss on random sequences
    Loss {
        #[command(flatten)]
        model: ModelArgs,

        /// Number of sequences
        #[arg(short = 'n', long, default_value = "4")]
        batch_size: usize,
    },

    /// Print the per-round mask counts of a schedule
    Schedule {
        /// linear or cosine
        #[arg(short, long, default_value = "linear")]
        schedule: String,

        #[arg(long, default_value = "18")]
        steps: usize,

        #[arg(long, default_value = "256")]
        seq_len: usize,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            model,
            batch_size,
            temperature,
            filter_thres,
            no_filter,
        } => {
            let load_start = Instant::now();
            let mut engine = model.build()?;
            eprintln!("Model ready in {:.2}s", load_start.elapsed().as_secs_f64());

            let params = GenerateParams {
                batch_size: Some(batch_size),
                start_temperature: temperature,
                filter_thres: (!no_filter).then_some(filter_thres),
            };

            let gen_start = Instant::now();
            let (rows, stats) = engine.generate(&params)?;
            let gen_time = gen_start.elapsed();

            for row in &rows {
                let ids: Vec<String> = row.iter().map(|t| t.to_string()).collect();
                println!("{}", ids.join(" "));
            }

            eprintln!("\n--- Stats ---");
            eprintln!("Rounds: {}", stats.rounds);
            eprintln!("Average confidence: {:.3}", stats.avg_confidence);
            eprintln!("Time: {:.3}s", gen_time.as_secs_f64());
        }

        Commands::Loss { model, batch_size } => {
            let mut engine = model.build()?;
            let batch = engine.random_sequences(batch_size);
            let out = engine.loss(&batch)?;
            let loss: f32 = out.loss.to_dtype(candle_core::DType::F32)?.to_scalar()?;

            println!("loss: {:.4}", loss);
            println!("masked per row: {:?}", out.loss_mask.row_counts());
            println!(
                "mask token: {}, random token: {}, self-cond pass: {}",
                out.replaced_with_mask.count(),
                out.random_replaced.count(),
                out.used_self_cond_pass
            );
        }

        Commands::Schedule {
            schedule,
            steps,
            seq_len,
        } => {
            let s = Schedule::from_name(&schedule)?;
            println!("{:>6} {:>8} {:>8}", "round", "time", "masked");
            for (i, count) in s.mask_counts(steps, seq_len).iter().enumerate() {
                println!("{:>6} {:>8.3} {:>8}", i, (i + 1) as f64 / steps as f64, count);
            }
        }
    }

    Ok(())
}
