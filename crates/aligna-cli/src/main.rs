//! Aligna CLI - entity alignment between temporal knowledge graphs.
//!
//! # Usage
//!
//! ```bash
//! # Print the default configuration
//! aligna config > config.json
//!
//! # Generate a synthetic task
//! aligna synth -o task.json --entities 500
//!
//! # Train, validate and bootstrap, then evaluate on the reference set
//! aligna run task.json --config config.json --max-epoch 50
//!
//! # Same, with machine-readable output and debug logs
//! RUST_LOG=aligna_kge=debug aligna run task.json --json
//! ```

use aligna_core::task::write_task_json;
use aligna_core::{JsonTaskSource, SyntheticConfig, SyntheticTaskSource, TaskSource};
use aligna_kge::{AlignConfig, AlignmentTrainer, Metric, ModelRegistry};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "aligna")]
#[command(about = "Temporal knowledge graph entity alignment", long_about = None)]
struct Cli {
    /// Debug-level logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train on a task and report validation and test metrics
    Run {
        /// Task file (JSON)
        task: PathBuf,

        /// Configuration file (JSON); missing keys take defaults
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of epochs
        #[arg(long)]
        max_epoch: Option<usize>,

        /// Hits@k cut-offs, comma separated
        #[arg(long, value_delimiter = ',')]
        hits_k: Option<Vec<usize>>,

        /// Similarity metric (inner, cosine, euclidean, manhattan)
        #[arg(long)]
        metric: Option<Metric>,

        /// CSLS neighbourhood size (0 disables)
        #[arg(long)]
        csls: Option<usize>,

        /// Evaluation worker threads
        #[arg(long)]
        threads: Option<usize>,

        /// Embedding dimension
        #[arg(long)]
        dim: Option<usize>,

        /// Learning rate
        #[arg(long)]
        lr: Option<f32>,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Print a JSON report instead of text
        #[arg(long)]
        json: bool,
    },

    /// Generate a synthetic alignment task
    Synth {
        /// Output file (JSON)
        #[arg(short, long)]
        output: PathBuf,

        /// Counterpart pairs (entities per graph)
        #[arg(long, default_value = "200")]
        entities: usize,

        /// Relation types
        #[arg(long, default_value = "8")]
        relations: usize,

        /// Time buckets
        #[arg(long, default_value = "32")]
        time_size: usize,

        /// Fraction of pairs used as seed
        #[arg(long, default_value = "0.3")]
        seed_ratio: f32,

        /// Fraction of pairs held out as reference
        #[arg(long, default_value = "0.5")]
        reference_ratio: f32,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Print the default configuration as JSON
    Config,
}

/// Command-line overrides applied on top of the configuration file.
struct Overrides {
    max_epoch: Option<usize>,
    hits_k: Option<Vec<usize>>,
    metric: Option<Metric>,
    csls: Option<usize>,
    threads: Option<usize>,
    dim: Option<usize>,
    lr: Option<f32>,
    seed: Option<u64>,
}

impl Overrides {
    fn apply(self, mut config: AlignConfig) -> AlignConfig {
        if let Some(v) = self.max_epoch {
            config = config.with_max_epoch(v);
        }
        if let Some(v) = self.hits_k {
            config = config.with_hits_k(v);
        }
        if let Some(v) = self.metric {
            config = config.with_metric(v);
        }
        if let Some(v) = self.csls {
            config = config.with_csls(v);
        }
        if let Some(v) = self.threads {
            config = config.with_threads(v);
        }
        if let Some(v) = self.dim {
            config = config.with_embedding_dim(v);
        }
        if let Some(v) = self.lr {
            config = config.with_learning_rate(v);
        }
        if let Some(v) = self.seed {
            config = config.with_seed(v);
        }
        config
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            task,
            config,
            max_epoch,
            hits_k,
            metric,
            csls,
            threads,
            dim,
            lr,
            seed,
            json,
        } => {
            let overrides = Overrides {
                max_epoch,
                hits_k,
                metric,
                csls,
                threads,
                dim,
                lr,
                seed,
            };
            cmd_run(&task, config.as_deref(), overrides, json)
        }
        Commands::Synth {
            output,
            entities,
            relations,
            time_size,
            seed_ratio,
            reference_ratio,
            seed,
        } => {
            let config = SyntheticConfig {
                entities,
                relations,
                time_size,
                seed_ratio,
                reference_ratio,
                seed,
                ..Default::default()
            };
            cmd_synth(&output, config)
        }
        Commands::Config => cmd_config(),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_run(task_path: &Path, config_path: Option<&Path>, overrides: Overrides, json: bool) -> Result<()> {
    let config = match config_path {
        Some(path) => AlignConfig::from_json_file(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?,
        None => AlignConfig::default(),
    };
    let config = overrides.apply(config);

    let task = JsonTaskSource::new(task_path)
        .load()
        .with_context(|| format!("Failed to load task {}", task_path.display()))?;

    let max_epoch = config.max_epoch;
    let mut trainer = AlignmentTrainer::new(task, config, &ModelRegistry::with_builtin())
        .context("Failed to set up training")?;

    let start = Instant::now();
    let pb = if json {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(max_epoch as u64)
    };
    pb.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} epochs {msg}")
            .context("Invalid progress template")?,
    );

    let report = trainer
        .train_with_callback(|record| {
            pb.set_message(format!("loss {:.4} seed {}", record.loss, record.seed_size));
            pb.inc(1);
        })
        .context("Training failed")?;
    pb.finish_and_clear();

    let test = trainer.test().context("Test evaluation failed")?;

    if json {
        let out = serde_json::json!({
            "report": report,
            "test": test,
            "elapsed_secs": start.elapsed().as_secs_f64(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Alignment Run");
    println!("=============");
    println!("Model:          {}", report.model);
    println!("Epochs:         {}", report.epochs.len());
    println!("Stopped early:  {}", report.stopped_early);
    println!(
        "Seed pairs:     {} -> {}",
        report.initial_seed_size,
        trainer.seed().len()
    );
    println!("Bootstrapped:   {}", report.bootstrap_total());
    println!("Elapsed:        {:.2?}", start.elapsed());

    let validations: Vec<_> = report.validations().collect();
    if !validations.is_empty() {
        println!("\nValidation:");
        for (epoch, metrics) in validations {
            println!("  epoch {:>4}  {}", epoch, metrics.summary());
        }
    }

    println!("\nTest: {}", test.summary());
    Ok(())
}

fn cmd_synth(output: &Path, config: SyntheticConfig) -> Result<()> {
    let task = SyntheticTaskSource::new(config)
        .load()
        .context("Failed to generate synthetic task")?;
    write_task_json(&task, output).with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "Wrote {} ({} entities, {} facts, {} seed, {} reference)",
        output.display(),
        task.ent_num(),
        task.tri_num(),
        task.seed().len(),
        task.reference().len()
    );
    Ok(())
}

fn cmd_config() -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&AlignConfig::default())?);
    Ok(())
}
