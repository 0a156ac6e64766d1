//! Command line entry point
//!
//! Trains, tests or sweeps prototype text classifiers and the linear baseline:
//! - `--mode train`: train and checkpoint the best model
//! - `--mode test`: evaluate the latest checkpoint and write the prototype report
//! - `--mode both`: train, then test
//! - `--mode sweep`: grid search over learning rate, batch size and loss weights

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use proto_nlp::data::DatasetName;
use proto_nlp::network::ModelKind;
use proto_nlp::utils::{setup_logging, Config, Mode};
use proto_nlp::{pipeline, VERSION};

#[derive(Parser)]
#[command(name = "proto-nlp")]
#[command(version)]
#[command(about = "Interpretable prototype networks for text classification", long_about = None)]
struct Cli {
    /// Path to configuration file; defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// What to run
    #[arg(short, long, value_enum)]
    mode: Option<Mode>,

    /// Dataset file with `label<TAB>text` lines
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Dataset format: reviews labels or toxicity scores
    #[arg(long, value_enum)]
    data_name: Option<DatasetName>,

    /// Drop toxicity examples whose score is strictly between 0 and 1
    #[arg(long)]
    discard: bool,

    /// Model variant (`baseline` trains a linear head without prototypes)
    #[arg(long, value_enum)]
    model: Option<ModelKind>,

    /// Learning rate
    #[arg(long)]
    lr: Option<f64>,

    /// Number of epochs
    #[arg(short, long)]
    epochs: Option<usize>,

    /// Batch size
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Validate every N epochs
    #[arg(long)]
    val_epoch: Option<usize>,

    /// Number of prototypes
    #[arg(long)]
    num_prototypes: Option<usize>,

    /// Tokens per prototype for token-level models
    #[arg(long)]
    proto_size: Option<usize>,

    /// Weight of the R1 term
    #[arg(long)]
    lambda1: Option<f64>,

    /// Weight of the R2 term
    #[arg(long)]
    lambda2: Option<f64>,

    /// Data-parallel replicas
    #[arg(long)]
    replicas: Option<usize>,

    /// Train on a small random subset
    #[arg(long)]
    one_shot: bool,

    /// Directory for run outputs
    #[arg(long)]
    results_dir: Option<PathBuf>,

    /// Checkpoint to test instead of the latest run
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(mode) = self.mode {
            config.training.mode = mode;
        }
        if let Some(path) = &self.data {
            config.data.path = Some(path.clone());
        }
        if let Some(name) = self.data_name {
            config.data.name = name;
        }
        if self.discard {
            config.data.discard = true;
        }
        if let Some(kind) = self.model {
            config.model.kind = kind;
        }
        if let Some(lr) = self.lr {
            config.training.learning_rate = lr;
        }
        if let Some(epochs) = self.epochs {
            config.training.num_epochs = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            config.training.batch_size = batch_size;
        }
        if let Some(val_epoch) = self.val_epoch {
            config.training.val_epoch = val_epoch;
        }
        if let Some(n) = self.num_prototypes {
            config.training.num_prototypes = n;
        }
        if let Some(size) = self.proto_size {
            config.model.proto_size = size;
        }
        if let Some(lambda1) = self.lambda1 {
            config.training.lambda1 = lambda1;
        }
        if let Some(lambda2) = self.lambda2 {
            config.training.lambda2 = lambda2;
        }
        if let Some(replicas) = self.replicas {
            config.training.replicas = replicas;
        }
        if self.one_shot {
            config.training.one_shot = true;
        }
        if let Some(dir) = &self.results_dir {
            config.output.results_dir = dir.clone();
        }
        if let Some(path) = &self.checkpoint {
            config.output.checkpoint = Some(path.clone());
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path).with_context(|| format!("loading configuration {}", path.display()))?,
        None => Config::default(),
    };
    cli.apply(&mut config);

    let log_level = match cli.verbose {
        0 => config.logging.level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    setup_logging(&log_level)?;

    info!("proto-nlp v{}", VERSION);
    config.validate().context("invalid configuration")?;
    info!(
        "Mode {:?}, model {}, {} prototypes",
        config.training.mode, config.model.kind, config.training.num_prototypes
    );

    pipeline::run(config).context("run failed")?;
    Ok(())
}
