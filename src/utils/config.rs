//! Configuration management
//!
//! This module handles loading, validating and saving run configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::data::DatasetName;
use crate::encoder::EncoderConfig;
use crate::error::{Error, Result};
use crate::network::{DistanceFunction, ModelKind};
use crate::training::{LossWeights, SweepGrid};

/// What a run does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Train and checkpoint the best model
    Train,
    /// Evaluate the latest checkpoint and write the prototype report
    Test,
    /// Train, then test
    Both,
    /// Grid search over training hyperparameters
    Sweep,
}

/// Candidate pool for the R2 term
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolStrategy {
    /// Whole encoded training split
    Full,
    /// Current mini-batch only
    Batch,
}

/// Training configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub mode: Mode,
    pub learning_rate: f64,
    pub num_epochs: usize,
    pub batch_size: usize,
    /// Validate every this many epochs (and after the last one)
    pub val_epoch: usize,
    pub num_prototypes: usize,
    /// Weight of R1
    pub lambda1: f64,
    /// Weight of R2
    pub lambda2: f64,
    pub num_classes: usize,
    /// Cross-entropy class weights; recomputed from the label distribution
    /// when a dataset is loaded
    pub class_weights: Vec<f64>,
    pub weight_decay: f64,
    /// Data-parallel replicas per batch
    pub replicas: usize,
    /// Train on a small random subset
    pub one_shot: bool,
    /// Subset size used by `one_shot`
    pub one_shot_size: usize,
    pub seed: u64,
    pub r2_pool: PoolStrategy,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Both,
            learning_rate: 0.001,
            num_epochs: 100,
            batch_size: 256,
            val_epoch: 10,
            num_prototypes: 10,
            lambda1: 0.1,
            lambda2: 0.1,
            num_classes: 2,
            class_weights: vec![0.5, 0.5],
            weight_decay: 0.01,
            replicas: 1,
            one_shot: false,
            one_shot_size: 100,
            seed: 0,
            r2_pool: PoolStrategy::Full,
        }
    }
}

impl TrainingConfig {
    pub fn loss_weights(&self) -> LossWeights {
        LossWeights {
            lambda1: self.lambda1,
            lambda2: self.lambda2,
        }
    }
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub kind: ModelKind,
    /// Consecutive tokens per prototype (token-level variants)
    pub proto_size: usize,
    pub distance: DistanceFunction,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            kind: ModelKind::Dist,
            proto_size: 4,
            distance: DistanceFunction::SquaredEuclidean,
        }
    }
}

impl ModelConfig {
    /// Window width actually used; sentence prototypes span one vector
    pub fn effective_proto_size(&self) -> usize {
        if self.kind.is_token_level() {
            self.proto_size
        } else {
            1
        }
    }
}

/// Dataset location and split fractions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// TSV file with `label<TAB>text` (reviews) or `score<TAB>text` (toxicity) lines
    pub path: Option<PathBuf>,
    pub name: DatasetName,
    /// Leave out toxicity examples scored strictly between 0 and 1
    pub discard: bool,
    pub val_fraction: f64,
    pub test_fraction: f64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            path: None,
            name: DatasetName::Reviews,
            discard: false,
            val_fraction: 0.15,
            test_fraction: 0.15,
        }
    }
}

/// Output locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Parent of the per-run timestamp directories
    pub results_dir: PathBuf,
    /// Explicit checkpoint for testing instead of the latest run
    pub checkpoint: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("./experiments/train_results"),
            checkpoint: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub training: TrainingConfig,
    pub model: ModelConfig,
    pub encoder: EncoderConfig,
    pub data: DataConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
    pub sweep: SweepGrid,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject configurations that cannot produce a valid run
    pub fn validate(&self) -> Result<()> {
        let t = &self.training;
        let fail = |msg: String| Err(Error::ConfigError(msg));

        if t.num_epochs == 0 {
            return fail("num_epochs must be positive".to_string());
        }
        if t.batch_size == 0 {
            return fail("batch_size must be positive".to_string());
        }
        if t.val_epoch == 0 {
            return fail("val_epoch must be positive".to_string());
        }
        if self.model.kind.has_prototypes() && t.num_prototypes == 0 {
            return fail("num_prototypes must be positive".to_string());
        }
        if t.num_classes < 2 {
            return fail(format!("num_classes must be at least 2, got {}", t.num_classes));
        }
        if t.class_weights.len() != t.num_classes {
            return fail(format!(
                "class_weights has {} entries but num_classes is {}",
                t.class_weights.len(),
                t.num_classes
            ));
        }
        if t.class_weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return fail("class_weights must be finite and non-negative".to_string());
        }
        if !(t.learning_rate > 0.0 && t.learning_rate.is_finite()) {
            return fail(format!("learning_rate must be positive, got {}", t.learning_rate));
        }
        if t.lambda1 < 0.0 || t.lambda2 < 0.0 {
            return fail("lambda1 and lambda2 must be non-negative".to_string());
        }
        if t.replicas == 0 {
            return fail("replicas must be at least 1".to_string());
        }
        if self.model.kind.is_token_level() && self.model.proto_size == 0 {
            return fail("proto_size must be positive for token-level models".to_string());
        }
        let d = &self.data;
        if d.val_fraction <= 0.0 || d.test_fraction <= 0.0 || d.val_fraction + d.test_fraction >= 1.0 {
            return fail(format!(
                "split fractions val={} test={} must be positive and leave a training split",
                d.val_fraction, d.test_fraction
            ));
        }
        Ok(())
    }
}
