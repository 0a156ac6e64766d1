//! Grid search over training hyperparameters
//!
//! Every combination overrides the base configuration for its run; each run
//! starts from a freshly initialized model and optimizer and writes its own
//! run directory. Runs execute one after another. After every run the
//! results so far are written to `sweep_results.json` under `results_dir`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::encoder::LabeledEmbeddings;
use crate::error::{Error, Result};
use crate::pipeline;
use crate::utils::Config;

/// Sweep summary file, written under `results_dir`
pub const SWEEP_RESULTS_FILE: &str = "sweep_results.json";

/// Values to sweep, combined as a cartesian product
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepGrid {
    pub learning_rate: Vec<f64>,
    pub batch_size: Vec<usize>,
    pub lambda1: Vec<f64>,
    pub lambda2: Vec<f64>,
}

impl Default for SweepGrid {
    fn default() -> Self {
        Self {
            learning_rate: vec![0.01, 0.001],
            batch_size: vec![128, 256],
            lambda1: vec![0.1, 0.4, 0.9],
            lambda2: vec![0.1, 0.4, 0.9],
        }
    }
}

/// One point of the grid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepParams {
    pub learning_rate: f64,
    pub batch_size: usize,
    pub lambda1: f64,
    pub lambda2: f64,
}

impl SweepParams {
    /// Base configuration with this point's values
    pub fn apply(&self, base: &Config) -> Config {
        let mut config = base.clone();
        config.training.learning_rate = self.learning_rate;
        config.training.batch_size = self.batch_size;
        config.training.lambda1 = self.lambda1;
        config.training.lambda2 = self.lambda2;
        config
    }
}

impl SweepGrid {
    /// All grid points, learning rate varying slowest
    pub fn combinations(&self) -> Vec<SweepParams> {
        let mut points = Vec::with_capacity(self.len());
        for &learning_rate in &self.learning_rate {
            for &batch_size in &self.batch_size {
                for &lambda1 in &self.lambda1 {
                    for &lambda2 in &self.lambda2 {
                        points.push(SweepParams {
                            learning_rate,
                            batch_size,
                            lambda1,
                            lambda2,
                        });
                    }
                }
            }
        }
        points
    }

    /// Number of grid points
    pub fn len(&self) -> usize {
        self.learning_rate.len() * self.batch_size.len() * self.lambda1.len() * self.lambda2.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of one sweep run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepResult {
    pub params: SweepParams,
    pub best_val_accuracy: f64,
    pub best_epoch: Option<usize>,
    pub run_dir: String,
}

/// Train once per grid point
pub fn run_sweep(
    base: &Config,
    grid: &SweepGrid,
    train: &LabeledEmbeddings,
    val: &LabeledEmbeddings,
) -> Result<Vec<SweepResult>> {
    if grid.is_empty() {
        return Err(Error::ConfigError("sweep grid has an empty axis".to_string()));
    }

    let total = grid.len();
    std::fs::create_dir_all(&base.output.results_dir)?;
    let summary = base.output.results_dir.join(SWEEP_RESULTS_FILE);
    let mut results = Vec::with_capacity(total);
    for (idx, params) in grid.combinations().into_iter().enumerate() {
        info!(
            "Sweep run {}/{}: lr={} batch_size={} lambda1={} lambda2={}",
            idx + 1,
            total,
            params.learning_rate,
            params.batch_size,
            params.lambda1,
            params.lambda2
        );
        let config = params.apply(base);
        let outcome = pipeline::train(&config, train, val)?;
        results.push(SweepResult {
            params,
            best_val_accuracy: outcome.state.best_val_accuracy,
            best_epoch: outcome.state.best_epoch,
            run_dir: outcome.run_dir.path().display().to_string(),
        });
        save_results(&results, &summary)?;
    }

    if let Some(best) = best_result(&results) {
        info!(
            "Best sweep run: {:?} with val acc {:.4} in {}",
            best.params, best.best_val_accuracy, best.run_dir
        );
    }
    Ok(results)
}

/// Write sweep results as pretty JSON, replacing the file atomically
pub fn save_results<P: AsRef<Path>>(results: &[SweepResult], path: P) -> Result<()> {
    let path = path.as_ref();
    let tmp: PathBuf = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_string_pretty(results)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read sweep results written by [`save_results`]
pub fn load_results<P: AsRef<Path>>(path: P) -> Result<Vec<SweepResult>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Run with the highest validation accuracy; later runs win ties
pub fn best_result(results: &[SweepResult]) -> Option<&SweepResult> {
    results
        .iter()
        .fold(None, |best: Option<&SweepResult>, r| match best {
            Some(b) if b.best_val_accuracy > r.best_val_accuracy => Some(b),
            _ => Some(r),
        })
}
