//! Caller-owned training progress

use serde::{Deserialize, Serialize};

use super::loss::LossBreakdown;

/// Phase of a training run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingPhase {
    Init,
    TrainingEpoch,
    Validating,
    Done,
}

/// Metrics of one training epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1-based epoch number
    pub epoch: usize,
    /// Mean of the per-batch losses
    pub loss: LossBreakdown,
    /// Balanced accuracy over all training predictions of the epoch
    pub train_accuracy: f64,
}

/// Metrics of one validation round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationMetrics {
    pub epoch: usize,
    pub loss: LossBreakdown,
    pub accuracy: f64,
    /// Whether this round produced a new checkpoint
    pub checkpointed: bool,
}

/// Progress of a run, threaded explicitly through the training loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingState {
    pub phase: TrainingPhase,
    /// Number of completed epochs
    pub epoch: usize,
    /// Best validation balanced accuracy seen so far
    pub best_val_accuracy: f64,
    /// Epoch of the current best checkpoint
    pub best_epoch: Option<usize>,
    pub history: Vec<EpochMetrics>,
    pub validations: Vec<ValidationMetrics>,
}

impl TrainingState {
    pub fn new() -> Self {
        Self {
            phase: TrainingPhase::Init,
            epoch: 0,
            best_val_accuracy: 0.0,
            best_epoch: None,
            history: Vec::new(),
            validations: Vec::new(),
        }
    }

    /// Whether a validation accuracy replaces the current best.
    ///
    /// Ties go to the later epoch.
    pub fn is_new_best(&self, accuracy: f64) -> bool {
        accuracy >= self.best_val_accuracy
    }

    /// Record a validation round, updating the watermark on a new best.
    ///
    /// Returns whether the round is the new best.
    pub fn record_validation(&mut self, epoch: usize, loss: LossBreakdown, accuracy: f64) -> bool {
        let best = self.is_new_best(accuracy);
        if best {
            self.best_val_accuracy = accuracy;
            self.best_epoch = Some(epoch);
        }
        self.validations.push(ValidationMetrics {
            epoch,
            loss,
            accuracy,
            checkpointed: best,
        });
        best
    }

    /// Record a finished training epoch
    pub fn record_epoch(&mut self, metrics: EpochMetrics) {
        self.epoch = metrics.epoch;
        self.history.push(metrics);
    }

    /// Whether the given 1-based epoch is followed by validation
    pub fn validation_due(epoch: usize, val_epoch: usize, num_epochs: usize) -> bool {
        epoch % val_epoch.max(1) == 0 || epoch == num_epochs
    }
}

impl Default for TrainingState {
    fn default() -> Self {
        Self::new()
    }
}
