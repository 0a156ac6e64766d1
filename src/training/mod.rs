//! Training module
//!
//! This module provides:
//! - The R1/R2 interpretability loss and the combined objective
//! - AdamW optimization and mini-batch iteration
//! - Data-parallel forward/backward with a single synchronized step
//! - The epoch loop with validation and best-model checkpointing
//! - Hyperparameter grid search

mod batching;
mod checkpoint;
mod loss;
mod optimizer;
mod parallel;
mod state;
mod sweep;
mod trainer;

pub use batching::DataLoader;
pub use checkpoint::{Checkpoint, RunDirectory, CHECKPOINT_FILE, REPORT_FILE, RUN_NAME_FORMAT};
pub use loss::{InterpretabilityLoss, LossAccumulator, LossBreakdown, LossWeights, Regularizer};
pub use optimizer::AdamW;
pub use parallel::{DataParallel, ReplicaPlan, ReplicatedBatch};
pub use state::{EpochMetrics, TrainingPhase, TrainingState, ValidationMetrics};
pub use sweep::{best_result, load_results, run_sweep, save_results, SweepGrid, SweepParams, SweepResult, SWEEP_RESULTS_FILE};
pub use trainer::{evaluate, Evaluation, Trainer};
