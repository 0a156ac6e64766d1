//! Utility module
//!
//! This module provides:
//! - Configuration management
//! - Logging setup
//! - Classification metrics

pub mod config;
mod logging;
pub mod metrics;

pub use config::{Config, DataConfig, LoggingConfig, Mode, ModelConfig, OutputConfig, PoolStrategy, TrainingConfig};
pub use logging::setup_logging;
pub use metrics::{balanced_accuracy, confusion_matrix, per_class_recall};
