//! # Prototype Networks for Text Classification
//!
//! This crate provides interpretable text classifiers that score inputs by
//! their distance to a small set of learned prototype vectors. After
//! training, every prototype is projected onto its nearest training example
//! so the model's decisions can be read as "this text looks like that one".
//!
//! ## Modules
//!
//! - `encoder`: Frozen text encoder contract and a hashing implementation
//! - `network`: Distance metric, prototype layer, classifier head, model variants and the linear baseline
//! - `training`: R1/R2 loss, AdamW, data-parallel steps, epoch loop, checkpoints, sweep
//! - `projection`: Nearest-neighbor decoding of prototypes and the report file
//! - `data`: Review and toxicity TSV loading, stratified splits, class weights
//! - `pipeline`: `train` / `test` entry points and full sessions
//! - `utils`: Configuration, logging and metrics
//!
//! ## Example
//!
//! ```no_run
//! use proto_nlp::{pipeline, Config, Dataset};
//!
//! fn main() -> proto_nlp::Result<()> {
//!     let config = Config::default();
//!     let dataset = Dataset::parse_tsv("1\tgreat movie\n0\tdull plot\n")?;
//!
//!     let encoder = pipeline::build_encoder(&config)?;
//!     let split = pipeline::encode_split(&encoder, &dataset)?;
//!     let outcome = pipeline::train(&config, &split.data, &split.data)?;
//!     println!("best val acc {:.3}", outcome.state.best_val_accuracy);
//!     Ok(())
//! }
//! ```

pub mod data;
pub mod encoder;
pub mod error;
pub mod network;
pub mod pipeline;
pub mod projection;
pub mod training;
pub mod utils;

// Re-export main types for convenience
pub use data::{DataSplits, Dataset, DatasetName};
pub use encoder::{EmbeddingSet, EncoderConfig, EncoderLevel, HashingEncoder, LabeledEmbeddings, TextEncoder};
pub use error::{Error, Result};
pub use network::{DistanceFunction, ModelKind, ProtoModel};
pub use projection::ProjectionRecord;
pub use training::{AdamW, Checkpoint, RunDirectory, Trainer, TrainingPhase, TrainingState};
pub use utils::{setup_logging, Config, Mode};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
