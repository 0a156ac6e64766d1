//! Neural network components for prototype text classifiers
//!
//! This module provides:
//! - Distance functions between encodings and prototypes
//! - The learnable prototype layer
//! - The linear classifier head and weighted cross-entropy
//! - `ProtoModel`, the prototype scorer combining both, or a plain linear
//!   baseline without prototypes

mod classifier;
mod distance;
mod model;
mod prototype;

pub use classifier::{predict, softmax, ClassifierHead, WeightedCrossEntropy};
pub use distance::DistanceFunction;
pub use model::{ForwardOutput, Gradients, ProtoModel};
pub use prototype::{PrototypeActivations, PrototypeLayer};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::encoder::EncoderLevel;

/// Prototype scorer variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum ModelKind {
    /// Sentence embedding prototypes, features are negative distances
    #[serde(rename = "dist")]
    #[value(name = "dist")]
    Dist,
    /// Token-window prototypes, features are negative distances
    #[serde(rename = "p_dist")]
    #[value(name = "p_dist")]
    PDist,
    /// Token-window prototypes scored in convolution form with log-similarity features
    #[serde(rename = "p_conv")]
    #[value(name = "p_conv")]
    PConv,
    /// No prototypes: linear head directly on sentence embeddings, trained on
    /// cross-entropy alone
    #[serde(rename = "baseline")]
    #[value(name = "baseline")]
    Baseline,
}

impl Default for ModelKind {
    fn default() -> Self {
        Self::Dist
    }
}

impl ModelKind {
    /// Whether prototypes live in token-window space
    pub fn is_token_level(&self) -> bool {
        matches!(self, ModelKind::PDist | ModelKind::PConv)
    }

    /// Whether the variant learns prototypes (and so has R1/R2 terms and a projection)
    pub fn has_prototypes(&self) -> bool {
        !matches!(self, ModelKind::Baseline)
    }

    /// Encoder granularity this variant consumes
    pub fn encoder_level(&self) -> EncoderLevel {
        if self.is_token_level() {
            EncoderLevel::Token
        } else {
            EncoderLevel::Sentence
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Dist => "dist",
            ModelKind::PDist => "p_dist",
            ModelKind::PConv => "p_conv",
            ModelKind::Baseline => "baseline",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dist" => Ok(ModelKind::Dist),
            "p_dist" => Ok(ModelKind::PDist),
            "p_conv" => Ok(ModelKind::PConv),
            "baseline" => Ok(ModelKind::Baseline),
            other => Err(crate::error::Error::ConfigError(format!(
                "unsupported model variant '{}', expected one of dist, p_dist, p_conv, baseline",
                other
            ))),
        }
    }
}
