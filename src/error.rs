//! Error types for the prototype network library

use thiserror::Error;

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration, detected before any training starts
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Distance or loss inputs with incompatible shapes
    #[error("Shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeError {
        context: &'static str,
        expected: String,
        actual: String,
    },

    /// No trained checkpoint available for evaluation
    #[error("No trained checkpoint found at {0}")]
    MissingCheckpoint(String),

    /// A loss term became NaN or infinite
    #[error("Non-finite {term} loss ({value}) at epoch {epoch}")]
    NumericDegeneracy {
        term: &'static str,
        value: f64,
        epoch: usize,
    },

    /// Malformed or insufficient dataset
    #[error("Data error: {0}")]
    DataError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
}

impl Error {
    /// Build a shape error from anything displayable
    pub fn shape(
        context: &'static str,
        expected: impl std::fmt::Display,
        actual: impl std::fmt::Display,
    ) -> Self {
        Error::ShapeError {
            context,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Whether the error was raised by configuration validation
    pub fn is_config(&self) -> bool {
        matches!(self, Error::ConfigError(_))
    }
}
