//! Text encoding collaborator
//!
//! This module provides:
//! - The `TextEncoder` contract consumed by training and projection
//! - Fixed per-split embeddings (`EmbeddingSet`)
//! - A deterministic hashing encoder with a word tokenizer

mod embedding;
mod hashing;
mod tokenizer;

pub use embedding::{EmbeddingSet, LabeledEmbeddings};
pub use hashing::{has_unknown, EncoderConfig, HashingEncoder};
pub use tokenizer::{Tokenizer, Vocabulary, UNK_ID, UNK_TOKEN};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Granularity of the encoder output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderLevel {
    /// One vector per text
    Sentence,
    /// One vector per token
    Token,
}

/// Opaque text-to-vector encoder
pub trait TextEncoder: Sync {
    /// Whether `encode` yields one vector per text or per token
    fn level(&self) -> EncoderLevel;

    /// Dimension of a single output vector
    fn dim(&self) -> usize;

    /// Encode a batch of texts
    fn encode(&self, texts: &[String]) -> Result<EmbeddingSet>;

    /// Token ids per text, aligned with the token positions of `encode`
    fn tokenize(&self, texts: &[String]) -> Vec<Vec<u32>>;

    /// Text of a token id sequence
    fn decode(&self, ids: &[u32]) -> String;
}
