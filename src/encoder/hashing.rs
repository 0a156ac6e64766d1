//! Frozen hashing encoder
//!
//! Every token is mapped to a fixed pseudo-random Gaussian vector seeded by a
//! hash of its surface form, so the same text always yields the same
//! embedding without any training. Sentence embeddings are the mean of their
//! token vectors.

use ndarray::{Array1, Array2, Array3};
use rand::prelude::*;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::embedding::EmbeddingSet;
use super::tokenizer::{Tokenizer, Vocabulary, UNK_ID};
use super::{EncoderLevel, TextEncoder};
use crate::error::{Error, Result};

/// Configuration for the hashing encoder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Dimension of each token vector
    pub dim: usize,
    /// Texts are truncated to this many tokens
    pub max_tokens: usize,
    /// Seed mixed into every token hash
    pub seed: u64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            dim: 64,
            max_tokens: 64,
            seed: 0,
        }
    }
}

/// Deterministic text encoder backed by token hashing
#[derive(Debug, Clone)]
pub struct HashingEncoder {
    config: EncoderConfig,
    level: EncoderLevel,
    /// Minimum padded length for token-level output
    min_tokens: usize,
    tokenizer: Tokenizer,
    vocab: Vocabulary,
}

impl HashingEncoder {
    /// Create an encoder; `min_tokens` pads token-level output to at least
    /// one prototype window
    pub fn new(config: EncoderConfig, level: EncoderLevel, min_tokens: usize) -> Result<Self> {
        if config.dim == 0 {
            return Err(Error::ConfigError("encoder dim must be positive".to_string()));
        }
        if config.max_tokens == 0 {
            return Err(Error::ConfigError("encoder max_tokens must be positive".to_string()));
        }
        Ok(Self {
            config,
            level,
            min_tokens: min_tokens.max(1),
            tokenizer: Tokenizer::new(),
            vocab: Vocabulary::new(),
        })
    }

    /// Register the tokens of a corpus so they can be decoded later
    pub fn fit(&mut self, texts: &[String]) {
        for text in texts {
            for token in self.truncated_tokens(text) {
                self.vocab.insert(&token);
            }
        }
        debug!("Encoder vocabulary size: {}", self.vocab.len());
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    fn truncated_tokens(&self, text: &str) -> Vec<String> {
        let mut tokens = self.tokenizer.tokenize(text);
        tokens.truncate(self.config.max_tokens);
        tokens
    }

    /// Fixed vector of a single token
    pub fn token_vector(&self, token: &str) -> Array1<f64> {
        let seed = self.config.seed ^ fnv1a(token.as_bytes());
        let mut rng = StdRng::seed_from_u64(seed);
        let std = 1.0 / (self.config.dim as f64).sqrt();
        Array1::from_shape_fn(self.config.dim, |_| rng.sample::<f64, _>(StandardNormal) * std)
    }

    fn encode_sentences(&self, texts: &[String]) -> EmbeddingSet {
        let rows: Vec<Array1<f64>> = texts
            .par_iter()
            .map(|text| {
                let tokens = self.truncated_tokens(text);
                let mut sum = Array1::zeros(self.config.dim);
                for token in &tokens {
                    sum += &self.token_vector(token);
                }
                if !tokens.is_empty() {
                    sum /= tokens.len() as f64;
                }
                sum
            })
            .collect();

        let mut vectors = Array2::zeros((texts.len(), self.config.dim));
        for (mut row, vector) in vectors.outer_iter_mut().zip(rows) {
            row.assign(&vector);
        }
        EmbeddingSet::from_vectors(vectors)
    }

    fn encode_tokens(&self, texts: &[String]) -> Result<EmbeddingSet> {
        let tokenized: Vec<Vec<String>> = texts.iter().map(|t| self.truncated_tokens(t)).collect();
        let seq_len = tokenized
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(0)
            .max(self.min_tokens);

        let mut tensor = Array3::zeros((texts.len(), seq_len, self.config.dim));
        for (i, tokens) in tokenized.iter().enumerate() {
            for (t, token) in tokens.iter().enumerate() {
                tensor
                    .slice_mut(ndarray::s![i, t, ..])
                    .assign(&self.token_vector(token));
            }
        }
        let lengths = tokenized.iter().map(Vec::len).collect();
        EmbeddingSet::new(tensor, lengths)
    }
}

impl TextEncoder for HashingEncoder {
    fn level(&self) -> EncoderLevel {
        self.level
    }

    fn dim(&self) -> usize {
        self.config.dim
    }

    fn encode(&self, texts: &[String]) -> Result<EmbeddingSet> {
        match self.level {
            EncoderLevel::Sentence => Ok(self.encode_sentences(texts)),
            EncoderLevel::Token => self.encode_tokens(texts),
        }
    }

    fn tokenize(&self, texts: &[String]) -> Vec<Vec<u32>> {
        texts
            .iter()
            .map(|text| {
                self.truncated_tokens(text)
                    .iter()
                    .map(|token| self.vocab.id(token))
                    .collect()
            })
            .collect()
    }

    fn decode(&self, ids: &[u32]) -> String {
        ids.iter()
            .map(|&id| self.vocab.token(id))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// 64-bit FNV-1a
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, &b| (hash ^ b as u64).wrapping_mul(PRIME))
}

/// Whether an id sequence contains tokens missing from the vocabulary
pub fn has_unknown(ids: &[u32]) -> bool {
    ids.contains(&UNK_ID)
}
