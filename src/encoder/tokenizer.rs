//! Word tokenizer and vocabulary

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Words, numbers and contractions; punctuation is dropped
static WORD_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}]+(?:'[\p{L}]+)?").unwrap());

/// Id reserved for tokens never seen while building the vocabulary
pub const UNK_ID: u32 = 0;
/// Surface form of [`UNK_ID`]
pub const UNK_TOKEN: &str = "[UNK]";

/// Lowercasing word tokenizer
#[derive(Debug, Clone)]
pub struct Tokenizer {
    /// Keep original casing
    preserve_case: bool,
}

impl Tokenizer {
    pub fn new() -> Self {
        Self {
            preserve_case: false,
        }
    }

    /// Keep original casing
    pub fn preserve_case(mut self, preserve: bool) -> Self {
        self.preserve_case = preserve;
        self
    }

    /// Split a text into word tokens
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        WORD_REGEX
            .find_iter(text)
            .map(|m| {
                if self.preserve_case {
                    m.as_str().to_string()
                } else {
                    m.as_str().to_lowercase()
                }
            })
            .collect()
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Bidirectional token <-> id mapping
#[derive(Debug, Clone)]
pub struct Vocabulary {
    token2id: HashMap<String, u32>,
    id2token: Vec<String>,
}

impl Vocabulary {
    pub fn new() -> Self {
        Self {
            token2id: HashMap::new(),
            id2token: vec![UNK_TOKEN.to_string()],
        }
    }

    /// Add a token, returning its id
    pub fn insert(&mut self, token: &str) -> u32 {
        if let Some(&id) = self.token2id.get(token) {
            return id;
        }
        let id = self.id2token.len() as u32;
        self.token2id.insert(token.to_string(), id);
        self.id2token.push(token.to_string());
        id
    }

    /// Id of a token, [`UNK_ID`] when unknown
    pub fn id(&self, token: &str) -> u32 {
        self.token2id.get(token).copied().unwrap_or(UNK_ID)
    }

    /// Surface form of an id, [`UNK_TOKEN`] when out of range
    pub fn token(&self, id: u32) -> &str {
        self.id2token
            .get(id as usize)
            .map(String::as_str)
            .unwrap_or(UNK_TOKEN)
    }

    /// Number of entries, the unknown token included
    pub fn len(&self) -> usize {
        self.id2token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id2token.len() <= 1
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::new()
    }
}
