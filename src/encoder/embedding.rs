//! Fixed embeddings of a dataset split
//!
//! Every encoder produces a 3D tensor `[examples, tokens, dim]`.
//! Sentence-level encoders use a single token slot per example.

use ndarray::{s, Array1, Array2, Array3, ArrayView2, Axis};

use crate::error::{Error, Result};

/// Encoded split, immutable for the duration of a run
#[derive(Debug, Clone)]
pub struct EmbeddingSet {
    /// Token embeddings as 3D tensor: (examples, max_tokens, dim)
    tokens: Array3<f64>,
    /// Number of real (non-padding) tokens per example
    lengths: Vec<usize>,
}

impl EmbeddingSet {
    /// Create from a padded token tensor and the real length of each example
    pub fn new(tokens: Array3<f64>, lengths: Vec<usize>) -> Result<Self> {
        let (n, t, _) = tokens.dim();
        if lengths.len() != n {
            return Err(Error::shape("embedding lengths", n, lengths.len()));
        }
        if let Some(&bad) = lengths.iter().find(|&&l| l > t) {
            return Err(Error::shape("embedding lengths", format!("<= {}", t), bad));
        }
        Ok(Self { tokens, lengths })
    }

    /// Sentence-level embeddings `[n, dim]`, one token slot per example
    pub fn from_vectors(vectors: Array2<f64>) -> Self {
        let n = vectors.nrows();
        Self {
            tokens: vectors.insert_axis(Axis(1)),
            lengths: vec![1; n],
        }
    }

    /// Number of examples
    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    /// Check if the set is empty
    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    /// Padded token count
    pub fn seq_len(&self) -> usize {
        self.tokens.dim().1
    }

    /// Embedding dimension of a single token
    pub fn dim(&self) -> usize {
        self.tokens.dim().2
    }

    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    pub fn tokens(&self) -> &Array3<f64> {
        &self.tokens
    }

    /// Sentence vectors `[n, dim]`; only defined for single-slot embeddings
    pub fn sentence_vectors(&self) -> Result<Array2<f64>> {
        if self.seq_len() != 1 {
            return Err(Error::shape("sentence embeddings token slots", 1, self.seq_len()));
        }
        Ok(self.tokens.index_axis(Axis(1), 0).to_owned())
    }

    /// Token matrix `[seq_len, dim]` of one example, padding included
    pub fn example(&self, index: usize) -> ArrayView2<f64> {
        self.tokens.index_axis(Axis(0), index)
    }

    /// Number of window start positions of width `window` for an example.
    ///
    /// Examples shorter than the window still expose one window that runs
    /// into the padding.
    pub fn window_count(&self, index: usize, window: usize) -> usize {
        let len = self.lengths[index];
        if len >= window {
            len - window + 1
        } else {
            1
        }
    }

    /// Flattened window of `window` consecutive tokens starting at `start`
    pub fn window(&self, index: usize, start: usize, window: usize) -> Array1<f64> {
        self.tokens
            .slice(s![index, start..start + window, ..])
            .iter()
            .cloned()
            .collect()
    }

    /// Copy of the selected examples, in the given order
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            tokens: self.tokens.select(Axis(0), indices),
            lengths: indices.iter().map(|&i| self.lengths[i]).collect(),
        }
    }

    /// Copy of a contiguous range of examples
    pub fn slice_rows(&self, start: usize, end: usize) -> Self {
        Self {
            tokens: self.tokens.slice(s![start..end, .., ..]).to_owned(),
            lengths: self.lengths[start..end].to_vec(),
        }
    }
}

/// Embeddings paired with their labels
///
/// Selection always moves an embedding together with its label.
#[derive(Debug, Clone)]
pub struct LabeledEmbeddings {
    pub embeddings: EmbeddingSet,
    pub labels: Vec<usize>,
}

impl LabeledEmbeddings {
    pub fn new(embeddings: EmbeddingSet, labels: Vec<usize>) -> Result<Self> {
        if embeddings.len() != labels.len() {
            return Err(Error::shape("labeled embeddings", embeddings.len(), labels.len()));
        }
        Ok(Self { embeddings, labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Batch of the given example indices, pairs kept aligned
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            embeddings: self.embeddings.select(indices),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_from_vectors() {
        let set = EmbeddingSet::from_vectors(array![[1.0, 0.0], [0.0, 1.0], [0.5, 0.5]]);
        assert_eq!(set.len(), 3);
        assert_eq!(set.seq_len(), 1);
        assert_eq!(set.dim(), 2);
        assert_eq!(set.window_count(0, 1), 1);
        assert_eq!(set.window(1, 0, 1), array![0.0, 1.0]);
    }

    #[test]
    fn test_windows() {
        let tokens = Array3::from_shape_fn((2, 4, 2), |(i, t, d)| (i * 100 + t * 10 + d) as f64);
        let set = EmbeddingSet::new(tokens, vec![4, 1]).unwrap();

        assert_eq!(set.window_count(0, 2), 3);
        assert_eq!(set.window_count(1, 2), 1);
        assert_eq!(set.window(0, 1, 2), array![10.0, 11.0, 20.0, 21.0]);
    }

    #[test]
    fn test_sentence_vectors() {
        let set = EmbeddingSet::from_vectors(array![[1.0, 2.0], [3.0, 4.0]]);
        assert_eq!(set.sentence_vectors().unwrap(), array![[1.0, 2.0], [3.0, 4.0]]);

        let tokens = EmbeddingSet::new(Array3::zeros((1, 3, 2)), vec![3]).unwrap();
        assert!(tokens.sentence_vectors().is_err());
    }

    #[test]
    fn test_rejects_bad_lengths() {
        let tokens = Array3::zeros((2, 3, 2));
        assert!(EmbeddingSet::new(tokens.clone(), vec![1]).is_err());
        assert!(EmbeddingSet::new(tokens, vec![1, 4]).is_err());
    }

    #[test]
    fn test_select_keeps_pairs() {
        let set = EmbeddingSet::from_vectors(array![[0.0], [1.0], [2.0], [3.0]]);
        let labeled = LabeledEmbeddings::new(set, vec![0, 1, 0, 1]).unwrap();

        let batch = labeled.select(&[3, 0, 2]);
        assert_eq!(batch.labels, vec![1, 0, 0]);
        assert_eq!(batch.embeddings.window(0, 0, 1)[0], 3.0);
        assert_eq!(batch.embeddings.window(2, 0, 1)[0], 2.0);
    }
}
