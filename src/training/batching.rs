//! Mini-batch iteration over a fixed embedding split

use rand::seq::SliceRandom;
use rand::Rng;

/// Index batches over `dataset_size` examples
///
/// Batches are index lists into the split; selecting embeddings and labels
/// with the same list keeps every (embedding, label) pair aligned.
pub struct DataLoader {
    indices: Vec<usize>,
    batch_size: usize,
    current_pos: usize,
}

impl DataLoader {
    /// Sequential loader
    pub fn new(dataset_size: usize, batch_size: usize) -> Self {
        Self {
            indices: (0..dataset_size).collect(),
            batch_size: batch_size.max(1),
            current_pos: 0,
        }
    }

    /// Loader over a random permutation of the split
    pub fn shuffled<R: Rng>(dataset_size: usize, batch_size: usize, rng: &mut R) -> Self {
        let mut loader = Self::new(dataset_size, batch_size);
        loader.indices.shuffle(rng);
        loader
    }

    /// Get number of batches; the last one may be smaller
    pub fn num_batches(&self) -> usize {
        (self.indices.len() + self.batch_size - 1) / self.batch_size
    }
}

impl Iterator for DataLoader {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_pos >= self.indices.len() {
            return None;
        }

        let end = (self.current_pos + self.batch_size).min(self.indices.len());
        let batch = self.indices[self.current_pos..end].to_vec();
        self.current_pos = end;

        Some(batch)
    }
}
