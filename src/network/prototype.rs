//! Learnable prototype layer
//!
//! Owns the prototype tensor `[P, proto_size * dim]`. A prototype is compared
//! with every window of `proto_size` consecutive token vectors of an example
//! and the closest window defines the example-to-prototype distance. For
//! sentence-level embeddings the window is the whole (single-token) example.

use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::distance::DistanceFunction;
use super::ModelKind;
use crate::encoder::EmbeddingSet;
use crate::error::{Error, Result};

/// Stabilizer of the log-similarity activation
const LOG_SIMILARITY_EPS: f64 = 1e-4;

/// Distances of a set of examples to every prototype
#[derive(Debug, Clone)]
pub struct PrototypeActivations {
    /// `[examples, P]` distance matrix
    pub distances: Array2<f64>,
    /// `[examples, P]` start token of the closest window
    pub window_starts: Array2<usize>,
}

impl PrototypeActivations {
    pub fn num_examples(&self) -> usize {
        self.distances.nrows()
    }

    pub fn num_prototypes(&self) -> usize {
        self.distances.ncols()
    }
}

/// Prototype layer shared by all scorer variants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrototypeLayer {
    kind: ModelKind,
    distance_fn: DistanceFunction,
    /// Token vectors per prototype
    proto_size: usize,
    /// Dimension of one token vector
    embed_dim: usize,
    /// Prototype tensor `[P, proto_size * embed_dim]`
    prototypes: Array2<f64>,
}

impl PrototypeLayer {
    /// Create a layer with prototypes drawn uniformly from `[0, 1)`
    pub fn new<R: Rng>(
        kind: ModelKind,
        distance_fn: DistanceFunction,
        num_prototypes: usize,
        proto_size: usize,
        embed_dim: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if num_prototypes == 0 {
            return Err(Error::ConfigError("num_prototypes must be positive".to_string()));
        }
        if proto_size == 0 || embed_dim == 0 {
            return Err(Error::ConfigError(
                "proto_size and embedding dimension must be positive".to_string(),
            ));
        }
        let prototypes =
            Array2::from_shape_fn((num_prototypes, proto_size * embed_dim), |_| rng.gen::<f64>());
        Ok(Self {
            kind,
            distance_fn,
            proto_size,
            embed_dim,
            prototypes,
        })
    }

    /// Layer without prototypes, used by the baseline; every input maps to an
    /// empty `[examples, 0]` distance matrix
    pub fn empty(kind: ModelKind, embed_dim: usize) -> Result<Self> {
        if embed_dim == 0 {
            return Err(Error::ConfigError("embedding dimension must be positive".to_string()));
        }
        Ok(Self {
            kind,
            distance_fn: DistanceFunction::default(),
            proto_size: 1,
            embed_dim,
            prototypes: Array2::zeros((0, embed_dim)),
        })
    }

    /// Create a layer from explicit prototype vectors
    pub fn from_prototypes(
        kind: ModelKind,
        distance_fn: DistanceFunction,
        proto_size: usize,
        prototypes: Array2<f64>,
    ) -> Result<Self> {
        if proto_size == 0 || prototypes.ncols() % proto_size != 0 || prototypes.nrows() == 0 {
            return Err(Error::shape(
                "prototype tensor",
                format!("[P > 0, multiple of {}]", proto_size),
                format!("{:?}", prototypes.dim()),
            ));
        }
        let embed_dim = prototypes.ncols() / proto_size;
        Ok(Self {
            kind,
            distance_fn,
            proto_size,
            embed_dim,
            prototypes,
        })
    }

    pub fn num_prototypes(&self) -> usize {
        self.prototypes.nrows()
    }

    pub fn proto_size(&self) -> usize {
        self.proto_size
    }

    pub fn embed_dim(&self) -> usize {
        self.embed_dim
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn prototypes(&self) -> &Array2<f64> {
        &self.prototypes
    }

    pub fn prototypes_mut(&mut self) -> &mut Array2<f64> {
        &mut self.prototypes
    }

    fn check_input(&self, embeddings: &EmbeddingSet) -> Result<()> {
        if embeddings.dim() != self.embed_dim {
            return Err(Error::shape("prototype layer input dim", self.embed_dim, embeddings.dim()));
        }
        if embeddings.seq_len() < self.proto_size {
            return Err(Error::shape(
                "prototype layer sequence length",
                format!(">= {}", self.proto_size),
                embeddings.seq_len(),
            ));
        }
        Ok(())
    }

    /// Distance of one flattened window to one prototype
    fn window_distance(&self, window: ArrayView1<f64>, prototype: ArrayView1<f64>) -> f64 {
        match self.kind {
            ModelKind::PConv => {
                // ||x||^2 - 2<x, p> + ||p||^2, clamped against cancellation
                let cross = window.dot(&prototype);
                (window.dot(&window) - 2.0 * cross + prototype.dot(&prototype)).max(0.0)
            }
            ModelKind::Dist | ModelKind::PDist | ModelKind::Baseline => self.distance_fn.compute(window, prototype),
        }
    }

    /// Gradient of `window_distance` with respect to the prototype
    fn window_gradient(&self, window: ArrayView1<f64>, prototype: ArrayView1<f64>) -> Array1<f64> {
        match self.kind {
            ModelKind::PConv => (&prototype - &window) * 2.0,
            ModelKind::Dist | ModelKind::PDist | ModelKind::Baseline => -self.distance_fn.gradient(window, prototype),
        }
    }

    /// Example-to-prototype distances `[examples, P]`
    pub fn forward(&self, embeddings: &EmbeddingSet) -> Result<PrototypeActivations> {
        self.check_input(embeddings)?;
        let p = self.num_prototypes();

        let rows: Vec<(Vec<f64>, Vec<usize>)> = (0..embeddings.len())
            .into_par_iter()
            .map(|i| {
                let mut best = vec![f64::INFINITY; p];
                let mut starts = vec![0usize; p];
                for start in 0..embeddings.window_count(i, self.proto_size) {
                    let window = embeddings.window(i, start, self.proto_size);
                    for (j, proto) in self.prototypes.outer_iter().enumerate() {
                        let d = self.window_distance(window.view(), proto);
                        if d < best[j] {
                            best[j] = d;
                            starts[j] = start;
                        }
                    }
                }
                (best, starts)
            })
            .collect();

        let mut distances = Array2::zeros((embeddings.len(), p));
        let mut window_starts = Array2::zeros((embeddings.len(), p));
        for (i, (best, starts)) in rows.into_iter().enumerate() {
            for j in 0..p {
                distances[[i, j]] = best[j];
                window_starts[[i, j]] = starts[j];
            }
        }

        Ok(PrototypeActivations {
            distances,
            window_starts,
        })
    }

    /// Gradient of `sum(grad_distances * distances)` with respect to the prototypes
    pub fn backward(
        &self,
        embeddings: &EmbeddingSet,
        activations: &PrototypeActivations,
        grad_distances: &Array2<f64>,
    ) -> Result<Array2<f64>> {
        let expected = (embeddings.len(), self.num_prototypes());
        if activations.distances.dim() != expected || grad_distances.dim() != expected {
            return Err(Error::shape(
                "prototype layer backward",
                format!("{:?}", expected),
                format!("{:?}", grad_distances.dim()),
            ));
        }

        let mut grad = Array2::zeros(self.prototypes.dim());
        for i in 0..embeddings.len() {
            for (j, proto) in self.prototypes.outer_iter().enumerate() {
                let g = grad_distances[[i, j]];
                if g == 0.0 {
                    continue;
                }
                let start = activations.window_starts[[i, j]];
                let window = embeddings.window(i, start, self.proto_size);
                let local = self.window_gradient(window.view(), proto) * g;
                let mut row = grad.row_mut(j);
                row += &local;
            }
        }
        Ok(grad)
    }

    /// Classifier features derived from the distance matrix
    pub fn features(&self, distances: &Array2<f64>) -> Array2<f64> {
        match self.kind {
            ModelKind::PConv => distances.mapv(|d| ((d + 1.0) / (d + LOG_SIMILARITY_EPS)).ln()),
            ModelKind::Dist | ModelKind::PDist | ModelKind::Baseline => distances.mapv(|d| -d),
        }
    }

    /// Backward pass of [`features`](Self::features)
    pub fn features_backward(&self, distances: &Array2<f64>, grad_features: &Array2<f64>) -> Array2<f64> {
        match self.kind {
            ModelKind::PConv => {
                let local = distances.mapv(|d| 1.0 / (d + 1.0) - 1.0 / (d + LOG_SIMILARITY_EPS));
                local * grad_features
            }
            ModelKind::Dist | ModelKind::PDist | ModelKind::Baseline => grad_features.mapv(|g| -g),
        }
    }
}
