//! Prototype scorer: prototype layer followed by the classifier head
//!
//! The baseline variant keeps an empty prototype layer and feeds the sentence
//! embeddings straight into the head.

use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::classifier::ClassifierHead;
use super::distance::DistanceFunction;
use super::prototype::{PrototypeActivations, PrototypeLayer};
use super::ModelKind;
use crate::encoder::EmbeddingSet;
use crate::error::{Error, Result};

/// Output of a forward pass over a batch
#[derive(Debug, Clone)]
pub struct ForwardOutput {
    /// Example-to-prototype distances and closest windows
    pub activations: PrototypeActivations,
    /// Classifier features `[N, P]` (`[N, dim]` for the baseline)
    pub features: Array2<f64>,
    /// Class logits `[N, C]`
    pub logits: Array2<f64>,
}

/// Parameter gradients of a [`ProtoModel`]
#[derive(Debug, Clone, PartialEq)]
pub struct Gradients {
    pub prototypes: Array2<f64>,
    pub head: Array2<f64>,
}

impl Gradients {
    /// All-zero gradients shaped like the model parameters
    pub fn zeros_like(model: &ProtoModel) -> Self {
        Self {
            prototypes: Array2::zeros(model.layer.prototypes().dim()),
            head: Array2::zeros(model.head.weights().dim()),
        }
    }

    /// Sum another gradient set into this one
    pub fn accumulate(&mut self, other: &Gradients) {
        self.prototypes += &other.prototypes;
        self.head += &other.head;
    }
}

/// Interpretable prototype classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtoModel {
    layer: PrototypeLayer,
    head: ClassifierHead,
}

impl ProtoModel {
    /// Randomly initialized model
    pub fn new<R: Rng>(
        kind: ModelKind,
        distance_fn: DistanceFunction,
        num_prototypes: usize,
        proto_size: usize,
        embed_dim: usize,
        num_classes: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if !kind.has_prototypes() {
            let layer = PrototypeLayer::empty(kind, embed_dim)?;
            let head = ClassifierHead::new(embed_dim, num_classes, rng)?;
            return Ok(Self { layer, head });
        }
        let layer = PrototypeLayer::new(kind, distance_fn, num_prototypes, proto_size, embed_dim, rng)?;
        let head = ClassifierHead::new(num_prototypes, num_classes, rng)?;
        Ok(Self { layer, head })
    }

    /// Assemble a model from its parts
    pub fn from_parts(layer: PrototypeLayer, head: ClassifierHead) -> Result<Self> {
        let inputs = if layer.kind().has_prototypes() {
            layer.num_prototypes()
        } else {
            layer.embed_dim()
        };
        if inputs != head.weights().nrows() {
            return Err(Error::shape("classifier head rows", inputs, head.weights().nrows()));
        }
        Ok(Self { layer, head })
    }

    pub fn kind(&self) -> ModelKind {
        self.layer.kind()
    }

    pub fn layer(&self) -> &PrototypeLayer {
        &self.layer
    }

    pub fn head(&self) -> &ClassifierHead {
        &self.head
    }

    pub fn num_prototypes(&self) -> usize {
        self.layer.num_prototypes()
    }

    pub fn num_classes(&self) -> usize {
        self.head.num_classes()
    }

    /// Prototype vectors `[P, proto_size * dim]`
    pub fn prototypes(&self) -> &Array2<f64> {
        self.layer.prototypes()
    }

    /// Classifier weights `[P, C]` (`[dim, C]` for the baseline)
    pub fn prototype_weights(&self) -> &Array2<f64> {
        self.head.weights()
    }

    /// Forward pass over a batch
    pub fn forward(&self, embeddings: &EmbeddingSet) -> Result<ForwardOutput> {
        let activations = self.layer.forward(embeddings)?;
        let features = if self.kind().has_prototypes() {
            self.layer.features(&activations.distances)
        } else {
            embeddings.sentence_vectors()?
        };
        let logits = self.head.forward(&features)?;
        Ok(ForwardOutput {
            activations,
            features,
            logits,
        })
    }

    /// Prototype-to-pool distances, `[pool, P]`
    pub fn pool_distances(&self, pool: &EmbeddingSet) -> Result<PrototypeActivations> {
        self.layer.forward(pool)
    }

    /// Backward pass for one batch.
    ///
    /// `grad_logits` comes from the classification loss and
    /// `grad_distances` from any loss defined directly on the batch distance
    /// matrix (the R1 term).
    pub fn backward(
        &self,
        embeddings: &EmbeddingSet,
        output: &ForwardOutput,
        grad_logits: &Array2<f64>,
        grad_distances: &Array2<f64>,
    ) -> Result<Gradients> {
        if grad_logits.dim() != output.logits.dim() {
            return Err(Error::shape(
                "logit gradient",
                format!("{:?}", output.logits.dim()),
                format!("{:?}", grad_logits.dim()),
            ));
        }
        let (grad_head, grad_features) = self.head.backward(&output.features, grad_logits);
        if !self.kind().has_prototypes() {
            return Ok(Gradients {
                prototypes: Array2::zeros(self.layer.prototypes().dim()),
                head: grad_head,
            });
        }
        let total_distance_grad =
            self.layer.features_backward(&output.activations.distances, &grad_features) + grad_distances;
        let grad_prototypes = self
            .layer
            .backward(embeddings, &output.activations, &total_distance_grad)?;

        Ok(Gradients {
            prototypes: grad_prototypes,
            head: grad_head,
        })
    }

    /// Prototype gradient of a loss defined on the pool distance matrix (the R2 term)
    pub fn pool_backward(
        &self,
        pool: &EmbeddingSet,
        activations: &PrototypeActivations,
        grad_distances: &Array2<f64>,
    ) -> Result<Array2<f64>> {
        self.layer.backward(pool, activations, grad_distances)
    }

    /// Mutable parameter tensors, prototypes first
    pub fn parameters_mut(&mut self) -> [&mut Array2<f64>; 2] {
        [self.layer.prototypes_mut(), self.head.weights_mut()]
    }
}
