//! Linear classifier head over prototype features

use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Bias-free linear map from `P` prototype features to class logits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierHead {
    /// Weight matrix `[P, num_classes]`
    weights: Array2<f64>,
}

impl ClassifierHead {
    /// Create a head with Xavier initialization
    pub fn new<R: Rng>(num_prototypes: usize, num_classes: usize, rng: &mut R) -> Result<Self> {
        if num_classes < 2 {
            return Err(Error::ConfigError(format!(
                "num_classes must be at least 2, got {}",
                num_classes
            )));
        }
        let std = (2.0 / (num_prototypes + num_classes) as f64).sqrt();
        let weights = Array2::from_shape_fn((num_prototypes, num_classes), |_| {
            rng.sample::<f64, _>(StandardNormal) * std
        });
        Ok(Self { weights })
    }

    /// Create a head from explicit weights `[P, num_classes]`
    pub fn from_weights(weights: Array2<f64>) -> Self {
        Self { weights }
    }

    pub fn num_classes(&self) -> usize {
        self.weights.ncols()
    }

    /// Weights `[P, num_classes]`; row `j` is the class contribution of prototype `j`
    pub fn weights(&self) -> &Array2<f64> {
        &self.weights
    }

    pub fn weights_mut(&mut self) -> &mut Array2<f64> {
        &mut self.weights
    }

    /// Logits `[N, num_classes]` from features `[N, P]`
    pub fn forward(&self, features: &Array2<f64>) -> Result<Array2<f64>> {
        if features.ncols() != self.weights.nrows() {
            return Err(Error::shape("classifier input", self.weights.nrows(), features.ncols()));
        }
        Ok(features.dot(&self.weights))
    }

    /// Gradients with respect to the weights and the input features
    pub fn backward(&self, features: &Array2<f64>, grad_logits: &Array2<f64>) -> (Array2<f64>, Array2<f64>) {
        let grad_weights = features.t().dot(grad_logits);
        let grad_features = grad_logits.dot(&self.weights.t());
        (grad_weights, grad_features)
    }
}

/// Arg-max class per row
pub fn predict(logits: &Array2<f64>) -> Vec<usize> {
    logits
        .axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (idx, &v)| if v > best.1 { (idx, v) } else { best })
                .0
        })
        .collect()
}

/// Row-wise softmax with max subtraction
pub fn softmax(logits: &Array2<f64>) -> Array2<f64> {
    let mut probs = logits.clone();
    for mut row in probs.axis_iter_mut(Axis(0)) {
        let max = row.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row /= sum;
    }
    probs
}

/// Cross-entropy weighted per class, mean over the batch weight mass
#[derive(Debug, Clone)]
pub struct WeightedCrossEntropy {
    class_weights: Array1<f64>,
}

impl WeightedCrossEntropy {
    pub fn new(class_weights: &[f64]) -> Self {
        Self {
            class_weights: Array1::from_vec(class_weights.to_vec()),
        }
    }

    /// Loss value and its gradient with respect to the logits
    pub fn forward(&self, logits: &Array2<f64>, labels: &[usize]) -> Result<(f64, Array2<f64>)> {
        if logits.nrows() != labels.len() {
            return Err(Error::shape("cross entropy labels", logits.nrows(), labels.len()));
        }
        if logits.ncols() != self.class_weights.len() {
            return Err(Error::shape(
                "cross entropy classes",
                self.class_weights.len(),
                logits.ncols(),
            ));
        }
        if let Some(&bad) = labels.iter().find(|&&l| l >= logits.ncols()) {
            return Err(Error::DataError(format!(
                "label {} out of range for {} classes",
                bad,
                logits.ncols()
            )));
        }

        let probs = softmax(logits);
        let total_weight: f64 = labels.iter().map(|&y| self.class_weights[y]).sum();

        let mut loss = 0.0;
        let mut grad = probs.clone();
        for (i, &y) in labels.iter().enumerate() {
            let w = self.class_weights[y];
            loss -= w * probs[[i, y]].max(f64::MIN_POSITIVE).ln();
            grad[[i, y]] -= 1.0;
            let mut row = grad.row_mut(i);
            row *= w / total_weight;
        }

        Ok((loss / total_weight, grad))
    }
}
