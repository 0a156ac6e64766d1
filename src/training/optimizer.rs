//! AdamW optimizer
//!
//! Adam with decoupled weight decay. Moment estimates are kept per parameter
//! tensor and serialized with checkpoints.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// First and second moment estimates of one parameter tensor
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Moments {
    m: Array2<f64>,
    v: Array2<f64>,
}

/// AdamW optimizer state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdamW {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    pub weight_decay: f64,
    /// Number of steps taken
    step: u64,
    moments: Vec<Moments>,
}

impl AdamW {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay: 0.01,
            step: 0,
            moments: Vec::new(),
        }
    }

    pub fn with_weight_decay(mut self, weight_decay: f64) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    /// Number of steps taken so far
    pub fn steps(&self) -> u64 {
        self.step
    }

    /// Apply one update to every parameter tensor.
    ///
    /// Parameters and gradients are matched by position and must keep the
    /// same order and shapes across calls.
    pub fn step(&mut self, params: &mut [&mut Array2<f64>], grads: &[&Array2<f64>]) -> Result<()> {
        if params.len() != grads.len() {
            return Err(Error::shape("optimizer tensors", params.len(), grads.len()));
        }
        for (idx, (param, grad)) in params.iter().zip(grads).enumerate() {
            if param.dim() != grad.dim() {
                return Err(Error::shape(
                    "optimizer gradient",
                    format!("tensor {} {:?}", idx, param.dim()),
                    format!("{:?}", grad.dim()),
                ));
            }
        }
        if self.moments.is_empty() {
            self.moments = params
                .iter()
                .map(|p| Moments {
                    m: Array2::zeros(p.dim()),
                    v: Array2::zeros(p.dim()),
                })
                .collect();
        } else if self.moments.len() != params.len() {
            return Err(Error::shape("optimizer state", self.moments.len(), params.len()));
        }

        self.step += 1;
        let t = self.step as i32;
        let bias1 = 1.0 - self.beta1.powi(t);
        let bias2 = 1.0 - self.beta2.powi(t);
        let (beta1, beta2, lr, eps) = (self.beta1, self.beta2, self.learning_rate, self.epsilon);
        let decay = 1.0 - lr * self.weight_decay;

        for ((param, grad), moments) in params.iter_mut().zip(grads).zip(self.moments.iter_mut()) {
            let grad: &Array2<f64> = grad;
            // decoupled weight decay
            param.mapv_inplace(|w| w * decay);

            moments.m.zip_mut_with(grad, |m, &g| *m = beta1 * *m + (1.0 - beta1) * g);
            moments.v.zip_mut_with(grad, |v, &g| *v = beta2 * *v + (1.0 - beta2) * g * g);

            ndarray::Zip::from(&mut **param)
                .and(&moments.m)
                .and(&moments.v)
                .for_each(|w, &m, &v| {
                    let m_hat = m / bias1;
                    let v_hat = v / bias2;
                    *w -= lr * m_hat / (v_hat.sqrt() + eps);
                });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_first_step_moves_by_learning_rate() {
        let mut optimizer = AdamW::new(0.1).with_weight_decay(0.0);
        let mut weights = Array2::ones((2, 2));
        let grads = Array2::from_elem((2, 2), 3.0);

        optimizer.step(&mut [&mut weights], &[&grads]).unwrap();

        // bias-corrected first step has magnitude lr regardless of gradient scale
        assert_relative_eq!(weights[[0, 0]], 0.9, epsilon = 1e-6);
        assert_eq!(optimizer.steps(), 1);
    }

    #[test]
    fn test_weight_decay_shrinks_without_gradient() {
        let mut optimizer = AdamW::new(0.1).with_weight_decay(0.5);
        let mut weights = Array2::from_elem((1, 1), 2.0);
        let grads = Array2::zeros((1, 1));

        optimizer.step(&mut [&mut weights], &[&grads]).unwrap();
        assert_relative_eq!(weights[[0, 0]], 2.0 * (1.0 - 0.05), epsilon = 1e-12);
    }

    #[test]
    fn test_minimizes_quadratic() {
        let mut optimizer = AdamW::new(0.05).with_weight_decay(0.0);
        let mut x = Array2::from_elem((1, 2), 3.0);
        for _ in 0..500 {
            let grad = &x * 2.0;
            optimizer.step(&mut [&mut x], &[&grad]).unwrap();
        }
        assert!(x.iter().all(|v| v.abs() < 0.05));
    }

    #[test]
    fn test_rejects_mismatched_shapes() {
        let mut optimizer = AdamW::new(0.1);
        let mut weights = Array2::ones((2, 2));
        let grads = Array2::ones((2, 3));
        assert!(optimizer.step(&mut [&mut weights], &[&grads]).is_err());
    }

    #[test]
    fn test_state_survives_serialization() {
        let mut optimizer = AdamW::new(0.01);
        let mut weights = Array2::ones((2, 1));
        optimizer
            .step(&mut [&mut weights], &[&Array2::ones((2, 1))])
            .unwrap();

        let json = serde_json::to_string(&optimizer).unwrap();
        let restored: AdamW = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.steps(), 1);
        assert_eq!(restored.moments[0].m, optimizer.moments[0].m);
    }
}
