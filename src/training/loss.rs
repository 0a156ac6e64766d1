//! Interpretability regularizers and the combined training objective
//!
//! R1 pulls every encoded example toward its nearest prototype, R2 pulls
//! every prototype toward its nearest real example:
//!
//! - `R1 = mean_i min_j D_fp[i, j]` over the batch matrix `[batch, P]`
//! - `R2 = mean_j min_k D_pf[k, j]` over the pool matrix `[pool, P]`
//!
//! Both matrices are oriented examples-by-prototypes. R1 reduces along the
//! prototype axis, R2 along the example axis.

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Value of a regularizer and its gradient with respect to the distance matrix
#[derive(Debug, Clone)]
pub struct Regularizer {
    pub value: f64,
    pub grad: Array2<f64>,
}

/// R1/R2 interpretability loss
#[derive(Debug, Clone, Copy, Default)]
pub struct InterpretabilityLoss;

impl InterpretabilityLoss {
    /// R1: mean over examples of the distance to the closest prototype
    pub fn r1(&self, batch_distances: &Array2<f64>) -> Result<Regularizer> {
        let (n, p) = batch_distances.dim();
        if n == 0 || p == 0 {
            return Err(Error::shape("R1 distance matrix", "[batch > 0, P > 0]", format!("[{}, {}]", n, p)));
        }

        let mut grad = Array2::zeros((n, p));
        let mut total = 0.0;
        for (i, row) in batch_distances.axis_iter(Axis(0)).enumerate() {
            let (j, d) = argmin(row.iter().copied());
            total += d;
            grad[[i, j]] = 1.0 / n as f64;
        }

        Ok(Regularizer {
            value: total / n as f64,
            grad,
        })
    }

    /// R2: mean over prototypes of the distance to the closest pool example
    pub fn r2(&self, pool_distances: &Array2<f64>) -> Result<Regularizer> {
        let (k, p) = pool_distances.dim();
        if k == 0 || p == 0 {
            return Err(Error::shape("R2 distance matrix", "[pool > 0, P > 0]", format!("[{}, {}]", k, p)));
        }

        let mut grad = Array2::zeros((k, p));
        let mut total = 0.0;
        for (j, column) in pool_distances.axis_iter(Axis(1)).enumerate() {
            let (i, d) = argmin(column.iter().copied());
            total += d;
            grad[[i, j]] = 1.0 / p as f64;
        }

        Ok(Regularizer {
            value: total / p as f64,
            grad,
        })
    }

    /// Both regularizers; the matrices must agree on the prototype count
    pub fn compute(
        &self,
        batch_distances: &Array2<f64>,
        pool_distances: &Array2<f64>,
    ) -> Result<(Regularizer, Regularizer)> {
        if batch_distances.ncols() != pool_distances.ncols() {
            return Err(Error::shape(
                "interpretability loss prototype count",
                batch_distances.ncols(),
                pool_distances.ncols(),
            ));
        }
        Ok((self.r1(batch_distances)?, self.r2(pool_distances)?))
    }
}

/// Index and value of the smallest element; the first one wins ties
fn argmin(values: impl Iterator<Item = f64>) -> (usize, f64) {
    values
        .enumerate()
        .fold((0, f64::INFINITY), |best, (idx, v)| if v < best.1 { (idx, v) } else { best })
}

/// Weights of the regularizers in the combined loss
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossWeights {
    /// Weight of R1
    pub lambda1: f64,
    /// Weight of R2
    pub lambda2: f64,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            lambda1: 0.1,
            lambda2: 0.1,
        }
    }
}

/// Scalar terms of `CE + lambda1 * R1 + lambda2 * R2`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LossBreakdown {
    pub total: f64,
    pub ce: f64,
    pub r1: f64,
    pub r2: f64,
}

impl LossBreakdown {
    pub fn combine(ce: f64, r1: f64, r2: f64, weights: &LossWeights) -> Self {
        Self {
            total: ce + weights.lambda1 * r1 + weights.lambda2 * r2,
            ce,
            r1,
            r2,
        }
    }

    /// Fail on the first non-finite term
    pub fn ensure_finite(&self, epoch: usize) -> Result<()> {
        for (term, value) in [("cross-entropy", self.ce), ("R1", self.r1), ("R2", self.r2), ("total", self.total)] {
            if !value.is_finite() {
                return Err(Error::NumericDegeneracy { term, value, epoch });
            }
        }
        Ok(())
    }
}

/// Running mean of per-batch losses
#[derive(Debug, Clone, Default)]
pub struct LossAccumulator {
    sum: LossBreakdown,
    count: usize,
}

impl LossAccumulator {
    pub fn push(&mut self, loss: &LossBreakdown) {
        self.sum.total += loss.total;
        self.sum.ce += loss.ce;
        self.sum.r1 += loss.r1;
        self.sum.r2 += loss.r2;
        self.count += 1;
    }

    pub fn mean(&self) -> LossBreakdown {
        if self.count == 0 {
            return LossBreakdown::default();
        }
        let n = self.count as f64;
        LossBreakdown {
            total: self.sum.total / n,
            ce: self.sum.ce / n,
            r1: self.sum.r1 / n,
            r2: self.sum.r2 / n,
        }
    }
}
