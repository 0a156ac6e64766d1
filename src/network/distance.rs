//! Distance functions between encoded examples and prototypes

use ndarray::{Array1, Array2, ArrayView1, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Distance function types for prototype layers
///
/// Both variants are differentiable with respect to either operand, see
/// [`DistanceFunction::gradient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceFunction {
    /// Squared Euclidean distance: sum((x-y)^2)
    #[default]
    SquaredEuclidean,
    /// Euclidean distance: sqrt(sum((x-y)^2))
    Euclidean,
}

impl DistanceFunction {
    /// Compute distance between two vectors
    pub fn compute(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        match self {
            DistanceFunction::SquaredEuclidean => Self::squared_euclidean(a, b),
            DistanceFunction::Euclidean => Self::squared_euclidean(a, b).sqrt(),
        }
    }

    fn squared_euclidean(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        Zip::from(&a).and(&b).fold(0.0, |acc, &x, &y| {
            let d = x - y;
            acc + d * d
        })
    }

    /// Gradient of `compute(a, b)` with respect to `a`.
    ///
    /// The gradient with respect to `b` is the negation.
    pub fn gradient(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> Array1<f64> {
        let diff = &a - &b;
        match self {
            DistanceFunction::SquaredEuclidean => diff * 2.0,
            DistanceFunction::Euclidean => {
                let norm = diff.dot(&diff).sqrt();
                if norm < 1e-12 {
                    // subgradient at the cusp
                    Array1::zeros(diff.len())
                } else {
                    diff / norm
                }
            }
        }
    }

    /// Pairwise distances between `n` encodings `[n, d]` and `p` prototypes `[p, d]`.
    ///
    /// Returns a `[n, p]` matrix with non-negative entries.
    pub fn pairwise(&self, encodings: &Array2<f64>, prototypes: &Array2<f64>) -> Result<Array2<f64>> {
        if encodings.ncols() != prototypes.ncols() {
            return Err(Error::shape(
                "pairwise distance",
                format!("prototype dimension {}", encodings.ncols()),
                prototypes.ncols(),
            ));
        }

        let mut out = Array2::zeros((encodings.nrows(), prototypes.nrows()));
        for (i, x) in encodings.outer_iter().enumerate() {
            for (j, p) in prototypes.outer_iter().enumerate() {
                out[[i, j]] = self.compute(x, p);
            }
        }
        Ok(out)
    }

    /// Backward pass of [`pairwise`](Self::pairwise).
    ///
    /// Given the upstream gradient `[n, p]`, returns the gradients with respect
    /// to the encodings `[n, d]` and the prototypes `[p, d]`.
    pub fn pairwise_backward(
        &self,
        encodings: &Array2<f64>,
        prototypes: &Array2<f64>,
        grad_out: &Array2<f64>,
    ) -> Result<(Array2<f64>, Array2<f64>)> {
        let expected = (encodings.nrows(), prototypes.nrows());
        if grad_out.dim() != expected {
            return Err(Error::shape(
                "pairwise distance backward",
                format!("{:?}", expected),
                format!("{:?}", grad_out.dim()),
            ));
        }

        let mut grad_enc = Array2::zeros(encodings.dim());
        let mut grad_proto = Array2::zeros(prototypes.dim());
        for (i, x) in encodings.outer_iter().enumerate() {
            for (j, p) in prototypes.outer_iter().enumerate() {
                let g = grad_out[[i, j]];
                if g == 0.0 {
                    continue;
                }
                let local = self.gradient(x, p) * g;
                let mut enc_row = grad_enc.row_mut(i);
                enc_row += &local;
                let mut proto_row = grad_proto.row_mut(j);
                proto_row -= &local;
            }
        }
        Ok((grad_enc, grad_proto))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;
    use rand::prelude::*;

    #[test]
    fn test_squared_euclidean() {
        let df = DistanceFunction::SquaredEuclidean;
        let a = array![1.0, 2.0, 3.0];
        let b = array![4.0, 5.0, 6.0];

        assert_relative_eq!(df.compute(a.view(), b.view()), 27.0, epsilon = 1e-9);
    }

    #[test]
    fn test_euclidean() {
        let df = DistanceFunction::Euclidean;
        let a = array![0.0, 0.0, 0.0];
        let b = array![3.0, 4.0, 0.0];

        assert_relative_eq!(df.compute(a.view(), b.view()), 5.0, epsilon = 1e-9);
    }

    #[test]
    fn test_pairwise_shape_and_sign() {
        let mut rng = StdRng::seed_from_u64(7);
        for &(n, p) in &[(1, 1), (3, 5), (8, 2), (16, 10)] {
            let x = Array2::from_shape_fn((n, 4), |_| rng.gen::<f64>() * 2.0 - 1.0);
            let protos = Array2::from_shape_fn((p, 4), |_| rng.gen::<f64>() * 2.0 - 1.0);
            for df in [DistanceFunction::SquaredEuclidean, DistanceFunction::Euclidean] {
                let d = df.pairwise(&x, &protos).unwrap();
                assert_eq!(d.dim(), (n, p));
                assert!(d.iter().all(|&v| v >= 0.0));
            }
        }
    }

    #[test]
    fn test_pairwise_rejects_dimension_mismatch() {
        let x = Array2::<f64>::zeros((2, 3));
        let protos = Array2::<f64>::zeros((4, 2));
        let err = DistanceFunction::SquaredEuclidean.pairwise(&x, &protos);
        assert!(matches!(err, Err(Error::ShapeError { .. })));
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        let x = array![[0.3, -0.2], [1.0, 0.5]];
        let protos = array![[0.1, 0.4], [-0.7, 0.2], [0.9, 0.9]];
        let grad_out = array![[1.0, 0.5, -0.2], [0.3, 0.0, 2.0]];
        let h = 1e-6;

        for df in [DistanceFunction::SquaredEuclidean, DistanceFunction::Euclidean] {
            let (g_enc, g_proto) = df.pairwise_backward(&x, &protos, &grad_out).unwrap();
            let objective = |x: &Array2<f64>, p: &Array2<f64>| {
                (df.pairwise(x, p).unwrap() * &grad_out).sum()
            };

            for idx in [(0, 0), (1, 1)] {
                let mut plus = x.clone();
                plus[idx] += h;
                let mut minus = x.clone();
                minus[idx] -= h;
                let numeric = (objective(&plus, &protos) - objective(&minus, &protos)) / (2.0 * h);
                assert_relative_eq!(g_enc[idx], numeric, epsilon = 1e-5);
            }
            for idx in [(0, 1), (2, 0)] {
                let mut plus = protos.clone();
                plus[idx] += h;
                let mut minus = protos.clone();
                minus[idx] -= h;
                let numeric = (objective(&x, &plus) - objective(&x, &minus)) / (2.0 * h);
                assert_relative_eq!(g_proto[idx], numeric, epsilon = 1e-5);
            }
        }
    }
}
