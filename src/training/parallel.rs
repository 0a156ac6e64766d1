//! Data-parallel replication of forward and backward passes
//!
//! A mini-batch is scattered into contiguous shards, one per replica. Each
//! replica runs the forward pass on its shard with a shared read-only view of
//! the model; outputs are gathered so the loss is computed once over the
//! whole batch. Backward runs per shard again and the shard gradients are
//! reduced into a single [`Gradients`] value. The caller applies exactly one
//! optimizer step with it.

use ndarray::{concatenate, s, Array2, ArrayView2, Axis};
use rayon::prelude::*;
use std::ops::Range;

use crate::encoder::EmbeddingSet;
use crate::error::{Error, Result};
use crate::network::{ForwardOutput, Gradients, ProtoModel, PrototypeActivations};

/// Contiguous split of a batch across replicas
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaPlan {
    shards: Vec<Range<usize>>,
}

impl ReplicaPlan {
    /// Near-equal shards; replicas beyond the batch size stay idle
    pub fn new(batch_len: usize, replicas: usize) -> Self {
        let replicas = replicas.max(1).min(batch_len.max(1));
        let base = batch_len / replicas;
        let extra = batch_len % replicas;

        let mut shards = Vec::with_capacity(replicas);
        let mut start = 0;
        for r in 0..replicas {
            let len = base + usize::from(r < extra);
            shards.push(start..start + len);
            start += len;
        }
        Self { shards }
    }

    pub fn shards(&self) -> &[Range<usize>] {
        &self.shards
    }

    /// Number of active replicas
    pub fn replicas(&self) -> usize {
        self.shards.len()
    }
}

/// One replica's share of a batch
struct Shard {
    rows: Range<usize>,
    embeddings: EmbeddingSet,
    output: ForwardOutput,
}

/// Forward results of all replicas plus the gathered batch output
pub struct ReplicatedBatch {
    shards: Vec<Shard>,
    gathered: ForwardOutput,
}

impl ReplicatedBatch {
    /// Batch-level output, rows in original batch order
    pub fn output(&self) -> &ForwardOutput {
        &self.gathered
    }
}

/// Replication driver
#[derive(Debug, Clone, Copy)]
pub struct DataParallel {
    replicas: usize,
}

impl DataParallel {
    pub fn new(replicas: usize) -> Self {
        Self {
            replicas: replicas.max(1),
        }
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    /// Scatter the batch, run every replica's forward pass and gather
    pub fn forward(&self, model: &ProtoModel, batch: &EmbeddingSet) -> Result<ReplicatedBatch> {
        let plan = ReplicaPlan::new(batch.len(), self.replicas);

        let shards = plan
            .shards()
            .par_iter()
            .map(|rows| {
                let embeddings = batch.slice_rows(rows.start, rows.end);
                let output = model.forward(&embeddings)?;
                Ok(Shard {
                    rows: rows.clone(),
                    embeddings,
                    output,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let gathered = gather(&shards)?;
        Ok(ReplicatedBatch { shards, gathered })
    }

    /// Run every replica's backward pass and reduce to a single gradient
    ///
    /// `grad_logits` and `grad_distances` are batch-level gradients; each
    /// replica receives the rows of its own shard.
    pub fn backward(
        &self,
        model: &ProtoModel,
        replicated: &ReplicatedBatch,
        grad_logits: &Array2<f64>,
        grad_distances: &Array2<f64>,
    ) -> Result<Gradients> {
        let n = replicated.gathered.logits.nrows();
        if grad_logits.nrows() != n || grad_distances.nrows() != n {
            return Err(Error::shape("replicated backward rows", n, grad_logits.nrows()));
        }

        let partials = replicated
            .shards
            .par_iter()
            .map(|shard| {
                let logits = grad_logits.slice(s![shard.rows.clone(), ..]).to_owned();
                let distances = grad_distances.slice(s![shard.rows.clone(), ..]).to_owned();
                model.backward(&shard.embeddings, &shard.output, &logits, &distances)
            })
            .collect::<Result<Vec<_>>>()?;

        // single synchronization point: every replica contributes before the step
        let mut total = Gradients::zeros_like(model);
        for partial in &partials {
            total.accumulate(partial);
        }
        Ok(total)
    }
}

fn stack<'a, A: Clone + 'a>(parts: impl Iterator<Item = ArrayView2<'a, A>>) -> Result<Array2<A>> {
    let views: Vec<_> = parts.collect();
    concatenate(Axis(0), &views).map_err(|e| Error::shape("replica gather", "matching columns", e))
}

fn gather(shards: &[Shard]) -> Result<ForwardOutput> {
    Ok(ForwardOutput {
        activations: PrototypeActivations {
            distances: stack(shards.iter().map(|s| s.output.activations.distances.view()))?,
            window_starts: stack(shards.iter().map(|s| s.output.activations.window_starts.view()))?,
        },
        features: stack(shards.iter().map(|s| s.output.features.view()))?,
        logits: stack(shards.iter().map(|s| s.output.logits.view()))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{DistanceFunction, ModelKind};
    use approx::assert_relative_eq;
    use rand::prelude::*;

    #[test]
    fn test_plan_covers_batch() {
        let plan = ReplicaPlan::new(10, 3);
        assert_eq!(plan.shards(), &[0..4, 4..7, 7..10]);

        let idle = ReplicaPlan::new(2, 4);
        assert_eq!(idle.replicas(), 2);

        let single = ReplicaPlan::new(5, 1);
        assert_eq!(single.shards(), &[0..5]);
    }

    #[test]
    fn test_gradients_independent_of_replica_count() {
        let mut rng = StdRng::seed_from_u64(21);
        let model = ProtoModel::new(ModelKind::Dist, DistanceFunction::SquaredEuclidean, 4, 1, 3, 2, &mut rng)
            .unwrap();
        let batch = EmbeddingSet::from_vectors(Array2::from_shape_fn((11, 3), |_| rng.gen::<f64>()));
        let grad_logits = Array2::from_shape_fn((11, 2), |_| rng.gen::<f64>() - 0.5);
        let grad_distances = Array2::from_shape_fn((11, 4), |_| rng.gen::<f64>() * 0.1);

        let single = DataParallel::new(1);
        let reference_batch = single.forward(&model, &batch).unwrap();
        let reference = single
            .backward(&model, &reference_batch, &grad_logits, &grad_distances)
            .unwrap();

        for replicas in [2, 3, 11] {
            let dp = DataParallel::new(replicas);
            let replicated = dp.forward(&model, &batch).unwrap();
            assert_eq!(replicated.output().logits.dim(), (11, 2));
            for (a, b) in replicated
                .output()
                .logits
                .iter()
                .zip(reference_batch.output().logits.iter())
            {
                assert_relative_eq!(*a, *b, epsilon = 1e-12);
            }

            let grads = dp.backward(&model, &replicated, &grad_logits, &grad_distances).unwrap();
            for (a, b) in grads.prototypes.iter().zip(reference.prototypes.iter()) {
                assert_relative_eq!(*a, *b, epsilon = 1e-10);
            }
            for (a, b) in grads.head.iter().zip(reference.head.iter()) {
                assert_relative_eq!(*a, *b, epsilon = 1e-10);
            }
        }
    }
}
