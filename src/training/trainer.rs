//! Training loop for prototype models
//!
//! Each epoch shuffles the encoded training split, runs one optimizer step
//! per mini-batch on `CE + lambda1 * R1 + lambda2 * R2` and, every
//! `val_epoch` epochs and after the last one, evaluates the validation split
//! and checkpoints on a new best balanced accuracy.

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{concatenate, Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use super::batching::DataLoader;
use super::checkpoint::{Checkpoint, RunDirectory};
use super::loss::{InterpretabilityLoss, LossAccumulator, LossBreakdown, LossWeights};
use super::optimizer::AdamW;
use super::parallel::DataParallel;
use super::state::{EpochMetrics, TrainingPhase, TrainingState};
use crate::encoder::{EmbeddingSet, LabeledEmbeddings};
use crate::error::{Error, Result};
use crate::network::{predict, ProtoModel, WeightedCrossEntropy};
use crate::utils::{balanced_accuracy, Config, PoolStrategy};

/// Result of evaluating a split without updating the model
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub loss: LossBreakdown,
    /// Balanced accuracy
    pub accuracy: f64,
    pub predictions: Vec<usize>,
}

/// Trainer for prototype models
pub struct Trainer {
    config: Config,
    run_dir: RunDirectory,
    parallel: DataParallel,
    criterion: WeightedCrossEntropy,
    regularizer: InterpretabilityLoss,
    weights: LossWeights,
    rng: StdRng,
    show_progress: bool,
}

impl Trainer {
    /// Create a trainer writing checkpoints into `run_dir`
    pub fn new(config: Config, run_dir: RunDirectory) -> Result<Self> {
        config.validate()?;
        let training = &config.training;
        Ok(Self {
            parallel: DataParallel::new(training.replicas),
            criterion: WeightedCrossEntropy::new(&training.class_weights),
            regularizer: InterpretabilityLoss,
            weights: training.loss_weights(),
            rng: StdRng::seed_from_u64(training.seed),
            show_progress: true,
            run_dir,
            config,
        })
    }

    /// Enable or disable the epoch progress bar
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn run_dir(&self) -> &RunDirectory {
        &self.run_dir
    }

    /// Run the full epoch loop
    pub fn fit(
        &mut self,
        model: &mut ProtoModel,
        optimizer: &mut AdamW,
        state: &mut TrainingState,
        train: &LabeledEmbeddings,
        val: &LabeledEmbeddings,
    ) -> Result<()> {
        if train.is_empty() || val.is_empty() {
            return Err(Error::DataError(format!(
                "training needs non-empty splits (train {}, val {})",
                train.len(),
                val.len()
            )));
        }

        let num_epochs = self.config.training.num_epochs;
        let val_epoch = self.config.training.val_epoch;
        info!(
            "Training {} model: {} prototypes, {} train / {} val examples, {} epochs",
            model.kind(),
            model.num_prototypes(),
            train.len(),
            val.len(),
            num_epochs
        );

        let pb = if self.show_progress {
            let pb = ProgressBar::new(num_epochs as u64);
            if let Ok(style) =
                ProgressStyle::default_bar().template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            pb
        } else {
            ProgressBar::hidden()
        };

        for epoch in (state.epoch + 1)..=num_epochs {
            state.phase = TrainingPhase::TrainingEpoch;
            let metrics = self.train_epoch(model, optimizer, train, epoch)?;
            info!(
                "Epoch {}/{}: loss {:.4} (ce {:.4}, r1 {:.4}, r2 {:.4}), train acc {:.4}",
                epoch, num_epochs, metrics.loss.total, metrics.loss.ce, metrics.loss.r1, metrics.loss.r2, metrics.train_accuracy
            );
            state.record_epoch(metrics);

            if TrainingState::validation_due(epoch, val_epoch, num_epochs) {
                state.phase = TrainingPhase::Validating;
                let eval = self.evaluate(model, val)?;
                eval.loss.ensure_finite(epoch)?;
                let best = state.record_validation(epoch, eval.loss, eval.accuracy);
                info!(
                    "Validation at epoch {}: loss {:.4}, balanced acc {:.4}{}",
                    epoch,
                    eval.loss.total,
                    eval.accuracy,
                    if best { " (best)" } else { "" }
                );
                if best {
                    self.run_dir.save_checkpoint(&Checkpoint {
                        epoch,
                        val_accuracy: eval.accuracy,
                        model: model.clone(),
                        optimizer: optimizer.clone(),
                        config: self.config.clone(),
                    })?;
                }
            }

            pb.inc(1);
        }

        pb.finish_with_message("Training complete");
        state.phase = TrainingPhase::Done;
        info!(
            "Best validation balanced accuracy {:.4} at epoch {:?}",
            state.best_val_accuracy, state.best_epoch
        );
        Ok(())
    }

    fn train_epoch(
        &mut self,
        model: &mut ProtoModel,
        optimizer: &mut AdamW,
        train: &LabeledEmbeddings,
        epoch: usize,
    ) -> Result<EpochMetrics> {
        let loader = DataLoader::shuffled(train.len(), self.config.training.batch_size, &mut self.rng);
        let mut losses = LossAccumulator::default();
        let mut predictions = Vec::with_capacity(train.len());
        let mut labels = Vec::with_capacity(train.len());

        for indices in loader {
            let batch = train.select(&indices);
            let (loss, batch_predictions) = self.train_step(model, optimizer, &batch, &train.embeddings, epoch)?;
            losses.push(&loss);
            predictions.extend(batch_predictions);
            labels.extend_from_slice(&batch.labels);
        }

        Ok(EpochMetrics {
            epoch,
            loss: losses.mean(),
            train_accuracy: balanced_accuracy(&predictions, &labels, model.num_classes()),
        })
    }

    /// One forward, loss, backward and optimizer step over a mini-batch
    fn train_step(
        &self,
        model: &mut ProtoModel,
        optimizer: &mut AdamW,
        batch: &LabeledEmbeddings,
        pool: &EmbeddingSet,
        epoch: usize,
    ) -> Result<(LossBreakdown, Vec<usize>)> {
        let replicated = self.parallel.forward(model, &batch.embeddings)?;
        let output = replicated.output();

        let (ce, grad_logits) = self.criterion.forward(&output.logits, &batch.labels)?;
        if !model.kind().has_prototypes() {
            let loss = LossBreakdown::combine(ce, 0.0, 0.0, &self.weights);
            loss.ensure_finite(epoch)?;
            let no_distances = Array2::zeros(output.activations.distances.dim());
            let grads = self.parallel.backward(model, &replicated, &grad_logits, &no_distances)?;
            let predictions = predict(&output.logits);
            let [prototypes, head] = model.parameters_mut();
            optimizer.step(&mut [prototypes, head], &[&grads.prototypes, &grads.head])?;
            return Ok((loss, predictions));
        }

        let r1 = self.regularizer.r1(&output.activations.distances)?;

        let (pool, pool_activations) = match self.config.training.r2_pool {
            PoolStrategy::Full => (pool, model.pool_distances(pool)?),
            PoolStrategy::Batch => (&batch.embeddings, output.activations.clone()),
        };
        let r2 = self.regularizer.r2(&pool_activations.distances)?;

        let loss = LossBreakdown::combine(ce, r1.value, r2.value, &self.weights);
        loss.ensure_finite(epoch)?;

        let grad_distances: Array2<f64> = &r1.grad * self.weights.lambda1;
        let mut grads = self.parallel.backward(model, &replicated, &grad_logits, &grad_distances)?;
        let pool_grad = model.pool_backward(pool, &pool_activations, &(&r2.grad * self.weights.lambda2))?;
        grads.prototypes += &pool_grad;

        let predictions = predict(&output.logits);
        debug!("batch of {}: loss {:.5}", batch.len(), loss.total);

        let [prototypes, head] = model.parameters_mut();
        optimizer.step(&mut [prototypes, head], &[&grads.prototypes, &grads.head])?;

        Ok((loss, predictions))
    }

    /// Full pass over a split without touching the model
    pub fn evaluate(&self, model: &ProtoModel, data: &LabeledEmbeddings) -> Result<Evaluation> {
        evaluate(
            model,
            data,
            self.config.training.batch_size,
            &self.parallel,
            &self.criterion,
            &self.weights,
        )
    }
}

/// Evaluate a model on a labeled split in one full pass
///
/// The forward pass runs over chunks of `batch_size` rows, each replicated
/// across `parallel`. Distances and logits are gathered for the whole split
/// and CE, R1 and R2 are computed once on them, with the split itself as the
/// R2 pool, so the result does not depend on `batch_size`.
pub fn evaluate(
    model: &ProtoModel,
    data: &LabeledEmbeddings,
    batch_size: usize,
    parallel: &DataParallel,
    criterion: &WeightedCrossEntropy,
    weights: &LossWeights,
) -> Result<Evaluation> {
    if data.is_empty() {
        return Err(Error::DataError("cannot evaluate an empty split".to_string()));
    }

    let mut distances = Vec::new();
    let mut logits = Vec::new();
    for indices in DataLoader::new(data.len(), batch_size) {
        let replicated = parallel.forward(model, &data.embeddings.select(&indices))?;
        let output = replicated.output();
        distances.push(output.activations.distances.clone());
        logits.push(output.logits.clone());
    }
    let distances = stack_rows(&distances)?;
    let logits = stack_rows(&logits)?;

    let (ce, _) = criterion.forward(&logits, &data.labels)?;
    let (r1, r2) = if model.kind().has_prototypes() {
        let (r1, r2) = InterpretabilityLoss.compute(&distances, &distances)?;
        (r1.value, r2.value)
    } else {
        (0.0, 0.0)
    };
    let predictions = predict(&logits);

    Ok(Evaluation {
        loss: LossBreakdown::combine(ce, r1, r2, weights),
        accuracy: balanced_accuracy(&predictions, &data.labels, model.num_classes()),
        predictions,
    })
}

fn stack_rows(parts: &[Array2<f64>]) -> Result<Array2<f64>> {
    let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
    concatenate(Axis(0), &views).map_err(|e| Error::shape("evaluation gather", "matching columns", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{DistanceFunction, ModelKind};
    use approx::assert_relative_eq;
    use ndarray::array;
    use rand::Rng;
    use tempfile::tempdir;

    fn clusters(n: usize) -> LabeledEmbeddings {
        let vectors = Array2::from_shape_fn((n, 2), |(i, j)| if (i % 2) == j { 1.0 } else { 0.0 });
        let labels = (0..n).map(|i| i % 2).collect();
        LabeledEmbeddings::new(EmbeddingSet::from_vectors(vectors), labels).unwrap()
    }

    fn config(num_epochs: usize, val_epoch: usize) -> Config {
        let mut config = Config::default();
        config.training.num_epochs = num_epochs;
        config.training.val_epoch = val_epoch;
        config.training.batch_size = 8;
        config.training.learning_rate = 0.05;
        config.training.num_prototypes = 2;
        config
    }

    #[test]
    fn test_fit_reaches_done_and_checkpoints() {
        let dir = tempdir().unwrap();
        let run = RunDirectory::create_named(dir.path(), "run").unwrap();
        let cfg = config(4, 2);
        let mut rng = StdRng::seed_from_u64(1);
        let mut model = ProtoModel::new(ModelKind::Dist, DistanceFunction::SquaredEuclidean, 2, 1, 2, 2, &mut rng)
            .unwrap();
        let mut optimizer = AdamW::new(cfg.training.learning_rate);
        let mut state = TrainingState::new();

        let mut trainer = Trainer::new(cfg, run.clone()).unwrap().with_progress(false);
        trainer
            .fit(&mut model, &mut optimizer, &mut state, &clusters(20), &clusters(6))
            .unwrap();

        assert_eq!(state.phase, TrainingPhase::Done);
        assert_eq!(state.history.len(), 4);
        assert_eq!(state.validations.iter().map(|v| v.epoch).collect::<Vec<_>>(), vec![2, 4]);
        assert!(run.checkpoint_path().is_file());
        // 3 batches per epoch
        assert_eq!(optimizer.steps(), 12);
    }

    #[test]
    fn test_replica_count_does_not_change_training() {
        let train = clusters(12);
        let val = clusters(4);
        let mut results = Vec::new();
        for replicas in [1, 3] {
            let dir = tempdir().unwrap();
            let mut cfg = config(2, 1);
            cfg.training.replicas = replicas;
            let mut rng = StdRng::seed_from_u64(3);
            let mut model =
                ProtoModel::new(ModelKind::Dist, DistanceFunction::SquaredEuclidean, 2, 1, 2, 2, &mut rng).unwrap();
            let mut optimizer = AdamW::new(0.05);
            let mut state = TrainingState::new();
            let run = RunDirectory::create_named(dir.path(), "run").unwrap();
            Trainer::new(cfg, run)
                .unwrap()
                .with_progress(false)
                .fit(&mut model, &mut optimizer, &mut state, &train, &val)
                .unwrap();
            results.push(model.prototypes().clone());
        }
        for (a, b) in results[0].iter().zip(results[1].iter()) {
            approx::assert_relative_eq!(*a, *b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_non_finite_input_aborts_before_checkpoint() {
        let dir = tempdir().unwrap();
        let run = RunDirectory::create_named(dir.path(), "run").unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let mut model = ProtoModel::new(ModelKind::Dist, DistanceFunction::SquaredEuclidean, 2, 1, 2, 2, &mut rng)
            .unwrap();
        let bad = LabeledEmbeddings::new(
            EmbeddingSet::from_vectors(array![[f64::NAN, 0.0], [0.0, 1.0]]),
            vec![0, 1],
        )
        .unwrap();

        let result = Trainer::new(config(1, 1), run.clone()).unwrap().with_progress(false).fit(
            &mut model,
            &mut AdamW::new(0.05),
            &mut TrainingState::new(),
            &bad,
            &bad,
        );
        assert!(matches!(result, Err(Error::NumericDegeneracy { epoch: 1, .. })));
        assert!(!run.checkpoint_path().exists());
    }

    #[test]
    fn test_empty_split_is_rejected() {
        let dir = tempdir().unwrap();
        let run = RunDirectory::create_named(dir.path(), "run").unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let mut model = ProtoModel::new(ModelKind::Dist, DistanceFunction::SquaredEuclidean, 2, 1, 2, 2, &mut rng)
            .unwrap();
        let empty = LabeledEmbeddings::new(EmbeddingSet::from_vectors(Array2::zeros((0, 2))), vec![]).unwrap();
        let result = Trainer::new(config(1, 1), run).unwrap().with_progress(false).fit(
            &mut model,
            &mut AdamW::new(0.05),
            &mut TrainingState::new(),
            &clusters(4),
            &empty,
        );
        assert!(matches!(result, Err(Error::DataError(_))));
    }

    #[test]
    fn test_evaluation_is_independent_of_batch_size() {
        let mut rng = StdRng::seed_from_u64(9);
        let model = ProtoModel::new(ModelKind::Dist, DistanceFunction::SquaredEuclidean, 3, 1, 4, 2, &mut rng)
            .unwrap();
        let vectors = Array2::from_shape_fn((10, 4), |_| rng.gen::<f64>() * 3.0);
        let data = LabeledEmbeddings::new(EmbeddingSet::from_vectors(vectors), (0..10).map(|i| i % 2).collect())
            .unwrap();
        let criterion = WeightedCrossEntropy::new(&[0.3, 0.7]);
        let weights = LossWeights::default();

        let full = evaluate(&model, &data, 10, &DataParallel::new(1), &criterion, &weights).unwrap();
        for (batch_size, replicas) in [(8, 1), (3, 1), (4, 2), (1, 3)] {
            let chunked =
                evaluate(&model, &data, batch_size, &DataParallel::new(replicas), &criterion, &weights).unwrap();
            assert_relative_eq!(chunked.loss.ce, full.loss.ce, epsilon = 1e-12);
            assert_relative_eq!(chunked.loss.r1, full.loss.r1, epsilon = 1e-12);
            assert_relative_eq!(chunked.loss.r2, full.loss.r2, epsilon = 1e-12);
            assert_relative_eq!(chunked.loss.total, full.loss.total, epsilon = 1e-12);
            assert_eq!(chunked.predictions, full.predictions);
        }

        // R2 runs over the whole evaluated split
        let pool = model.pool_distances(&data.embeddings).unwrap();
        let r2 = InterpretabilityLoss.r2(&pool.distances).unwrap();
        assert_relative_eq!(full.loss.r2, r2.value, epsilon = 1e-12);
    }

    #[test]
    fn test_baseline_trains_on_cross_entropy_only() {
        let dir = tempdir().unwrap();
        let run = RunDirectory::create_named(dir.path(), "run").unwrap();
        let mut cfg = config(6, 3);
        cfg.model.kind = ModelKind::Baseline;
        cfg.training.lambda1 = 0.9;
        cfg.training.lambda2 = 0.9;
        let mut rng = StdRng::seed_from_u64(4);
        let mut model =
            ProtoModel::new(ModelKind::Baseline, DistanceFunction::SquaredEuclidean, 2, 1, 2, 2, &mut rng).unwrap();
        let mut optimizer = AdamW::new(0.05);
        let mut state = TrainingState::new();

        Trainer::new(cfg, run.clone())
            .unwrap()
            .with_progress(false)
            .fit(&mut model, &mut optimizer, &mut state, &clusters(20), &clusters(6))
            .unwrap();

        for epoch in &state.history {
            assert_eq!(epoch.loss.r1, 0.0);
            assert_eq!(epoch.loss.r2, 0.0);
            assert_relative_eq!(epoch.loss.total, epoch.loss.ce);
        }
        assert_eq!(state.phase, TrainingPhase::Done);
        let checkpoint = run.load_checkpoint().unwrap();
        assert_eq!(checkpoint.model.kind(), ModelKind::Baseline);
        assert_eq!(checkpoint.model.prototype_weights().dim(), (2, 2));
    }
}
