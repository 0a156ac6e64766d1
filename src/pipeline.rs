//! Train and test entry points
//!
//! `train` runs the epoch loop on pre-encoded splits and checkpoints the best
//! model into a fresh run directory. `test` loads the best checkpoint,
//! evaluates it once and writes the prototype projection report next to it
//! (the baseline has no prototypes and no report).
//! `run` drives a whole configured session from a dataset file.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use tracing::info;

use crate::data::Dataset;
use crate::encoder::{EmbeddingSet, HashingEncoder, LabeledEmbeddings, TextEncoder};
use crate::error::{Error, Result};
use crate::network::{ProtoModel, WeightedCrossEntropy};
use crate::projection::{self, ProjectionRecord};
use crate::training::{
    self, AdamW, Checkpoint, DataParallel, Evaluation, RunDirectory, Trainer, TrainingState,
};
use crate::utils::{Config, Mode};

/// Texts of a split together with their embeddings and labels
#[derive(Debug, Clone)]
pub struct EncodedSplit {
    pub texts: Vec<String>,
    pub data: LabeledEmbeddings,
}

impl EncodedSplit {
    pub fn embeddings(&self) -> &EmbeddingSet {
        &self.data.embeddings
    }
}

/// Result of a training run
#[derive(Debug)]
pub struct TrainOutcome {
    pub run_dir: RunDirectory,
    pub state: TrainingState,
    /// Model after the last epoch (the checkpoint holds the best one)
    pub model: ProtoModel,
}

/// Result of evaluating the best checkpoint
#[derive(Debug)]
pub struct TestOutcome {
    pub checkpoint: PathBuf,
    pub checkpoint_epoch: usize,
    pub evaluation: Evaluation,
    pub records: Vec<ProjectionRecord>,
    pub report: Option<PathBuf>,
}

/// Encoder matching the configured model variant
pub fn build_encoder(config: &Config) -> Result<HashingEncoder> {
    HashingEncoder::new(
        config.encoder.clone(),
        config.model.kind.encoder_level(),
        config.model.effective_proto_size(),
    )
}

/// Freshly initialized model for embeddings of width `embed_dim`
pub fn build_model(config: &Config, embed_dim: usize) -> Result<ProtoModel> {
    let mut rng = StdRng::seed_from_u64(config.training.seed);
    ProtoModel::new(
        config.model.kind,
        config.model.distance,
        config.training.num_prototypes,
        config.model.effective_proto_size(),
        embed_dim,
        config.training.num_classes,
        &mut rng,
    )
}

/// Encode a dataset once; the embeddings stay fixed for the whole run
pub fn encode_split(encoder: &dyn TextEncoder, dataset: &Dataset) -> Result<EncodedSplit> {
    let embeddings = encoder.encode(&dataset.texts)?;
    Ok(EncodedSplit {
        texts: dataset.texts.clone(),
        data: LabeledEmbeddings::new(embeddings, dataset.labels.clone())?,
    })
}

/// Train a fresh model and checkpoint its best validation state
pub fn train(config: &Config, train: &LabeledEmbeddings, val: &LabeledEmbeddings) -> Result<TrainOutcome> {
    config.validate()?;
    let run_dir = RunDirectory::create(&config.output.results_dir)?;
    config.save(run_dir.path().join("config.toml"))?;

    let mut model = build_model(config, train.embeddings.dim())?;
    let mut optimizer = AdamW::new(config.training.learning_rate).with_weight_decay(config.training.weight_decay);
    let mut state = TrainingState::new();

    let mut trainer = Trainer::new(config.clone(), run_dir.clone())?;
    trainer.fit(&mut model, &mut optimizer, &mut state, train, val)?;

    Ok(TrainOutcome { run_dir, state, model })
}

/// Checkpoint used for testing: the configured one or the latest run's
pub fn locate_checkpoint(config: &Config) -> Result<PathBuf> {
    match &config.output.checkpoint {
        Some(path) if path.is_file() => Ok(path.clone()),
        Some(path) => Err(Error::MissingCheckpoint(path.display().to_string())),
        None => Ok(RunDirectory::latest(&config.output.results_dir)?.checkpoint_path()),
    }
}

/// Evaluate the best checkpoint on the test split and write the projection report
pub fn test(
    config: &Config,
    encoder: &dyn TextEncoder,
    train: &EncodedSplit,
    test: &LabeledEmbeddings,
) -> Result<TestOutcome> {
    config.validate()?;
    let checkpoint_path = locate_checkpoint(config)?;
    info!("Loading model: {}", checkpoint_path.display());
    let checkpoint = Checkpoint::load(&checkpoint_path)?;
    let model = checkpoint.model;

    if model.kind() != config.model.kind {
        return Err(Error::ConfigError(format!(
            "checkpoint holds a {} model but {} is configured",
            model.kind(),
            config.model.kind
        )));
    }
    if model.num_classes() != config.training.num_classes {
        return Err(Error::ConfigError(format!(
            "checkpoint has {} classes but num_classes is {}",
            model.num_classes(),
            config.training.num_classes
        )));
    }

    let evaluation = training::evaluate(
        &model,
        test,
        config.training.batch_size,
        &DataParallel::new(config.training.replicas),
        &WeightedCrossEntropy::new(&config.training.class_weights),
        &config.training.loss_weights(),
    )?;
    info!(
        "Test evaluation of epoch {} model: loss {:.4}, balanced acc {:.4}",
        checkpoint.epoch, evaluation.loss.total, evaluation.accuracy
    );

    let (records, report) = if model.kind().has_prototypes() {
        let records = projection::project(&model, train.embeddings(), &train.texts, encoder)?;
        let report = checkpoint_path
            .parent()
            .map(|dir| dir.join(training::REPORT_FILE))
            .unwrap_or_else(|| PathBuf::from(training::REPORT_FILE));
        projection::write_report(&records, &report)?;
        (records, Some(report))
    } else {
        (Vec::new(), None)
    };

    Ok(TestOutcome {
        checkpoint: checkpoint_path,
        checkpoint_epoch: checkpoint.epoch,
        evaluation,
        records,
        report,
    })
}

/// Load, split and weight the configured dataset
///
/// Class weights are taken from the full label distribution and written
/// back into the configuration.
pub fn prepare_data(config: &mut Config) -> Result<crate::data::DataSplits> {
    let path = config
        .data
        .path
        .clone()
        .ok_or_else(|| Error::ConfigError("data.path is required".to_string()))?;
    let dataset = Dataset::load(&path, config.data.name, config.data.discard)?;
    config.training.class_weights = dataset.class_weights(config.training.num_classes)?;
    config.validate()?;
    info!("Class weights: {:?}", config.training.class_weights);

    let mut rng = StdRng::seed_from_u64(config.training.seed);
    let mut splits = dataset.split(config.data.val_fraction, config.data.test_fraction, &mut rng)?;
    if config.training.one_shot {
        splits.train = splits.train.subsample(config.training.one_shot_size, &mut rng);
        info!("One-shot training on {} examples", splits.train.len());
    }
    Ok(splits)
}

/// Run a configured session end to end
pub fn run(mut config: Config) -> Result<()> {
    config.validate()?;
    let splits = prepare_data(&mut config)?;

    let mut encoder = build_encoder(&config)?;
    encoder.fit(&splits.train.texts);

    match config.training.mode {
        Mode::Train => {
            let train_split = encode_split(&encoder, &splits.train)?;
            let val_split = encode_split(&encoder, &splits.val)?;
            train(&config, &train_split.data, &val_split.data)?;
        }
        Mode::Test => {
            let train_split = encode_split(&encoder, &splits.train)?;
            let test_split = encode_split(&encoder, &splits.test)?;
            test(&config, &encoder, &train_split, &test_split.data)?;
        }
        Mode::Both => {
            {
                let train_split = encode_split(&encoder, &splits.train)?;
                let val_split = encode_split(&encoder, &splits.val)?;
                train(&config, &train_split.data, &val_split.data)?;
            }
            // training embeddings are released before the test phase re-encodes
            let train_split = encode_split(&encoder, &splits.train)?;
            let test_split = encode_split(&encoder, &splits.test)?;
            test(&config, &encoder, &train_split, &test_split.data)?;
        }
        Mode::Sweep => {
            let train_split = encode_split(&encoder, &splits.train)?;
            let val_split = encode_split(&encoder, &splits.val)?;
            let results = training::run_sweep(&config, &config.sweep, &train_split.data, &val_split.data)?;
            info!(
                "Sweep summary written to {}",
                config.output.results_dir.join(training::SWEEP_RESULTS_FILE).display()
            );
            for result in &results {
                info!(
                    "lr={} batch_size={} lambda1={} lambda2={}: best val acc {:.4}",
                    result.params.learning_rate,
                    result.params.batch_size,
                    result.params.lambda1,
                    result.params.lambda2,
                    result.best_val_accuracy
                );
            }
        }
    }
    Ok(())
}
