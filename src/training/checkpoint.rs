//! Run directories and best-model checkpoints
//!
//! Every training run owns a directory named after its start time under the
//! configured results directory. The best model is kept in a single
//! `best_model.json` inside it and replaced on every new best.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::optimizer::AdamW;
use crate::error::{Error, Result};
use crate::network::ProtoModel;
use crate::utils::Config;

/// Checkpoint file name inside a run directory
pub const CHECKPOINT_FILE: &str = "best_model.json";

/// Prototype report file name inside a run directory
pub const REPORT_FILE: &str = "prototypes.txt";

/// Run directory name format
pub const RUN_NAME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Everything needed to resume or evaluate a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Epoch that produced the model
    pub epoch: usize,
    /// Validation balanced accuracy of the model
    pub val_accuracy: f64,
    pub model: ProtoModel,
    pub optimizer: AdamW,
    pub config: Config,
}

impl Checkpoint {
    /// Write the checkpoint, replacing any previous file atomically
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string(self)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Read a checkpoint; a missing file is [`Error::MissingCheckpoint`]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::MissingCheckpoint(path.display().to_string()));
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Directory of one training run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirectory {
    path: PathBuf,
}

impl RunDirectory {
    /// Create a fresh directory named after the current local time
    ///
    /// Runs started within the same second get a numeric suffix.
    pub fn create<P: AsRef<Path>>(results_dir: P) -> Result<Self> {
        let name = Local::now().format(RUN_NAME_FORMAT).to_string();
        Self::create_named(results_dir, &name)
    }

    /// Create a fresh directory with the given base name
    pub fn create_named<P: AsRef<Path>>(results_dir: P, name: &str) -> Result<Self> {
        let results_dir = results_dir.as_ref();
        fs::create_dir_all(results_dir)?;

        let mut path = results_dir.join(name);
        let mut suffix = 1;
        while path.exists() {
            path = results_dir.join(format!("{}_{}", name, suffix));
            suffix += 1;
        }
        fs::create_dir(&path)?;
        info!("Run directory: {}", path.display());
        Ok(Self { path })
    }

    /// Wrap an existing directory
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Most recent run (lexicographically last name) that holds a checkpoint
    pub fn latest<P: AsRef<Path>>(results_dir: P) -> Result<Self> {
        let results_dir = results_dir.as_ref();
        let missing = || Error::MissingCheckpoint(format!("no {} under {}", CHECKPOINT_FILE, results_dir.display()));

        let entries = fs::read_dir(results_dir).map_err(|_| missing())?;
        let mut runs: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.join(CHECKPOINT_FILE).is_file())
            .collect();
        runs.sort();

        let path = runs.pop().ok_or_else(missing)?;
        debug!("Latest run: {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.path.join(CHECKPOINT_FILE)
    }

    pub fn report_path(&self) -> PathBuf {
        self.path.join(REPORT_FILE)
    }

    /// Overwrite the run's best checkpoint
    pub fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<PathBuf> {
        let path = self.checkpoint_path();
        checkpoint.save(&path)?;
        info!(
            "Saved checkpoint (epoch {}, val acc {:.4}) to {}",
            checkpoint.epoch,
            checkpoint.val_accuracy,
            path.display()
        );
        Ok(path)
    }

    pub fn load_checkpoint(&self) -> Result<Checkpoint> {
        Checkpoint::load(self.checkpoint_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{DistanceFunction, ModelKind};
    use rand::prelude::*;
    use tempfile::tempdir;

    fn checkpoint(epoch: usize, seed: u64) -> Checkpoint {
        let mut rng = StdRng::seed_from_u64(seed);
        Checkpoint {
            epoch,
            val_accuracy: 0.5,
            model: ProtoModel::new(ModelKind::Dist, DistanceFunction::SquaredEuclidean, 2, 1, 3, 2, &mut rng)
                .unwrap(),
            optimizer: AdamW::new(0.01),
            config: Config::default(),
        }
    }

    #[test]
    fn test_save_overwrites_single_file() {
        let dir = tempdir().unwrap();
        let run = RunDirectory::create_named(dir.path(), "run").unwrap();

        run.save_checkpoint(&checkpoint(1, 1)).unwrap();
        let second = checkpoint(2, 2);
        run.save_checkpoint(&second).unwrap();

        let files: Vec<_> = fs::read_dir(run.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
        let loaded = run.load_checkpoint().unwrap();
        assert_eq!(loaded.epoch, 2);
        assert_eq!(loaded.model.prototypes(), second.model.prototypes());
    }

    #[test]
    fn test_missing_checkpoint_is_an_error() {
        let dir = tempdir().unwrap();
        let run = RunDirectory::create_named(dir.path(), "empty").unwrap();
        assert!(matches!(run.load_checkpoint(), Err(Error::MissingCheckpoint(_))));
        assert!(matches!(RunDirectory::latest(dir.path()), Err(Error::MissingCheckpoint(_))));
        assert!(matches!(
            RunDirectory::latest(dir.path().join("nowhere")),
            Err(Error::MissingCheckpoint(_))
        ));
    }

    #[test]
    fn test_latest_picks_last_run_with_checkpoint() {
        let dir = tempdir().unwrap();
        let older = RunDirectory::create_named(dir.path(), "2024-01-01_00-00-00").unwrap();
        let newer = RunDirectory::create_named(dir.path(), "2024-02-01_00-00-00").unwrap();
        RunDirectory::create_named(dir.path(), "2024-03-01_00-00-00").unwrap();

        older.save_checkpoint(&checkpoint(1, 1)).unwrap();
        newer.save_checkpoint(&checkpoint(2, 2)).unwrap();

        assert_eq!(RunDirectory::latest(dir.path()).unwrap(), newer);
    }

    #[test]
    fn test_same_name_gets_suffix() {
        let dir = tempdir().unwrap();
        let a = RunDirectory::create_named(dir.path(), "run").unwrap();
        let b = RunDirectory::create_named(dir.path(), "run").unwrap();
        assert_ne!(a, b);
        assert!(b.path().ends_with("run_1"));
    }
}
