//! Labeled text datasets and splits
//!
//! Texts are loaded from tab-separated lines and split into stratified
//! train, validation and test sets. Review files carry integer labels
//! (`label<TAB>text`); toxicity files carry a score in `[0, 1]`
//! (`score<TAB>text`) that is thresholded into non-toxic (0) and toxic (1).

use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::error::{Error, Result};

/// Toxicity scores at or above this are labeled toxic
pub const TOXIC_THRESHOLD: f64 = 0.5;

/// Layout of a dataset file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DatasetName {
    /// Integer class labels
    #[default]
    Reviews,
    /// Toxicity scores in `[0, 1]`
    Toxicity,
}

/// Texts with integer class labels
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub texts: Vec<String>,
    pub labels: Vec<usize>,
}

/// Train, validation and test parts of a dataset
#[derive(Debug, Clone)]
pub struct DataSplits {
    pub train: Dataset,
    pub val: Dataset,
    pub test: Dataset,
}

impl Dataset {
    pub fn new(texts: Vec<String>, labels: Vec<usize>) -> Result<Self> {
        if texts.len() != labels.len() {
            return Err(Error::DataError(format!(
                "{} texts but {} labels",
                texts.len(),
                labels.len()
            )));
        }
        Ok(Self { texts, labels })
    }

    /// Load a dataset file of the given layout
    ///
    /// With `discard`, toxicity examples scored strictly between 0 and 1 are
    /// left out. Review files have no such cases and ignore the flag.
    pub fn load<P: AsRef<Path>>(path: P, name: DatasetName, discard: bool) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let dataset = match name {
            DatasetName::Reviews => Self::parse_tsv(&content)?,
            DatasetName::Toxicity => Self::parse_toxicity(&content, discard)?,
        };
        info!("Loaded {} examples from {}", dataset.len(), path.display());
        Ok(dataset)
    }

    /// Load `label<TAB>text` lines; blank lines and `#` comments are skipped
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load(path, DatasetName::Reviews, false)
    }

    /// Parse `label<TAB>text` content
    pub fn parse_tsv(content: &str) -> Result<Self> {
        let mut texts = Vec::new();
        let mut labels = Vec::new();

        for (line_no, field, text) in records(content)? {
            let label = field
                .parse::<usize>()
                .map_err(|e| Error::DataError(format!("line {}: bad label {:?}: {}", line_no, field, e)))?;
            labels.push(label);
            texts.push(text.to_string());
        }

        Ok(Self { texts, labels })
    }

    /// Parse `score<TAB>text` content
    pub fn parse_toxicity(content: &str, discard: bool) -> Result<Self> {
        let mut texts = Vec::new();
        let mut labels = Vec::new();
        let mut discarded = 0;

        for (line_no, field, text) in records(content)? {
            let score = field
                .parse::<f64>()
                .map_err(|e| Error::DataError(format!("line {}: bad score {:?}: {}", line_no, field, e)))?;
            if !(0.0..=1.0).contains(&score) {
                return Err(Error::DataError(format!(
                    "line {}: toxicity score {} outside [0, 1]",
                    line_no, score
                )));
            }
            if discard && score > 0.0 && score < 1.0 {
                discarded += 1;
                continue;
            }
            labels.push(usize::from(score >= TOXIC_THRESHOLD));
            texts.push(text.to_string());
        }

        if discarded > 0 {
            info!("Discarded {} ambiguous toxicity examples", discarded);
        }
        Ok(Self { texts, labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Subset in the given order
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            texts: indices.iter().map(|&i| self.texts[i].clone()).collect(),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }

    /// Number of examples per class, indexed by label
    pub fn class_counts(&self, num_classes: usize) -> Vec<usize> {
        let mut counts = vec![0; num_classes];
        for &label in &self.labels {
            if label < num_classes {
                counts[label] += 1;
            }
        }
        counts
    }

    /// Cross-entropy weights `1 - fraction` per class
    pub fn class_weights(&self, num_classes: usize) -> Result<Vec<f64>> {
        if self.is_empty() {
            return Err(Error::DataError("class weights of an empty dataset".to_string()));
        }
        if let Some(&bad) = self.labels.iter().find(|&&l| l >= num_classes) {
            return Err(Error::ConfigError(format!(
                "label {} found but num_classes is {}",
                bad, num_classes
            )));
        }
        let total = self.len() as f64;
        Ok(self
            .class_counts(num_classes)
            .into_iter()
            .map(|count| 1.0 - count as f64 / total)
            .collect())
    }

    /// Stratified split; each class is shuffled and divided by the fractions
    pub fn split<R: Rng>(&self, val_fraction: f64, test_fraction: f64, rng: &mut R) -> Result<DataSplits> {
        if val_fraction <= 0.0 || test_fraction <= 0.0 || val_fraction + test_fraction >= 1.0 {
            return Err(Error::ConfigError(format!(
                "invalid split fractions val={} test={}",
                val_fraction, test_fraction
            )));
        }

        let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (idx, &label) in self.labels.iter().enumerate() {
            by_class.entry(label).or_default().push(idx);
        }

        let mut train = Vec::new();
        let mut val = Vec::new();
        let mut test = Vec::new();
        for indices in by_class.values_mut() {
            indices.shuffle(rng);
            let n = indices.len();
            let n_test = (n as f64 * test_fraction).round() as usize;
            let n_val = (n as f64 * val_fraction).round() as usize;
            let n_holdout = (n_test + n_val).min(n);
            let n_test = n_test.min(n_holdout);

            test.extend_from_slice(&indices[..n_test]);
            val.extend_from_slice(&indices[n_test..n_holdout]);
            train.extend_from_slice(&indices[n_holdout..]);
        }
        train.shuffle(rng);
        val.shuffle(rng);
        test.shuffle(rng);

        let splits = DataSplits {
            train: self.select(&train),
            val: self.select(&val),
            test: self.select(&test),
        };
        info!(
            "Split {} examples into {} train / {} val / {} test",
            self.len(),
            splits.train.len(),
            splits.val.len(),
            splits.test.len()
        );
        Ok(splits)
    }

    /// Random subset of at most `size` examples
    pub fn subsample<R: Rng>(&self, size: usize, rng: &mut R) -> Self {
        if size >= self.len() {
            return self.clone();
        }
        let indices = rand::seq::index::sample(rng, self.len(), size).into_vec();
        self.select(&indices)
    }
}

/// Non-comment lines as `(line number, first field, text)`
fn records(content: &str) -> Result<Vec<(usize, &str, &str)>> {
    let mut out = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let (field, text) = line
            .split_once('\t')
            .ok_or_else(|| Error::DataError(format!("line {}: expected <field><TAB>text", idx + 1)))?;
        out.push((idx + 1, field.trim(), text.trim()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn dataset(n0: usize, n1: usize) -> Dataset {
        let labels: Vec<usize> = std::iter::repeat(0).take(n0).chain(std::iter::repeat(1).take(n1)).collect();
        let texts = (0..labels.len()).map(|i| format!("text {}", i)).collect();
        Dataset::new(texts, labels).unwrap()
    }

    #[test]
    fn test_parse_tsv() {
        let data = Dataset::parse_tsv("# header\n1\tgreat movie\n\n0\tboring plot\r\n").unwrap();
        assert_eq!(data.labels, vec![1, 0]);
        assert_eq!(data.texts, vec!["great movie", "boring plot"]);
    }

    #[test]
    fn test_parse_tsv_rejects_malformed_lines() {
        assert!(Dataset::parse_tsv("no tab here\n").is_err());
        assert!(Dataset::parse_tsv("x\ttext\n").is_err());
    }

    #[test]
    fn test_parse_toxicity_thresholds_scores() {
        let content = "0.0\tnice\n0.3\tmeh\n0.5\trude\n1\tawful\n";
        let data = Dataset::parse_toxicity(content, false).unwrap();
        assert_eq!(data.labels, vec![0, 0, 1, 1]);
        assert_eq!(data.texts, vec!["nice", "meh", "rude", "awful"]);
    }

    #[test]
    fn test_discard_drops_edge_cases() {
        let content = "0\tnice\n0.3\tmeh\n0.8\trude\n1.0\tawful\n";
        let data = Dataset::parse_toxicity(content, true).unwrap();
        assert_eq!(data.labels, vec![0, 1]);
        assert_eq!(data.texts, vec!["nice", "awful"]);
    }

    #[test]
    fn test_toxicity_score_out_of_range() {
        assert!(Dataset::parse_toxicity("1.5\ttext\n", false).is_err());
        assert!(Dataset::parse_toxicity("toxic\ttext\n", false).is_err());
    }

    #[test]
    fn test_load_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toxicity.tsv");
        std::fs::write(&path, "0.2\tfine\n1\tbad\n").unwrap();

        assert_eq!(Dataset::load(&path, DatasetName::Toxicity, true).unwrap().len(), 1);
        assert_eq!(Dataset::load(&path, DatasetName::Toxicity, false).unwrap().len(), 2);
        assert!(Dataset::load(&path, DatasetName::Reviews, false).is_err());
    }

    #[test]
    fn test_class_weights_binary() {
        let data = dataset(75, 25);
        let weights = data.class_weights(2).unwrap();
        assert_relative_eq!(weights[0], 0.25);
        assert_relative_eq!(weights[1], 0.75);
        assert!(data.class_weights(1).unwrap_err().is_config());
    }

    #[test]
    fn test_split_is_stratified_and_disjoint() {
        let data = dataset(60, 40);
        let mut rng = StdRng::seed_from_u64(0);
        let splits = data.split(0.15, 0.15, &mut rng).unwrap();

        assert_eq!(splits.train.len() + splits.val.len() + splits.test.len(), 100);
        assert_eq!(splits.test.class_counts(2), vec![9, 6]);
        assert_eq!(splits.val.class_counts(2), vec![9, 6]);
        assert_eq!(splits.train.class_counts(2), vec![42, 28]);

        let mut all: Vec<&String> = splits
            .train
            .texts
            .iter()
            .chain(&splits.val.texts)
            .chain(&splits.test.texts)
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 100);
    }

    #[test]
    fn test_split_keeps_text_label_pairs() {
        let texts = (0..30).map(|i| format!("{}", i)).collect();
        let labels = (0..30).map(|i| i % 3).collect();
        let data = Dataset::new(texts, labels).unwrap();
        let splits = data.split(0.2, 0.2, &mut StdRng::seed_from_u64(4)).unwrap();
        for part in [&splits.train, &splits.val, &splits.test] {
            for (text, &label) in part.texts.iter().zip(&part.labels) {
                assert_eq!(text.parse::<usize>().unwrap() % 3, label);
            }
        }
    }

    #[test]
    fn test_subsample() {
        let data = dataset(150, 150);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(data.subsample(100, &mut rng).len(), 100);
        assert_eq!(data.subsample(1000, &mut rng).len(), 300);
    }

    #[test]
    fn test_length_mismatch() {
        assert!(Dataset::new(vec!["a".to_string()], vec![]).is_err());
    }
}
