//! Prototype projection
//!
//! Maps every learned prototype to its nearest training example (and, for
//! token-level models, the closest token window inside it), decodes that
//! span back to text and pairs it with the prototype's classifier weights.
//! Projection only reads the model.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;
use tracing::{info, warn};

use crate::encoder::{has_unknown, EmbeddingSet, TextEncoder};
use crate::error::{Error, Result};
use crate::network::ProtoModel;

/// Closest pool example of a prototype
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Index into the pool
    pub example: usize,
    /// First token of the closest window
    pub window_start: usize,
    pub distance: f64,
}

/// Projection of one prototype
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionRecord {
    pub prototype: usize,
    /// Index of the nearest training example
    pub example: usize,
    /// Token span `[start, end)` for token-level models, clipped to the
    /// example's tokens
    pub span: Option<(usize, usize)>,
    pub distance: f64,
    pub text: String,
    /// Classifier weight per class
    pub weights: Vec<f64>,
}

/// Nearest pool example of every prototype; the lowest index wins ties
pub fn nearest_neighbors(model: &ProtoModel, pool: &EmbeddingSet) -> Result<Vec<Neighbor>> {
    if !model.kind().has_prototypes() {
        return Err(Error::ConfigError(format!("{} model has no prototypes to project", model.kind())));
    }
    if pool.is_empty() {
        return Err(Error::DataError("projection pool is empty".to_string()));
    }
    let activations = model.pool_distances(pool)?;

    let neighbors = (0..model.num_prototypes())
        .map(|j| {
            let column = activations.distances.column(j);
            let (example, distance) = column
                .iter()
                .enumerate()
                .fold((0, f64::INFINITY), |best, (i, &d)| if d < best.1 { (i, d) } else { best });
            Neighbor {
                example,
                window_start: activations.window_starts[[example, j]],
                distance,
            }
        })
        .collect();
    Ok(neighbors)
}

/// Project every prototype onto the training pool and decode it
///
/// `texts` are the raw training texts aligned with `pool`.
pub fn project(
    model: &ProtoModel,
    pool: &EmbeddingSet,
    texts: &[String],
    encoder: &dyn TextEncoder,
) -> Result<Vec<ProjectionRecord>> {
    if texts.len() != pool.len() {
        return Err(Error::shape("projection texts", pool.len(), texts.len()));
    }
    let neighbors = nearest_neighbors(model, pool)?;
    let weights = model.prototype_weights();
    let proto_size = model.layer().proto_size();

    let records = neighbors
        .iter()
        .enumerate()
        .map(|(j, neighbor)| {
            let (span, text) = if model.kind().is_token_level() {
                let ids = encoder
                    .tokenize(std::slice::from_ref(&texts[neighbor.example]))
                    .pop()
                    .unwrap_or_default();
                let start = neighbor.window_start.min(ids.len());
                let end = (neighbor.window_start + proto_size).min(ids.len());
                let window = &ids[start..end];
                if has_unknown(window) {
                    warn!("Prototype {} decodes to tokens outside the vocabulary", j);
                }
                (Some((start, end)), encoder.decode(window))
            } else {
                (None, texts[neighbor.example].clone())
            };

            ProjectionRecord {
                prototype: j,
                example: neighbor.example,
                span,
                distance: neighbor.distance,
                text,
                weights: weights.row(j).to_vec(),
            }
        })
        .collect();

    Ok(records)
}

/// Report text: one line per prototype with its source, then one line per
/// prototype with its class weights
pub fn render_report(records: &[ProjectionRecord]) -> Result<String> {
    let mut out = String::new();
    for record in records {
        let text = serde_json::to_string(&record.text)?;
        let written = match record.span {
            Some((start, end)) => writeln!(out, "[{}, {}, {}, {}]", record.example, text, start, end),
            None => writeln!(out, "[{}, {}]", record.example, text),
        };
        written.map_err(|e| Error::DataError(e.to_string()))?;
    }
    for record in records {
        let weights: Vec<String> = record.weights.iter().map(|w| format!("{}", w)).collect();
        writeln!(out, "[{}]", weights.join(", ")).map_err(|e| Error::DataError(e.to_string()))?;
    }
    Ok(out)
}

/// Write the report, replacing any previous one
pub fn write_report<P: AsRef<Path>>(records: &[ProjectionRecord], path: P) -> Result<()> {
    let path = path.as_ref();
    std::fs::write(path, render_report(records)?)?;
    info!("Wrote {} prototype projections to {}", records.len(), path.display());
    Ok(())
}
