//! Data module for loading and splitting labeled texts

mod dataset;

pub use dataset::{DataSplits, Dataset, DatasetName, TOXIC_THRESHOLD};
