// rust/seqbatch-core/src/pipeline/mod.rs

//! End-to-end input pipelines.
//!
//! A pipeline is a [`Transformation`](crate::dataset::Transformation) that
//! turns a dataset of raw examples into a dataset of padded batches. Every
//! configuration problem is reported by `apply`, before any element is
//! consumed.
//!
//! # Example
//!
//! ```ignore
//! use seqbatch_core::{DatasetExt, InMemoryDataset, TrainingConfig, TrainingPipeline};
//!
//! let config = TrainingConfig {
//!     batch_size: 32,
//!     bucket_width: Some(5),
//!     single_pass: true,
//!     ..Default::default()
//! };
//! let pipeline = TrainingPipeline::new(config)
//!     .features_length_fn(features_length)
//!     .labels_length_fn(labels_length);
//!
//! let batches = InMemoryDataset::new(examples).boxed().apply(&pipeline)?;
//! for batch in batches.iter()? {
//!     let batch = batch?;
//! }
//! ```

use std::sync::Arc;

use crate::error::Result;
use crate::example::Example;

mod inference;
mod training;

pub use inference::{restore_order, InferencePipeline, INDEX_KEY};
pub use training::{TrainingPipeline, DEFAULT_TRAINING_THREADS};

/// Per-example preprocessing applied before batching.
pub type ProcessFn = Arc<dyn Fn(Example) -> Result<Example> + Send + Sync>;

/// Wraps a closure as a [`ProcessFn`].
pub fn process_fn<F>(f: F) -> ProcessFn
where
    F: Fn(Example) -> Result<Example> + Send + Sync + 'static,
{
    Arc::new(f)
}
