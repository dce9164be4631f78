// rust/seqbatch-core/src/batching/filters.rs

use std::sync::Arc;

use crate::dataset::{BoxedDataset, DatasetExt, Transformation};
use crate::error::{PipelineError, Result};
use crate::example::Example;
use crate::length::{Length, LengthFn, LengthLimit};

/// Drops batches whose size is not a multiple of `multiple`.
///
/// Consumers that split a batch across replicas need the batch size to be
/// divisible by the replica count; trailing batches that are not are
/// discarded rather than padded. With `multiple == 1` this is the identity.
#[derive(Debug, Clone, Copy)]
pub struct IrregularBatchFilter {
    multiple: usize,
}

impl IrregularBatchFilter {
    pub fn new(multiple: usize) -> Self {
        Self {
            multiple: multiple.max(1),
        }
    }

    /// Whether a batch of `batch_size` examples is kept.
    pub fn accepts(&self, batch_size: usize) -> bool {
        batch_size % self.multiple == 0
    }
}

impl Transformation<Example, Example> for IrregularBatchFilter {
    fn apply(&self, dataset: BoxedDataset<Example>) -> Result<BoxedDataset<Example>> {
        if self.multiple == 1 {
            return Ok(dataset);
        }
        let filter = *self;
        Ok(dataset.filter(move |batch| {
            let size = batch
                .batch_size()
                .ok_or_else(|| PipelineError::structure("batch has no batch axis"))?;
            let keep = filter.accepts(size);
            if !keep {
                tracing::debug!(
                    "Dropping batch of {} examples (not a multiple of {})",
                    size,
                    filter.multiple
                );
            }
            Ok(keep)
        }))
    }
}

/// Rejects parallel examples whose lengths are empty or exceed a maximum.
///
/// An example is kept when every measured length is positive and within its
/// maximum. Multi-source features are measured per source and matched to
/// per-source maxima by position; sources without a configured maximum are
/// only required to be non-empty.
#[derive(Clone, Default)]
pub struct LengthFilter {
    maximum_features_length: Option<LengthLimit>,
    maximum_labels_length: Option<LengthLimit>,
    features_length_fn: Option<LengthFn>,
    labels_length_fn: Option<LengthFn>,
}

impl LengthFilter {
    pub fn new(
        maximum_features_length: Option<LengthLimit>,
        maximum_labels_length: Option<LengthLimit>,
        features_length_fn: Option<LengthFn>,
        labels_length_fn: Option<LengthFn>,
    ) -> Self {
        Self {
            maximum_features_length,
            maximum_labels_length,
            features_length_fn,
            labels_length_fn,
        }
    }

    /// Evaluates the constraints on one `(features, labels)` example.
    pub fn accepts(&self, example: &Example) -> Result<bool> {
        let (features, labels) = example.as_pair()?;
        if let Some(length_fn) = &self.features_length_fn {
            let length = length_fn(features)?;
            if !within_limits(&length, self.maximum_features_length.as_ref()) {
                return Ok(false);
            }
        }
        if let Some(length_fn) = &self.labels_length_fn {
            let length = length_fn(labels)?;
            if !within_limits(&length, self.maximum_labels_length.as_ref()) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// `0 < length <= maximum` for every position, unset maxima meaning no
/// upper bound.
pub fn within_limits(length: &Length, maximum: Option<&LengthLimit>) -> bool {
    let lengths = length.as_slice();
    let maxima = LengthLimit::per_position(maximum, lengths.len());
    lengths
        .iter()
        .zip(maxima)
        .all(|(&len, max)| len > 0 && max.map_or(true, |max| len <= max))
}

impl Transformation<Example, Example> for LengthFilter {
    fn apply(&self, dataset: BoxedDataset<Example>) -> Result<BoxedDataset<Example>> {
        if self.features_length_fn.is_none() && self.labels_length_fn.is_none() {
            return Ok(dataset);
        }
        let filter = Arc::new(self.clone());
        Ok(dataset.filter(move |example| filter.accepts(example)))
    }
}
