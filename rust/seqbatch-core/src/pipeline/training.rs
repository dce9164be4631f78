// rust/seqbatch-core/src/pipeline/training.rs

use crate::batching::{BucketedBatcher, IrregularBatchFilter, LengthFilter};
use crate::config::TrainingConfig;
use crate::dataset::{BoxedDataset, DatasetExt, RandomShard, Transformation};
use crate::error::{PipelineError, Result};
use crate::example::Example;
use crate::length::LengthFn;
use crate::shapes::Shapes;

use super::ProcessFn;

/// Workers applying the process function when `num_threads` is unset.
pub const DEFAULT_TRAINING_THREADS: usize = 4;

/// Turns a dataset of `(features, labels)` examples into training batches.
///
/// Stages, in order: modulo sharding, shuffling (random shards of a known
/// dataset size followed by a bounded shuffle), preprocessing, length
/// filtering, bucketed batching, removal of batches not divisible by the
/// batch multiplier, repetition (unless `single_pass`) and prefetching.
///
/// Bucketing reorders examples, so batch order does not follow input order.
#[derive(Clone)]
pub struct TrainingPipeline {
    config: TrainingConfig,
    process_fn: Option<ProcessFn>,
    features_length_fn: Option<LengthFn>,
    labels_length_fn: Option<LengthFn>,
    padded_shapes: Option<Shapes>,
}

impl TrainingPipeline {
    pub fn new(config: TrainingConfig) -> Self {
        Self {
            config,
            process_fn: None,
            features_length_fn: None,
            labels_length_fn: None,
            padded_shapes: None,
        }
    }

    pub fn process_fn(mut self, process_fn: ProcessFn) -> Self {
        self.process_fn = Some(process_fn);
        self
    }

    pub fn features_length_fn(mut self, length_fn: LengthFn) -> Self {
        self.features_length_fn = Some(length_fn);
        self
    }

    pub fn labels_length_fn(mut self, length_fn: LengthFn) -> Self {
        self.labels_length_fn = Some(length_fn);
        self
    }

    /// Pads batches to these shapes instead of inferring them.
    pub fn padded_shapes(mut self, padded_shapes: Shapes) -> Self {
        self.padded_shapes = Some(padded_shapes);
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    fn shuffle(
        &self,
        dataset: BoxedDataset<Example>,
        buffer_size: i64,
        dataset_size: Option<usize>,
    ) -> Result<BoxedDataset<Example>> {
        let seed = self.config.seed;
        let Some(dataset_size) = dataset_size else {
            let buffer_size = usize::try_from(buffer_size).map_err(|_| {
                PipelineError::invalid_configuration(
                    "a negative shuffle_buffer_size requires dataset_size",
                )
            })?;
            return Ok(dataset.shuffle(buffer_size, seed));
        };

        let buffer_size = usize::try_from(buffer_size)
            .map_or(dataset_size, |size| size.min(dataset_size))
            .max(1);
        let dataset = if buffer_size < dataset_size {
            RandomShard::new(buffer_size, dataset_size)
                .with_seed(seed)
                .apply(dataset)?
        } else {
            dataset
        };
        Ok(dataset.shuffle(buffer_size, seed))
    }
}

impl Transformation<Example, Example> for TrainingPipeline {
    fn apply(&self, dataset: BoxedDataset<Example>) -> Result<BoxedDataset<Example>> {
        let config = &self.config;
        config.validate()?;

        let mut dataset = dataset;
        let mut dataset_size = config.dataset_size;
        if config.num_shards > 1 {
            dataset = dataset.shard(config.num_shards, config.shard_index)?;
            dataset_size = dataset_size.map(|size| size / config.num_shards);
        }
        if let Some(size) = dataset_size {
            tracing::info!("Training on {} examples", size);
        }

        if let Some(buffer_size) = config.shuffle_buffer_size.filter(|&size| size != 0) {
            dataset = self.shuffle(dataset, buffer_size, dataset_size)?;
        }

        if let Some(process_fn) = self.process_fn.clone() {
            let num_threads = config.num_threads.unwrap_or(DEFAULT_TRAINING_THREADS);
            dataset = dataset.map(move |example| process_fn(example), num_threads);
        }

        dataset = LengthFilter::new(
            config.maximum_features_length.clone(),
            config.maximum_labels_length.clone(),
            self.features_length_fn.clone(),
            self.labels_length_fn.clone(),
        )
        .apply(dataset)?;

        dataset = BucketedBatcher::new(config.batch_size)
            .batch_type(config.batch_type()?)
            .batch_multiplier(config.batch_multiplier)
            .batch_size_multiple(config.batch_size_multiple)
            .bucket_width(config.bucket_width)
            .features_length_fn(self.features_length_fn.clone())
            .labels_length_fn(self.labels_length_fn.clone())
            .padded_shapes(self.padded_shapes.clone())
            .apply(dataset)?;

        dataset = IrregularBatchFilter::new(config.batch_multiplier).apply(dataset)?;

        if !config.single_pass {
            dataset = dataset.repeat(None);
        }

        tracing::debug!(
            "Built training pipeline: batch_size={} batch_type={} bucket_width={:?} single_pass={}",
            config.batch_size,
            config.batch_type,
            config.bucket_width,
            config.single_pass
        );
        Ok(dataset.prefetch(config.prefetch_buffer_size))
    }
}
