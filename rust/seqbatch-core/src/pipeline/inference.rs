// rust/seqbatch-core/src/pipeline/inference.rs

use std::sync::Arc;

use crate::batching::{Batcher, GroupByWindow, KeyFn};
use crate::config::InferenceConfig;
use crate::dataset::{BoxedDataset, DatasetExt, ParallelMapConfig, Transformation};
use crate::error::{PipelineError, Result};
use crate::example::Example;
use crate::length::{Length, LengthFn};
use crate::shapes::infer_shapes;
use crate::tensor::Tensor;

use super::ProcessFn;

/// Field holding the input position of every example when the inference
/// pipeline reorders by length.
pub const INDEX_KEY: &str = "index";

/// Turns a dataset of feature dictionaries into inference batches.
///
/// With a positive `bucket_width`, examples are tagged with their input
/// position under [`INDEX_KEY`] and batched together with examples of
/// similar length. Batches then arrive out of input order; use
/// [`restore_order`] on the results.
#[derive(Clone)]
pub struct InferencePipeline {
    config: InferenceConfig,
    process_fn: Option<ProcessFn>,
    length_fn: Option<LengthFn>,
}

impl InferencePipeline {
    pub fn new(config: InferenceConfig) -> Self {
        Self {
            config,
            process_fn: None,
            length_fn: None,
        }
    }

    pub fn process_fn(mut self, process_fn: ProcessFn) -> Self {
        self.process_fn = Some(process_fn);
        self
    }

    pub fn length_fn(mut self, length_fn: LengthFn) -> Self {
        self.length_fn = Some(length_fn);
        self
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    fn reorder_by_length(
        &self,
        dataset: BoxedDataset<Example>,
        bucket_width: usize,
    ) -> Result<BoxedDataset<Example>> {
        let length_fn = self.length_fn.clone().ok_or_else(|| {
            PipelineError::invalid_configuration("length_fn is required when reordering by length")
        })?;
        match infer_shapes(&*dataset) {
            Ok(shapes) if !shapes.is_dict() => {
                return Err(PipelineError::invalid_configuration(
                    "dataset elements must be dictionaries",
                ));
            }
            Ok(_) | Err(PipelineError::EmptySource { .. }) => {}
            Err(e) => return Err(e),
        }

        let tagged = dataset.enumerate().map(
            |(index, mut example): (usize, Example)| {
                example.insert(INDEX_KEY, Tensor::scalar_i64(index as i64))?;
                Ok(example)
            },
            1,
        );
        let key_fn: KeyFn = Arc::new(move |example: &Example| {
            Ok(match length_fn(example)? {
                Length::Single(length) => (length / bucket_width) as u64,
                Length::Multi(_) => 0,
            })
        });
        let batch_size = self.config.batch_size;
        GroupByWindow::with_fixed_window(key_fn, batch_size, batch_size).apply(tagged)
    }
}

impl Transformation<Example, Example> for InferencePipeline {
    fn apply(&self, dataset: BoxedDataset<Example>) -> Result<BoxedDataset<Example>> {
        let config = &self.config;
        config.validate()?;

        let mut dataset = dataset;
        if let Some(process_fn) = self.process_fn.clone() {
            let num_threads = config
                .num_threads
                .unwrap_or_else(|| ParallelMapConfig::auto().num_threads);
            dataset = dataset.map(move |example| process_fn(example), num_threads);
        }

        dataset = match config.bucket_width.filter(|&width| width > 0) {
            Some(bucket_width) => self.reorder_by_length(dataset, bucket_width)?,
            None => Batcher::new(config.batch_size).apply(dataset)?,
        };

        tracing::debug!(
            "Built inference pipeline: batch_size={} bucket_width={:?}",
            config.batch_size,
            config.bucket_width
        );
        Ok(dataset.prefetch(config.prefetch_buffer_size))
    }
}

/// Splits inference batches back into examples sorted by their
/// [`INDEX_KEY`] field.
///
/// # Errors
///
/// Returns [`PipelineError::Structure`] if an example has no scalar index.
pub fn restore_order(batches: impl IntoIterator<Item = Example>) -> Result<Vec<Example>> {
    let mut indexed = Vec::new();
    for batch in batches {
        for example in batch.unbatch()? {
            let index = example
                .tensor(INDEX_KEY)
                .and_then(Tensor::to_scalar_i64)
                .ok_or_else(|| {
                    PipelineError::structure(format!("example has no scalar '{}' field", INDEX_KEY))
                })?;
            indexed.push((index, example));
        }
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, example)| example).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::InMemoryDataset;
    use crate::length::length_fn;
    use crate::pipeline::process_fn;

    fn record(len: usize) -> Example {
        Example::dict([
            ("ids", Tensor::from_i64((1..=len as i64).collect())),
            ("length", Tensor::scalar_i64(len as i64)),
        ])
    }

    fn record_len() -> LengthFn {
        length_fn(|e: &Example| {
            e.tensor("length")
                .and_then(|t| t.to_scalar_i64())
                .map(|l| Length::Single(l as usize))
                .ok_or_else(|| PipelineError::structure("missing length"))
        })
    }

    fn source(lengths: &[usize]) -> BoxedDataset<Example> {
        InMemoryDataset::new(lengths.iter().map(|&len| record(len)).collect()).boxed()
    }

    fn bucketed(batch_size: usize, bucket_width: usize) -> InferenceConfig {
        InferenceConfig {
            batch_size,
            bucket_width: Some(bucket_width),
            prefetch_buffer_size: Some(0),
            ..Default::default()
        }
    }

    fn collect(dataset: BoxedDataset<Example>) -> Vec<Example> {
        dataset.iter().unwrap().map(|b| b.unwrap()).collect()
    }

    fn lengths(examples: &[Example]) -> Vec<i64> {
        examples
            .iter()
            .map(|e| e.tensor("length").unwrap().to_scalar_i64().unwrap())
            .collect()
    }

    #[test]
    fn test_plain_batching_keeps_order() {
        let config = InferenceConfig {
            batch_size: 2,
            ..Default::default()
        };
        let batches = collect(InferencePipeline::new(config).apply(source(&[3, 1, 2])).unwrap());
        assert_eq!(batches.len(), 2);
        assert!(batches[0].tensor(INDEX_KEY).is_none());
        assert_eq!(batches[0].tensor("length").unwrap().as_i64().unwrap(), &[3, 1]);
    }

    #[test]
    fn test_bucketing_injects_index_and_restores_order() {
        let input = [12, 1, 9, 2, 11, 3, 10];
        let pipeline = InferencePipeline::new(bucketed(2, 5)).length_fn(record_len());
        let batches = collect(pipeline.apply(source(&input)).unwrap());

        // Lengths 1 and 2 fill bucket 0 first
        let first = batches[0].tensor(INDEX_KEY).unwrap().as_i64().unwrap().to_vec();
        assert_eq!(first, vec![1, 3]);

        let restored = restore_order(batches).unwrap();
        let indices: Vec<_> = restored
            .iter()
            .map(|e| e.tensor(INDEX_KEY).unwrap().to_scalar_i64().unwrap())
            .collect();
        assert_eq!(indices, (0..input.len() as i64).collect::<Vec<_>>());
        assert_eq!(lengths(&restored), input.iter().map(|&l| l as i64).collect::<Vec<_>>());
    }

    #[test]
    fn test_bucketing_requires_length_fn() {
        let err = InferencePipeline::new(bucketed(2, 5))
            .apply(source(&[1]))
            .err()
            .unwrap();
        assert!(err.is_invalid_configuration());
        assert!(err.to_string().contains("length_fn"));
    }

    #[test]
    fn test_bucketing_requires_dictionaries() {
        let dataset = InMemoryDataset::new(vec![Example::Tensor(Tensor::from_i64(vec![1, 2]))]).boxed();
        let pipeline = InferencePipeline::new(bucketed(2, 5)).length_fn(record_len());
        let err = pipeline.apply(dataset).err().unwrap();
        assert!(err.is_invalid_configuration());
        assert!(err.to_string().contains("dictionaries"));
    }

    #[test]
    fn test_zero_bucket_width_means_no_reordering() {
        let batches = collect(
            InferencePipeline::new(bucketed(4, 0))
                .apply(source(&[9, 1, 5]))
                .unwrap(),
        );
        assert_eq!(batches.len(), 1);
        assert!(batches[0].tensor(INDEX_KEY).is_none());
    }

    #[test]
    fn test_process_fn_runs_before_tagging() {
        let add_field = process_fn(|mut example: Example| {
            example.insert("mask", Tensor::scalar_i64(1))?;
            Ok(example)
        });
        let config = InferenceConfig {
            num_threads: Some(2),
            ..bucketed(8, 100)
        };
        let pipeline = InferencePipeline::new(config)
            .process_fn(add_field)
            .length_fn(record_len());
        let batches = collect(pipeline.apply(source(&[4, 2])).unwrap());
        let batch = &batches[0];
        assert_eq!(batch.tensor("mask").unwrap().as_i64().unwrap(), &[1, 1]);
        assert_eq!(batch.tensor(INDEX_KEY).unwrap().as_i64().unwrap(), &[0, 1]);
        assert_eq!(batch.tensor("ids").unwrap().shape(), &[2, 4]);
    }

    #[test]
    fn test_multi_source_lengths_share_one_bucket() {
        let per_source = length_fn(|e: &Example| {
            let length = e.tensor("length").unwrap().to_scalar_i64().unwrap() as usize;
            Ok(Length::Multi(vec![length, length]))
        });
        let pipeline = InferencePipeline::new(bucketed(2, 3)).length_fn(per_source);
        assert_eq!(pipeline.config().bucket_width, Some(3));

        let batches = collect(pipeline.apply(source(&[9, 1, 5, 2])).unwrap());
        let indices: Vec<Vec<i64>> = batches
            .iter()
            .map(|b| b.tensor(INDEX_KEY).unwrap().as_i64().unwrap().to_vec())
            .collect();
        assert_eq!(indices, vec![vec![0, 1], vec![2, 3]]);
    }

    #[test]
    fn test_empty_input_yields_no_batches() {
        let pipeline = InferencePipeline::new(bucketed(2, 5)).length_fn(record_len());
        assert!(collect(pipeline.apply(source(&[])).unwrap()).is_empty());
    }

    #[test]
    fn test_restore_order_requires_index() {
        let batch = unindexed_batch();
        assert!(matches!(
            restore_order(vec![batch]),
            Err(PipelineError::Structure { .. })
        ));
    }

    fn unindexed_batch() -> Example {
        Example::dict([("ids", Tensor::from_i64(vec![1, 2]))])
    }
}
