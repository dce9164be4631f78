// rust/seqbatch-core/tests/pipelines.rs

use std::collections::BTreeMap;

use seqbatch_core::batching::token_window_size;
use seqbatch_core::dataset::random_shard_offsets;
use seqbatch_core::{
    length_fn, restore_order, BatchType, BoxedDataset, BucketedBatcher, DatasetExt, Example,
    InMemoryDataset, InferenceConfig, InferencePipeline, IrregularBatchFilter, Length, LengthFn,
    PipelineError, RandomShard, TrainingConfig, TrainingPipeline, Tensor, Transformation,
    INDEX_KEY,
};

fn record(id: i64, len: usize) -> Example {
    Example::dict([
        ("ids", Tensor::from_i64(vec![id + 1; len])),
        ("id", Tensor::scalar_i64(id)),
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

fn parallel_corpus(lengths: &[usize]) -> BoxedDataset<Example> {
    InMemoryDataset::new(
        lengths
            .iter()
            .enumerate()
            .map(|(i, &len)| Example::pair(record(i as i64, len), record(i as i64, len)))
            .collect(),
    )
    .boxed()
}

fn collect(dataset: &BoxedDataset<Example>) -> Vec<Example> {
    dataset.iter().unwrap().map(|b| b.unwrap()).collect()
}

fn feature_ids(batch: &Example) -> Vec<i64> {
    let (features, _) = batch.as_pair().unwrap();
    features.tensor("id").unwrap().as_i64().unwrap().to_vec()
}

#[test]
fn irregular_filter_keeps_divisible_batches_in_order() {
    let sizes = [6, 4, 2, 7, 12, 3];
    let batches = InMemoryDataset::new(
        sizes
            .iter()
            .map(|&s| Example::dict([("x", Tensor::from_i64(vec![0; s]))]))
            .collect(),
    )
    .boxed()
    .apply(&IrregularBatchFilter::new(3))
    .unwrap();
    let kept: Vec<_> = collect(&batches)
        .iter()
        .map(|b| b.batch_size().unwrap())
        .collect();
    assert_eq!(kept, vec![6, 12, 3]);
}

#[test]
fn random_shard_shuffle_emits_contiguous_runs() {
    let shard_size = 4;
    let dataset_size = 18;
    let shuffled = InMemoryDataset::new((0..dataset_size).collect::<Vec<usize>>())
        .boxed()
        .apply(&RandomShard::new(shard_size, dataset_size).with_seed(Some(11)))
        .unwrap();
    let values: Vec<usize> = shuffled.iter().unwrap().map(|r| r.unwrap()).collect();

    let mut sorted = values.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, (0..dataset_size).collect::<Vec<_>>());

    // Every run starts at a shard offset and counts up until the next shard
    let offsets = random_shard_offsets(shard_size, dataset_size);
    let mut position = 0;
    while position < values.len() {
        let start = values[position];
        assert!(offsets.contains(&start));
        let mut run = 1;
        while position + run < values.len()
            && values[position + run] == start + run
            && !offsets.contains(&values[position + run])
        {
            run += 1;
        }
        assert!(run <= shard_size);
        position += run;
    }
}

#[test]
fn examples_mode_bucketing() {
    let batcher = BucketedBatcher::new(4)
        .bucket_width(Some(5))
        .features_length_fn(Some(record_len()));
    let batches = parallel_corpus(&[1, 2, 3, 6, 7, 8, 9, 11])
        .apply(&batcher)
        .unwrap();

    let mut by_lengths: Vec<Vec<i64>> = collect(&batches)
        .iter()
        .map(|b| {
            let (features, _) = b.as_pair().unwrap();
            features.tensor("length").unwrap().as_i64().unwrap().to_vec()
        })
        .collect();
    assert_eq!(by_lengths[0], vec![6, 7, 8, 9]);
    by_lengths.sort();
    assert_eq!(by_lengths, vec![vec![1, 2, 3], vec![6, 7, 8, 9], vec![11]]);
}

#[test]
fn tokens_mode_window_sizes_decrease_with_bucket() {
    assert_eq!(token_window_size(0, 100, 10, 1, 1), 10);
    assert_eq!(token_window_size(1, 100, 10, 1, 1), 5);
    let mut previous = usize::MAX;
    for key in 0..50 {
        let size = token_window_size(key, 100, 10, 1, 1);
        assert!(size <= previous);
        previous = size;
    }
}

#[test]
fn tokens_mode_batches_bound_padded_volume() {
    let batcher = BucketedBatcher::new(60)
        .batch_type(BatchType::Tokens)
        .bucket_width(Some(10))
        .features_length_fn(Some(record_len()))
        .labels_length_fn(Some(record_len()));
    let lengths: Vec<usize> = (0..200).map(|i| 1 + (i * 7) % 39).collect();
    let batches = parallel_corpus(&lengths).apply(&batcher).unwrap();

    let mut seen = 0;
    for batch in collect(&batches) {
        let (features, _) = batch.as_pair().unwrap();
        let padded = features.tensor("ids").unwrap().shape().to_vec();
        seen += padded[0];
        let key = (padded[1] / 10) as u64;
        assert!(padded[0] <= token_window_size(key, 60, 10, 1, 1));
    }
    assert_eq!(seen, lengths.len());
}

#[test]
fn training_single_pass_terminates_and_repeats_otherwise() {
    let base = TrainingConfig {
        batch_size: 3,
        bucket_width: Some(4),
        prefetch_buffer_size: Some(2),
        ..Default::default()
    };
    let lengths = [1, 5, 2, 9, 3, 6, 4, 8];

    let single = TrainingPipeline::new(TrainingConfig {
        single_pass: true,
        ..base.clone()
    })
    .features_length_fn(record_len());
    let one_pass = collect(&parallel_corpus(&lengths).apply(&single).unwrap());
    let mut ids: Vec<i64> = one_pass.iter().flat_map(feature_ids).collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..lengths.len() as i64).collect::<Vec<_>>());

    let endless = TrainingPipeline::new(base).features_length_fn(record_len());
    let cycles = one_pass.len() * 3;
    let repeated = collect(&parallel_corpus(&lengths).apply(&endless).unwrap().take(cycles));
    assert_eq!(repeated.len(), cycles);

    let mut per_pass: BTreeMap<i64, usize> = BTreeMap::new();
    for id in repeated.iter().flat_map(feature_ids) {
        *per_pass.entry(id).or_default() += 1;
    }
    assert!(per_pass.values().all(|&count| count == 3));
}

#[test]
fn training_with_shuffle_and_multiplier() {
    let config = TrainingConfig {
        batch_size: 2,
        batch_multiplier: 2,
        dataset_size: Some(40),
        shuffle_buffer_size: Some(8),
        single_pass: true,
        seed: Some(5),
        ..Default::default()
    };
    let pipeline = TrainingPipeline::new(config);
    let batches = collect(&parallel_corpus(&[3; 40]).apply(&pipeline).unwrap());
    assert_eq!(batches.len(), 10);
    assert!(batches.iter().all(|b| b.batch_size() == Some(4)));

    let mut ids: Vec<i64> = batches.iter().flat_map(feature_ids).collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..40).collect::<Vec<_>>());
}

#[test]
fn inference_index_restores_input_order() {
    let lengths = [7, 2, 14, 3, 9, 1, 12, 5, 6];
    let source = InMemoryDataset::new(
        lengths
            .iter()
            .enumerate()
            .map(|(i, &len)| record(i as i64, len))
            .collect(),
    )
    .boxed();
    let config = InferenceConfig {
        batch_size: 2,
        bucket_width: Some(4),
        ..Default::default()
    };
    let pipeline = InferencePipeline::new(config).length_fn(record_len());
    let batches = collect(&source.apply(&pipeline).unwrap());

    let restored = restore_order(batches).unwrap();
    assert_eq!(restored.len(), lengths.len());
    for (position, example) in restored.iter().enumerate() {
        assert_eq!(
            example.tensor(INDEX_KEY).unwrap().to_scalar_i64(),
            Some(position as i64)
        );
        assert_eq!(example.tensor("id").unwrap().to_scalar_i64(), Some(position as i64));
    }
}

#[test]
fn batcher_pads_with_zeros() {
    let batches = InMemoryDataset::new(vec![record(0, 3), record(1, 5)])
        .boxed()
        .apply(&seqbatch_core::Batcher::new(2))
        .unwrap();
    let batches = collect(&batches);
    let ids = batches[0].tensor("ids").unwrap();
    assert_eq!(ids.shape(), &[2, 5]);
    assert_eq!(&ids.as_i64().unwrap()[..5], &[1, 1, 1, 0, 0]);
}

#[test]
fn configuration_errors_surface_before_iteration() {
    let err = "[training]\nbatch_type = \"words\""
        .parse::<seqbatch_core::PipelineConfig>()
        .unwrap_err();
    assert!(err.is_invalid_configuration());
    assert!(err.to_string().contains("'words'"));

    let pipeline = InferencePipeline::new(InferenceConfig {
        bucket_width: Some(3),
        ..Default::default()
    });
    let source = InMemoryDataset::new(vec![record(0, 1)]).boxed();
    assert!(pipeline.apply(source).err().unwrap().is_invalid_configuration());
}
