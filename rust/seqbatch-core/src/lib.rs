// rust/seqbatch-core/src/lib.rs

//! Sequence Batching Pipelines - Core Library
//!
//! This crate turns lazy datasets of variable-length sequence examples into
//! padded batches for training and inference, including length filtering,
//! length bucketing, sharding, shuffling, parallel preprocessing and
//! prefetching.

pub mod config;
pub mod error;

// Re-export commonly used types for convenience
pub use config::{InferenceConfig, PipelineConfig, TrainingConfig};
pub use error::{PipelineError, Result};

pub mod example;
pub mod length;
pub mod shapes;
pub mod tensor;
pub use example::Example;
pub use length::{length_fn, Length, LengthFn, LengthLimit};
pub use shapes::{infer_shapes, Shapes, TensorShape};
pub use tensor::{DType, Tensor, TensorData};

pub mod dataset;
pub use dataset::{
    AsyncPrefetchingIterator, BoxedDataset, Dataset, DatasetExt, Elements, GeneratorDataset,
    InMemoryDataset, PrefetchingIterator, RandomShard, Transformation,
};

pub mod batching;
pub use batching::{
    pad_batch, BatchType, Batcher, BucketedBatcher, GroupByWindow, IrregularBatchFilter,
    LengthFilter,
};

pub mod pipeline;
pub use pipeline::{
    process_fn, restore_order, InferencePipeline, ProcessFn, TrainingPipeline, INDEX_KEY,
};
