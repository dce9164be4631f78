// rust/seqbatch-core/src/batching/mod.rs

//! Batch formation: padding, length filtering and bucketing.

mod bucketing;
mod filters;
mod padding;

pub use bucketing::{
    bucket_key, token_window_size, BatchType, BucketedBatcher, GroupByWindow, KeyFn,
    WindowSizeFn,
};
pub use filters::{within_limits, IrregularBatchFilter, LengthFilter};
pub use padding::{pad_batch, Batcher};
