// rust/seqbatch-core/src/dataset/mod.rs

//! Lazy, restartable datasets and the stages that transform them.
//!
//! A [`Dataset`] produces a fresh stream of elements on every pass. Stages
//! wrap a dataset into a new one, so a pipeline is an ordinary chain of
//! values that can be iterated any number of times (for repetition, shape
//! probing or random sharding) without the passes interfering.
//!
//! # Example
//!
//! ```ignore
//! use seqbatch_core::dataset::{DatasetExt, InMemoryDataset};
//!
//! let dataset = InMemoryDataset::new((0..1000).collect::<Vec<u32>>())
//!     .boxed()
//!     .shard(4, 0)?
//!     .shuffle(64, Some(42))
//!     .map(|x| Ok(x * 2), 4)
//!     .prefetch(Some(2));
//!
//! for item in dataset.iter()? {
//!     let item = item?;
//!     // Consume item
//! }
//! ```

mod ops;
mod parallel;
mod prefetch;
mod sharding;
mod shuffle;
mod traits;

pub use ops::{
    DatasetExt, EnumerateDataset, FilterDataset, Predicate, RepeatDataset, TakeDataset,
};
pub use parallel::{MapDataset, MapFn, ParallelMapConfig, ParallelMapIter};
pub use prefetch::{AsyncPrefetchingIterator, PrefetchConfig, PrefetchDataset, PrefetchingIterator};
pub use sharding::{random_shard_offsets, RandomShard, ShardDataset};
pub use shuffle::ShuffleDataset;
pub use traits::{
    BoxedDataset, Dataset, Elements, GeneratorDataset, InMemoryDataset, Transformation,
};
