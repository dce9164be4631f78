// rust/seqbatch-core/src/dataset/ops.rs

//! Element-wise combinators and the fluent [`DatasetExt`] API.

use std::sync::Arc;

use crate::error::Result;

use super::parallel::{MapDataset, MapFn, ParallelMapConfig};
use super::prefetch::{PrefetchConfig, PrefetchDataset};
use super::sharding::ShardDataset;
use super::shuffle::ShuffleDataset;
use super::traits::{BoxedDataset, Dataset, Elements, Transformation};

/// Predicate used by [`FilterDataset`].
pub type Predicate<T> = Arc<dyn Fn(&T) -> Result<bool> + Send + Sync>;

/// Keeps the elements for which the predicate holds. Predicate errors are
/// forwarded in place of the element.
pub struct FilterDataset<T> {
    inner: BoxedDataset<T>,
    predicate: Predicate<T>,
}

impl<T: Send + 'static> FilterDataset<T> {
    pub fn new(inner: BoxedDataset<T>, predicate: Predicate<T>) -> Self {
        Self { inner, predicate }
    }
}

impl<T: Send + 'static> Dataset<T> for FilterDataset<T> {
    fn iter(&self) -> Result<Elements<T>> {
        let predicate = self.predicate.clone();
        Ok(Box::new(self.inner.iter()?.filter_map(move |item| {
            match item {
                Ok(x) => match predicate(&x) {
                    Ok(true) => Some(Ok(x)),
                    Ok(false) => None,
                    Err(e) => Some(Err(e)),
                },
                Err(e) => Some(Err(e)),
            }
        })))
    }

    fn name(&self) -> &str {
        "filter"
    }
}

/// Replays a dataset `count` times, or forever when `count` is `None`.
///
/// A pass that yields nothing ends the repetition, so repeating an empty
/// dataset terminates.
pub struct RepeatDataset<T> {
    inner: BoxedDataset<T>,
    count: Option<usize>,
}

impl<T: Send + 'static> RepeatDataset<T> {
    pub fn new(inner: BoxedDataset<T>, count: Option<usize>) -> Self {
        Self { inner, count }
    }
}

impl<T: Send + 'static> Dataset<T> for RepeatDataset<T> {
    fn iter(&self) -> Result<Elements<T>> {
        Ok(Box::new(RepeatIter {
            inner: self.inner.clone(),
            remaining: self.count,
            current: None,
            produced_in_pass: false,
        }))
    }

    fn name(&self) -> &str {
        "repeat"
    }
}

struct RepeatIter<T> {
    inner: BoxedDataset<T>,
    remaining: Option<usize>,
    current: Option<Elements<T>>,
    produced_in_pass: bool,
}

impl<T: Send + 'static> Iterator for RepeatIter<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(current) = self.current.as_mut() {
                if let Some(item) = current.next() {
                    self.produced_in_pass = true;
                    return Some(item);
                }
                self.current = None;
                if !self.produced_in_pass {
                    self.remaining = Some(0);
                }
            }

            match self.remaining.as_mut() {
                Some(0) => return None,
                Some(n) => *n -= 1,
                None => {}
            }
            self.produced_in_pass = false;
            match self.inner.iter() {
                Ok(elements) => self.current = Some(elements),
                Err(e) => {
                    self.remaining = Some(0);
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Pairs every element with its zero-based position in the pass.
pub struct EnumerateDataset<T> {
    inner: BoxedDataset<T>,
}

impl<T: Send + 'static> Dataset<(usize, T)> for EnumerateDataset<T> {
    fn iter(&self) -> Result<Elements<(usize, T)>> {
        Ok(Box::new(
            self.inner
                .iter()?
                .enumerate()
                .map(|(i, item)| item.map(|x| (i, x))),
        ))
    }

    fn name(&self) -> &str {
        "enumerate"
    }
}

/// The first `count` elements of a dataset.
pub struct TakeDataset<T> {
    inner: BoxedDataset<T>,
    count: usize,
}

impl<T: Send + 'static> Dataset<T> for TakeDataset<T> {
    fn iter(&self) -> Result<Elements<T>> {
        Ok(Box::new(self.inner.iter()?.take(self.count)))
    }

    fn iter_from(&self, offset: usize) -> Result<Elements<T>> {
        let count = self.count.saturating_sub(offset);
        Ok(Box::new(self.inner.iter_from(offset)?.take(count)))
    }

    fn name(&self) -> &str {
        "take"
    }
}

/// Fluent composition of dataset stages.
pub trait DatasetExt<T: Send + 'static> {
    /// Applies a pipeline stage.
    fn apply<U>(self, transformation: &dyn Transformation<T, U>) -> Result<BoxedDataset<U>>;

    /// Keeps every `num_shards`-th element starting at `shard_index`.
    fn shard(self, num_shards: usize, shard_index: usize) -> Result<BoxedDataset<T>>;

    /// Shuffles through a buffer of `buffer_size` elements.
    fn shuffle(self, buffer_size: usize, seed: Option<u64>) -> BoxedDataset<T>;

    /// Applies `f` on `num_threads` workers, preserving order.
    fn map<U, F>(self, f: F, num_threads: usize) -> BoxedDataset<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Result<U> + Send + Sync + 'static;

    fn filter<F>(self, predicate: F) -> BoxedDataset<T>
    where
        F: Fn(&T) -> Result<bool> + Send + Sync + 'static;

    /// Replays the dataset `count` times, forever if `None`.
    fn repeat(self, count: Option<usize>) -> BoxedDataset<T>;

    fn enumerate(self) -> BoxedDataset<(usize, T)>;

    fn take(self, count: usize) -> BoxedDataset<T>;

    /// Reads ahead in a background thread; see [`PrefetchConfig::from_buffer_size`].
    fn prefetch(self, buffer_size: Option<usize>) -> BoxedDataset<T>;
}

impl<T: Send + 'static> DatasetExt<T> for BoxedDataset<T> {
    fn apply<U>(self, transformation: &dyn Transformation<T, U>) -> Result<BoxedDataset<U>> {
        transformation.apply(self)
    }

    fn shard(self, num_shards: usize, shard_index: usize) -> Result<BoxedDataset<T>> {
        Ok(Arc::new(ShardDataset::new(self, num_shards, shard_index)?))
    }

    fn shuffle(self, buffer_size: usize, seed: Option<u64>) -> BoxedDataset<T> {
        Arc::new(ShuffleDataset::new(self, buffer_size, seed))
    }

    fn map<U, F>(self, f: F, num_threads: usize) -> BoxedDataset<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Result<U> + Send + Sync + 'static,
    {
        let f: MapFn<T, U> = Arc::new(f);
        Arc::new(MapDataset::new(
            self,
            f,
            ParallelMapConfig::with_threads(num_threads),
        ))
    }

    fn filter<F>(self, predicate: F) -> BoxedDataset<T>
    where
        F: Fn(&T) -> Result<bool> + Send + Sync + 'static,
    {
        Arc::new(FilterDataset::new(self, Arc::new(predicate)))
    }

    fn repeat(self, count: Option<usize>) -> BoxedDataset<T> {
        Arc::new(RepeatDataset::new(self, count))
    }

    fn enumerate(self) -> BoxedDataset<(usize, T)> {
        Arc::new(EnumerateDataset { inner: self })
    }

    fn take(self, count: usize) -> BoxedDataset<T> {
        Arc::new(TakeDataset { inner: self, count })
    }

    fn prefetch(self, buffer_size: Option<usize>) -> BoxedDataset<T> {
        Arc::new(PrefetchDataset::new(
            self,
            PrefetchConfig::from_buffer_size(buffer_size),
        ))
    }
}
