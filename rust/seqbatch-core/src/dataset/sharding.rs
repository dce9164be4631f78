// rust/seqbatch-core/src/dataset/sharding.rs

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{PipelineError, Result};

use super::traits::{BoxedDataset, Dataset, Elements, Transformation};

/// Keeps every element whose position satisfies
/// `index % num_shards == shard_index`.
pub struct ShardDataset<T> {
    inner: BoxedDataset<T>,
    num_shards: usize,
    shard_index: usize,
}

impl<T: Send + 'static> ShardDataset<T> {
    /// Creates a modulo shard of `inner`.
    ///
    /// # Errors
    ///
    /// Returns an error if `num_shards` is zero or `shard_index` is out of range.
    pub fn new(inner: BoxedDataset<T>, num_shards: usize, shard_index: usize) -> Result<Self> {
        if num_shards == 0 {
            return Err(PipelineError::invalid_configuration(
                "num_shards must be greater than 0",
            ));
        }
        if shard_index >= num_shards {
            return Err(PipelineError::invalid_configuration(format!(
                "shard_index {} out of range (num_shards: {})",
                shard_index, num_shards
            )));
        }
        Ok(Self {
            inner,
            num_shards,
            shard_index,
        })
    }
}

impl<T: Send + 'static> Dataset<T> for ShardDataset<T> {
    fn iter(&self) -> Result<Elements<T>> {
        let num_shards = self.num_shards;
        Ok(Box::new(
            self.inner
                .iter()?
                .skip(self.shard_index)
                .step_by(num_shards),
        ))
    }

    fn name(&self) -> &str {
        "shard"
    }
}

/// Start offsets of the shards used by [`RandomShard`].
///
/// Shards are `shard_size` apart, so every element belongs to exactly one
/// shard and only the last shard may be shorter.
pub fn random_shard_offsets(shard_size: usize, dataset_size: usize) -> Vec<usize> {
    if shard_size == 0 {
        return Vec::new();
    }
    (0..dataset_size).step_by(shard_size).collect()
}

/// Reorders a dataset at shard granularity.
///
/// The dataset is cut into contiguous shards of `shard_size` elements and
/// the shards are emitted in a random order. Combined with a shuffle buffer
/// of `shard_size` downstream, this approximates a full shuffle of a dataset
/// too large to buffer.
#[derive(Debug, Clone)]
pub struct RandomShard {
    shard_size: usize,
    dataset_size: usize,
    seed: Option<u64>,
}

impl RandomShard {
    pub fn new(shard_size: usize, dataset_size: usize) -> Self {
        Self {
            shard_size,
            dataset_size,
            seed: None,
        }
    }

    /// Makes the shard order reproducible.
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }
}

impl<T: Send + 'static> Transformation<T, T> for RandomShard {
    fn apply(&self, dataset: BoxedDataset<T>) -> Result<BoxedDataset<T>> {
        if self.shard_size == 0 {
            return Err(PipelineError::invalid_configuration(
                "random shard size must be greater than 0",
            ));
        }
        let offsets = random_shard_offsets(self.shard_size, self.dataset_size);
        tracing::debug!(
            "Random sharding {} examples into {} shards of {}",
            self.dataset_size,
            offsets.len(),
            self.shard_size
        );
        Ok(Arc::new(RandomShardDataset {
            inner: dataset,
            offsets: Arc::new(offsets),
            shard_size: self.shard_size,
            seed: self.seed,
            epoch: std::sync::atomic::AtomicU64::new(0),
        }))
    }
}

struct RandomShardDataset<T> {
    inner: BoxedDataset<T>,
    offsets: Arc<Vec<usize>>,
    shard_size: usize,
    seed: Option<u64>,
    epoch: std::sync::atomic::AtomicU64,
}

impl<T: Send + 'static> Dataset<T> for RandomShardDataset<T> {
    fn iter(&self) -> Result<Elements<T>> {
        let epoch = self
            .epoch
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(epoch)),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        let mut order = self.offsets.as_ref().clone();
        order.shuffle(&mut rng);

        Ok(Box::new(ShardChain {
            inner: self.inner.clone(),
            order: order.into_iter(),
            shard_size: self.shard_size,
            current: None,
        }))
    }

    fn name(&self) -> &str {
        "random-shard"
    }
}

/// Lazily concatenates `skip(offset).take(shard_size)` for each offset.
struct ShardChain<T> {
    inner: BoxedDataset<T>,
    order: std::vec::IntoIter<usize>,
    shard_size: usize,
    current: Option<std::iter::Take<Elements<T>>>,
}

impl<T: Send + 'static> Iterator for ShardChain<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(current) = self.current.as_mut() {
                if let Some(item) = current.next() {
                    return Some(item);
                }
                self.current = None;
            }
            let offset = self.order.next()?;
            match self.inner.iter_from(offset) {
                Ok(elements) => self.current = Some(elements.take(self.shard_size)),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::traits::InMemoryDataset;

    fn collect(dataset: &BoxedDataset<usize>) -> Vec<usize> {
        dataset.iter().unwrap().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_modulo_shard() {
        let base = InMemoryDataset::new((0..10).collect::<Vec<usize>>()).boxed();
        let shard: BoxedDataset<usize> = Arc::new(ShardDataset::new(base, 3, 1).unwrap());
        assert_eq!(collect(&shard), vec![1, 4, 7]);
    }

    #[test]
    fn test_modulo_shards_are_disjoint_and_complete() {
        let base = InMemoryDataset::new((0..11).collect::<Vec<usize>>()).boxed();
        let mut all = Vec::new();
        for index in 0..4 {
            let shard: BoxedDataset<usize> =
                Arc::new(ShardDataset::new(base.clone(), 4, index).unwrap());
            all.extend(collect(&shard));
        }
        all.sort_unstable();
        assert_eq!(all, (0..11).collect::<Vec<_>>());
    }

    #[test]
    fn test_shard_invalid_index() {
        let base = InMemoryDataset::new(vec![0usize]).boxed();
        let err = ShardDataset::new(base.clone(), 2, 2).err().unwrap();
        assert!(err.is_invalid_configuration());
        assert!(ShardDataset::new(base, 0, 0).is_err());
    }

    #[test]
    fn test_random_shard_offsets() {
        assert_eq!(random_shard_offsets(5, 10), vec![0, 5]);
        assert_eq!(random_shard_offsets(3, 10), vec![0, 3, 6, 9]);
        assert_eq!(random_shard_offsets(10, 10), vec![0]);
        assert_eq!(random_shard_offsets(20, 10), vec![0]);
        assert!(random_shard_offsets(3, 0).is_empty());
    }

    #[test]
    fn test_random_shard_is_union_of_contiguous_runs() {
        let base = InMemoryDataset::new((0..20).collect::<Vec<usize>>()).boxed();
        let shuffled = RandomShard::new(5, 20).with_seed(Some(7)).apply(base).unwrap();
        let output = collect(&shuffled);

        let mut sorted = output.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..20).collect::<Vec<_>>());

        for run in output.chunks(5) {
            assert_eq!(run[0] % 5, 0, "run {:?} does not start a shard", run);
            for pair in run.windows(2) {
                assert_eq!(pair[1], pair[0] + 1);
            }
        }
    }

    #[test]
    fn test_random_shard_partial_last_shard() {
        let base = InMemoryDataset::new((0..10).collect::<Vec<usize>>()).boxed();
        let shuffled = RandomShard::new(3, 10).with_seed(Some(1)).apply(base).unwrap();
        let mut output = collect(&shuffled);
        output.sort_unstable();
        assert_eq!(output, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_random_shard_full_size_keeps_order() {
        let base = InMemoryDataset::new((0..8).collect::<Vec<usize>>()).boxed();
        let shuffled = RandomShard::new(8, 8).apply(base).unwrap();
        assert_eq!(collect(&shuffled), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_random_shard_seeded_is_reproducible() {
        let base = InMemoryDataset::new((0..40).collect::<Vec<usize>>()).boxed();
        let a = RandomShard::new(4, 40).with_seed(Some(3)).apply(base.clone()).unwrap();
        let b = RandomShard::new(4, 40).with_seed(Some(3)).apply(base).unwrap();
        assert_eq!(collect(&a), collect(&b));
    }

    #[test]
    fn test_random_shard_rejects_zero_size() {
        let base = InMemoryDataset::new(vec![0usize]).boxed();
        assert!(RandomShard::new(0, 1).apply(base).is_err());
    }
}
