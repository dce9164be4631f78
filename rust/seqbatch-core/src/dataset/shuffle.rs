// rust/seqbatch-core/src/dataset/shuffle.rs

//! Bounded-buffer shuffling.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::Result;

use super::traits::{BoxedDataset, Dataset, Elements};

/// Shuffles a dataset through a buffer of `buffer_size` elements.
///
/// Each pass draws a new order. With a seed, pass `n` uses `seed + n`, so a
/// freshly built pipeline replays the same sequence of orders.
pub struct ShuffleDataset<T> {
    inner: BoxedDataset<T>,
    buffer_size: usize,
    seed: Option<u64>,
    epoch: AtomicU64,
}

impl<T: Send + 'static> ShuffleDataset<T> {
    pub fn new(inner: BoxedDataset<T>, buffer_size: usize, seed: Option<u64>) -> Self {
        Self {
            inner,
            buffer_size: buffer_size.max(1),
            seed,
            epoch: AtomicU64::new(0),
        }
    }
}

impl<T: Send + 'static> Dataset<T> for ShuffleDataset<T> {
    fn iter(&self) -> Result<Elements<T>> {
        let epoch = self.epoch.fetch_add(1, Ordering::Relaxed);
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(epoch)),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        Ok(Box::new(ShuffleIter {
            upstream: Some(self.inner.iter()?),
            buffer: Vec::with_capacity(self.buffer_size.min(1 << 16)),
            buffer_size: self.buffer_size,
            rng,
        }))
    }

    fn name(&self) -> &str {
        "shuffle"
    }
}

struct ShuffleIter<T> {
    upstream: Option<Elements<T>>,
    buffer: Vec<T>,
    buffer_size: usize,
    rng: StdRng,
}

impl<T> Iterator for ShuffleIter<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        // Top the buffer up; errors pass through immediately
        while self.buffer.len() < self.buffer_size {
            let Some(upstream) = self.upstream.as_mut() else {
                break;
            };
            match upstream.next() {
                Some(Ok(item)) => self.buffer.push(item),
                Some(Err(e)) => return Some(Err(e)),
                None => self.upstream = None,
            }
        }

        if self.buffer.is_empty() {
            return None;
        }
        let index = self.rng.random_range(0..self.buffer.len());
        Some(Ok(self.buffer.swap_remove(index)))
    }
}
