// rust/seqbatch-core/src/dataset/parallel.rs

//! Parallel element processing.
//!
//! This module applies a user function to every element of a dataset on a
//! pool of worker threads. Results are handed back in input order, so a
//! parallel map is observably identical to a sequential one apart from
//! throughput.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver};

use crate::error::{PipelineError, Result};

use super::traits::{BoxedDataset, Dataset, Elements};

/// Function applied to every element by a [`MapDataset`].
pub type MapFn<T, U> = Arc<dyn Fn(T) -> Result<U> + Send + Sync>;

/// Configuration for parallel processing.
#[derive(Debug, Clone)]
pub struct ParallelMapConfig {
    /// Number of worker threads; 1 runs the function on the consumer thread.
    pub num_threads: usize,
    /// Elements queued per worker ahead of processing.
    pub queue_depth: usize,
}

impl Default for ParallelMapConfig {
    fn default() -> Self {
        Self {
            num_threads: 4,
            queue_depth: 2,
        }
    }
}

impl ParallelMapConfig {
    pub fn with_threads(num_threads: usize) -> Self {
        Self {
            num_threads: num_threads.max(1),
            ..Self::default()
        }
    }

    /// One worker per available core.
    pub fn auto() -> Self {
        let cores = thread::available_parallelism().map_or(1, |n| n.get());
        Self::with_threads(cores)
    }
}

/// Dataset whose elements are `f(x)` for every `x` of the input.
pub struct MapDataset<T, U> {
    inner: BoxedDataset<T>,
    f: MapFn<T, U>,
    config: ParallelMapConfig,
}

impl<T, U> MapDataset<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    pub fn new(inner: BoxedDataset<T>, f: MapFn<T, U>, config: ParallelMapConfig) -> Self {
        Self { inner, f, config }
    }
}

impl<T, U> Dataset<U> for MapDataset<T, U>
where
    T: Send + 'static,
    U: Send + 'static,
{
    fn iter(&self) -> Result<Elements<U>> {
        let upstream = self.inner.iter()?;
        let f = self.f.clone();
        if self.config.num_threads <= 1 {
            return Ok(Box::new(upstream.map(move |item| item.and_then(|x| f(x)))));
        }
        Ok(Box::new(ParallelMapIter::spawn(upstream, f, &self.config)))
    }

    fn name(&self) -> &str {
        "map"
    }
}

type Sequenced<T> = (u64, Result<T>);

/// Ordered parallel map over a stream.
///
/// A feeder thread pulls from the upstream iterator and tags elements with
/// their position; workers apply the function; the consumer reorders
/// results by position. Dropping the iterator disconnects the channels,
/// which stops the feeder and the workers.
pub struct ParallelMapIter<U> {
    results: Option<Receiver<Sequenced<U>>>,
    pending: BTreeMap<u64, Result<U>>,
    next_seq: u64,
    stop_flag: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
    exhausted: bool,
}

impl<U: Send + 'static> ParallelMapIter<U> {
    pub fn spawn<T: Send + 'static>(
        upstream: Elements<T>,
        f: MapFn<T, U>,
        config: &ParallelMapConfig,
    ) -> Self {
        let num_threads = config.num_threads.max(1);
        let capacity = num_threads * config.queue_depth.max(1);
        let (work_tx, work_rx) = channel::bounded::<Sequenced<T>>(capacity);
        let (result_tx, result_rx) = channel::bounded::<Sequenced<U>>(capacity);
        let stop_flag = Arc::new(AtomicBool::new(false));

        let mut threads = Vec::with_capacity(num_threads + 1);

        let feeder_stop = stop_flag.clone();
        threads.push(thread::spawn(move || {
            for (seq, item) in (0u64..).zip(upstream) {
                if feeder_stop.load(Ordering::Relaxed) {
                    break;
                }
                if work_tx.send((seq, item)).is_err() {
                    break; // Workers gone
                }
            }
        }));

        for _ in 0..num_threads {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            let f = f.clone();
            threads.push(thread::spawn(move || {
                for (seq, item) in work_rx.iter() {
                    let result = item.and_then(|x| {
                        panic::catch_unwind(AssertUnwindSafe(|| f(x))).unwrap_or_else(|_| {
                            Err(PipelineError::worker("map", "processing function panicked"))
                        })
                    });
                    if result_tx.send((seq, result)).is_err() {
                        break; // Consumer dropped
                    }
                }
            }));
        }

        Self {
            results: Some(result_rx),
            pending: BTreeMap::new(),
            next_seq: 0,
            stop_flag,
            threads,
            exhausted: false,
        }
    }
}

impl<U: Send + 'static> Iterator for ParallelMapIter<U> {
    type Item = Result<U>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        loop {
            if let Some(result) = self.pending.remove(&self.next_seq) {
                self.next_seq += 1;
                return Some(result);
            }
            let received = self.results.as_ref().map(|rx| rx.recv());
            match received {
                Some(Ok((seq, result))) => {
                    self.pending.insert(seq, result);
                }
                _ => {
                    self.exhausted = true;
                    if self.pending.is_empty() {
                        return None;
                    }
                    // A later element finished but this one never will
                    return Some(Err(PipelineError::worker(
                        "map",
                        format!("element {} was lost by a worker thread", self.next_seq),
                    )));
                }
            }
        }
    }
}

impl<U> Drop for ParallelMapIter<U> {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        // Disconnect first so blocked workers and the feeder return
        self.results.take();
        self.pending.clear();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}
