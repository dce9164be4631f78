// rust/seqbatch-core/src/dataset/prefetch.rs

//! Prefetching iterator for overlapping batch production with training.
//!
//! This module provides a prefetching wrapper around any element stream
//! that produces items in the background using a separate thread, allowing
//! the main training loop to continue without waiting for the pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver};

use crate::error::{PipelineError, Result};

use super::traits::{BoxedDataset, Dataset, Elements};

/// Configuration for prefetching behavior.
#[derive(Debug, Clone)]
pub struct PrefetchConfig {
    /// Number of elements to prefetch.
    pub buffer_size: usize,
    /// Whether prefetching is enabled.
    pub enabled: bool,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            buffer_size: 4,
            enabled: true,
        }
    }
}

impl PrefetchConfig {
    /// Resolves an optional buffer size: `None` sizes the buffer to the
    /// available parallelism, `Some(0)` disables prefetching.
    pub fn from_buffer_size(buffer_size: Option<usize>) -> Self {
        match buffer_size {
            Some(0) => Self {
                buffer_size: 0,
                enabled: false,
            },
            Some(size) => Self {
                buffer_size: size,
                enabled: true,
            },
            None => Self {
                buffer_size: thread::available_parallelism().map_or(2, |n| n.get()),
                enabled: true,
            },
        }
    }
}

/// Dataset that prefetches the elements of another dataset.
pub struct PrefetchDataset<T> {
    inner: BoxedDataset<T>,
    config: PrefetchConfig,
}

impl<T: Send + 'static> PrefetchDataset<T> {
    pub fn new(inner: BoxedDataset<T>, config: PrefetchConfig) -> Self {
        Self { inner, config }
    }
}

impl<T: Send + 'static> Dataset<T> for PrefetchDataset<T> {
    fn iter(&self) -> Result<Elements<T>> {
        let upstream = self.inner.iter()?;
        Ok(Box::new(PrefetchingIterator::new(upstream, self.config.clone())))
    }

    fn name(&self) -> &str {
        "prefetch"
    }
}

/// An iterator that pulls elements from a stream in a background thread.
///
/// Elements are pushed into a bounded queue; once the queue is full the
/// producer waits for the consumer. Dropping the iterator stops the
/// producer and joins it.
pub struct PrefetchingIterator<T> {
    /// Queue for receiving prefetched elements.
    queue: Option<Receiver<Result<T>>>,
    /// Flag to signal the prefetch thread to stop.
    stop_flag: Arc<AtomicBool>,
    /// Handle to the prefetch thread.
    prefetch_thread: Option<JoinHandle<()>>,
    /// Whether prefetching is enabled.
    enabled: bool,
    /// Fallback iterator when prefetching is disabled.
    fallback_iter: Option<Elements<T>>,
    /// Track if we've seen the end.
    exhausted: bool,
}

impl<T: Send + 'static> PrefetchingIterator<T> {
    /// Creates a new prefetching iterator.
    ///
    /// # Arguments
    ///
    /// * `upstream` - The stream to read ahead of.
    /// * `config` - Prefetching configuration.
    pub fn new(upstream: Elements<T>, config: PrefetchConfig) -> Self {
        if !config.enabled || config.buffer_size == 0 {
            // Prefetching disabled, use direct iteration
            return Self {
                queue: None,
                stop_flag: Arc::new(AtomicBool::new(false)),
                prefetch_thread: None,
                enabled: false,
                fallback_iter: Some(upstream),
                exhausted: false,
            };
        }

        let (sender, receiver) = channel::bounded(config.buffer_size);
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_flag_clone = stop_flag.clone();

        let prefetch_thread = thread::spawn(move || {
            for item in upstream {
                if stop_flag_clone.load(Ordering::Relaxed) {
                    break;
                }
                let failed = item.is_err();
                // Blocks while the queue is full; fails once the consumer is gone
                if sender.send(item).is_err() || failed {
                    break;
                }
            }
        });

        Self {
            queue: Some(receiver),
            stop_flag,
            prefetch_thread: Some(prefetch_thread),
            enabled: true,
            fallback_iter: None,
            exhausted: false,
        }
    }

    /// Gets the next element from the iterator.
    pub fn next_item(&mut self) -> Result<Option<T>> {
        if self.exhausted {
            return Ok(None);
        }

        if !self.enabled {
            let next = self.fallback_iter.as_mut().and_then(|iter| iter.next());
            return match next {
                Some(Ok(item)) => Ok(Some(item)),
                Some(Err(e)) => Err(e),
                None => {
                    self.exhausted = true;
                    Ok(None)
                }
            };
        }

        let received = self.queue.as_ref().map(|queue| queue.recv());
        match received {
            Some(Ok(Ok(item))) => Ok(Some(item)),
            Some(Ok(Err(e))) => {
                self.exhausted = true;
                Err(e)
            }
            _ => {
                // Producer finished and the queue is drained
                self.exhausted = true;
                if self
                    .prefetch_thread
                    .take()
                    .map_or(false, |handle| handle.join().is_err())
                {
                    return Err(PipelineError::worker("prefetch", "producer thread panicked"));
                }
                Ok(None)
            }
        }
    }

    /// Stops the prefetch thread and cleans up resources.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        // Disconnect so a producer blocked on a full queue returns
        self.queue.take();

        if let Some(thread) = self.prefetch_thread.take() {
            let _ = thread.join();
        }
    }

    /// Returns true if prefetching is enabled.
    pub fn is_prefetching_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the number of elements currently in the prefetch queue.
    pub fn queue_len(&self) -> usize {
        self.queue.as_ref().map_or(0, |queue| queue.len())
    }
}

impl<T: Send + 'static> Iterator for PrefetchingIterator<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_item() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

impl<T> Drop for PrefetchingIterator<T> {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        self.queue.take();
        if let Some(thread) = self.prefetch_thread.take() {
            let _ = thread.join();
        }
    }
}

/// Async prefetching iterator using tokio tasks.
///
/// This is an async version that integrates better with async training
/// loops: the pipeline runs on tokio's blocking pool and elements are
/// awaited from a channel.
pub struct AsyncPrefetchingIterator<T> {
    /// Receiver for prefetched elements.
    receiver: tokio::sync::mpsc::Receiver<Result<T>>,
    /// Flag to signal the producer to stop.
    stop_flag: Arc<AtomicBool>,
    /// Handle to the prefetch task.
    task_handle: Option<tokio::task::JoinHandle<()>>,
    /// Whether we've seen the end.
    exhausted: bool,
}

impl<T: Send + 'static> AsyncPrefetchingIterator<T> {
    /// Starts a pass over `dataset` in the background.
    ///
    /// Note: This must be called from within a tokio runtime.
    pub fn new(dataset: BoxedDataset<T>, buffer_size: usize) -> Self {
        let (sender, receiver) = tokio::sync::mpsc::channel(buffer_size.max(1));
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_flag_clone = stop_flag.clone();

        let task_handle = tokio::task::spawn_blocking(move || {
            let upstream = match dataset.iter() {
                Ok(upstream) => upstream,
                Err(e) => {
                    let _ = sender.blocking_send(Err(e));
                    return;
                }
            };

            for item in upstream {
                if stop_flag_clone.load(Ordering::Relaxed) {
                    break;
                }
                let failed = item.is_err();
                if sender.blocking_send(item).is_err() || failed {
                    break;
                }
            }
        });

        Self {
            receiver,
            stop_flag,
            task_handle: Some(task_handle),
            exhausted: false,
        }
    }

    /// Gets the next element asynchronously.
    pub async fn next_item(&mut self) -> Result<Option<T>> {
        if self.exhausted {
            return Ok(None);
        }

        match self.receiver.recv().await {
            Some(Ok(item)) => Ok(Some(item)),
            Some(Err(e)) => {
                self.exhausted = true;
                Err(e)
            }
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    /// Stops the producer and waits for it to finish its current element.
    pub async fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        self.receiver.close();
        if let Some(handle) = self.task_handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!("Prefetch task failed: {}", e);
            }
        }
    }
}
