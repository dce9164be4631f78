// rust/seqbatch-core/src/batching/bucketing.rs

//! Length-bucketed batching.
//!
//! Examples are routed into per-key queues by a bucket key derived from their
//! length. A queue is drained into a batch as soon as it holds its window size
//! of examples; at end of stream every non-empty queue is flushed, in ascending
//! key order. Within a bucket examples keep their arrival order, across
//! buckets there is no ordering guarantee.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;


use crate::dataset::{BoxedDataset, Dataset, Elements, Transformation};
use crate::error::{PipelineError, Result};
use crate::example::Example;
use crate::length::LengthFn;
use crate::shapes::Shapes;

use super::padding::{Batcher, PadState};

/// Maps an example to its bucket.
pub type KeyFn = Arc<dyn Fn(&Example) -> Result<u64> + Send + Sync>;

/// Number of examples a bucket accumulates before it is emitted.
pub type WindowSizeFn = Arc<dyn Fn(u64) -> usize + Send + Sync>;

/// How the training batch size is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchType {
    /// `batch_size` counts examples.
    #[default]
    Examples,
    /// `batch_size` counts tokens; buckets of longer sequences get fewer
    /// examples per batch.
    Tokens,
}

impl BatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchType::Examples => "examples",
            BatchType::Tokens => "tokens",
        }
    }
}

impl fmt::Display for BatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "examples" => Ok(BatchType::Examples),
            "tokens" => Ok(BatchType::Tokens),
            other => Err(PipelineError::invalid_configuration(format!(
                "Invalid batch type: '{}'; should be 'examples' or 'tokens'",
                other
            ))),
        }
    }
}

/// Window size of bucket `key` when batching by tokens.
///
/// The bucket's sequences are at most `(key + 1) * bucket_width` long, so the
/// window keeps `window * max_length` near `batch_size`. The result is rounded
/// up to a multiple of `batch_multiplier * batch_size_multiple` and is never
/// smaller than that multiple. With `bucket_width == 1` the key is already the
/// length; key 0 then uses a denominator of 1.
pub fn token_window_size(
    key: u64,
    batch_size: usize,
    bucket_width: usize,
    batch_multiplier: usize,
    batch_size_multiple: usize,
) -> usize {
    let key = if bucket_width > 1 { key + 1 } else { key };
    let key = usize::try_from(key).unwrap_or(usize::MAX);
    let denominator = key.saturating_mul(bucket_width).max(1);
    let size = batch_size / denominator;
    let multiple = batch_multiplier.max(1) * batch_size_multiple.max(1);
    let size = if multiple > 1 {
        size.div_ceil(multiple) * multiple
    } else {
        size
    };
    size.max(multiple)
}

/// Bucket of a parallel example: the largest of the features and labels
/// lengths divided by `bucket_width`.
///
/// Multi-source features do not take part in the key, leaving bucketing to
/// the target side.
pub fn bucket_key(
    example: &Example,
    bucket_width: usize,
    features_length_fn: Option<&LengthFn>,
    labels_length_fn: Option<&LengthFn>,
) -> Result<u64> {
    let bucket_width = bucket_width.max(1);
    let (features, labels) = example.as_pair()?;
    let mut key = 0;
    if let Some(length_fn) = features_length_fn {
        let length = length_fn(features)?;
        if !length.is_multi() {
            key = key.max(length.as_slice()[0] / bucket_width);
        }
    }
    if let Some(length_fn) = labels_length_fn {
        let length = length_fn(labels)?;
        let longest = length.as_slice().iter().copied().max().unwrap_or(0);
        key = key.max(longest / bucket_width);
    }
    Ok(key as u64)
}

/// Groups examples by key and batches each group once it fills its window.
///
/// Windows longer than `batch_size` are split into consecutive batches.
#[derive(Clone)]
pub struct GroupByWindow {
    key_fn: KeyFn,
    window_size_fn: WindowSizeFn,
    batch_size: usize,
    padded_shapes: Option<Shapes>,
}

impl GroupByWindow {
    pub fn new(key_fn: KeyFn, window_size_fn: WindowSizeFn, batch_size: usize) -> Self {
        Self {
            key_fn,
            window_size_fn,
            batch_size,
            padded_shapes: None,
        }
    }

    /// Flat windows of `window_size` for every key.
    pub fn with_fixed_window(key_fn: KeyFn, window_size: usize, batch_size: usize) -> Self {
        Self::new(key_fn, Arc::new(move |_| window_size), batch_size)
    }

    pub fn with_padded_shapes(mut self, padded_shapes: Option<Shapes>) -> Self {
        self.padded_shapes = padded_shapes;
        self
    }
}

impl Transformation<Example, Example> for GroupByWindow {
    fn apply(&self, dataset: BoxedDataset<Example>) -> Result<BoxedDataset<Example>> {
        if self.batch_size == 0 {
            return Err(PipelineError::invalid_configuration(
                "batch_size must be greater than 0",
            ));
        }
        Ok(Arc::new(GroupByWindowDataset {
            inner: dataset,
            config: self.clone(),
        }))
    }
}

struct GroupByWindowDataset {
    inner: BoxedDataset<Example>,
    config: GroupByWindow,
}

impl Dataset<Example> for GroupByWindowDataset {
    fn iter(&self) -> Result<Elements<Example>> {
        Ok(Box::new(GroupByWindowIter {
            upstream: self.inner.iter()?,
            config: self.config.clone(),
            pad: PadState::new(self.config.padded_shapes.clone()),
            queues: BTreeMap::new(),
            ready: VecDeque::new(),
            exhausted: false,
        }))
    }

    fn name(&self) -> &str {
        "group_by_window"
    }
}

struct GroupByWindowIter {
    upstream: Elements<Example>,
    config: GroupByWindow,
    pad: PadState,
    queues: BTreeMap<u64, Vec<Example>>,
    ready: VecDeque<Result<Example>>,
    exhausted: bool,
}

impl GroupByWindowIter {
    fn emit(&mut self, key: u64, window: Vec<Example>) {
        for chunk in window.chunks(self.config.batch_size) {
            tracing::debug!("Bucket {} emits a batch of {} examples", key, chunk.len());
            let batch = self.pad.pad(chunk);
            self.ready.push_back(batch);
        }
    }
}

impl Iterator for GroupByWindowIter {
    type Item = Result<Example>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(batch) = self.ready.pop_front() {
                return Some(batch);
            }
            if self.exhausted {
                let (key, window) = self.queues.pop_first()?;
                self.emit(key, window);
                continue;
            }
            match self.upstream.next() {
                Some(Ok(example)) => {
                    let key = match (self.config.key_fn)(&example) {
                        Ok(key) => key,
                        Err(e) => return Some(Err(e)),
                    };
                    let window_size = (self.config.window_size_fn)(key).max(1);
                    let queue = self.queues.entry(key).or_default();
                    queue.push(example);
                    if queue.len() >= window_size {
                        let window = std::mem::take(queue);
                        self.queues.remove(&key);
                        self.emit(key, window);
                    }
                }
                Some(Err(e)) => return Some(Err(e)),
                None => {
                    self.exhausted = true;
                    tracing::debug!("Flushing {} pending buckets", self.queues.len());
                }
            }
        }
    }
}

/// Batches a parallel `(features, labels)` dataset, optionally bucketing
/// examples of similar length together.
///
/// `batch_size` is the per-replica size; batches hold
/// `batch_size * batch_multiplier` examples (or tokens). Without a bucket
/// width this is a plain [`Batcher`].
#[derive(Clone)]
pub struct BucketedBatcher {
    batch_size: usize,
    batch_type: BatchType,
    batch_multiplier: usize,
    batch_size_multiple: usize,
    bucket_width: Option<usize>,
    features_length_fn: Option<LengthFn>,
    labels_length_fn: Option<LengthFn>,
    padded_shapes: Option<Shapes>,
}

impl BucketedBatcher {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            batch_type: BatchType::Examples,
            batch_multiplier: 1,
            batch_size_multiple: 1,
            bucket_width: None,
            features_length_fn: None,
            labels_length_fn: None,
            padded_shapes: None,
        }
    }

    pub fn batch_type(mut self, batch_type: BatchType) -> Self {
        self.batch_type = batch_type;
        self
    }

    pub fn batch_multiplier(mut self, batch_multiplier: usize) -> Self {
        self.batch_multiplier = batch_multiplier;
        self
    }

    pub fn batch_size_multiple(mut self, batch_size_multiple: usize) -> Self {
        self.batch_size_multiple = batch_size_multiple;
        self
    }

    pub fn bucket_width(mut self, bucket_width: Option<usize>) -> Self {
        self.bucket_width = bucket_width;
        self
    }

    pub fn features_length_fn(mut self, length_fn: Option<LengthFn>) -> Self {
        self.features_length_fn = length_fn;
        self
    }

    pub fn labels_length_fn(mut self, length_fn: Option<LengthFn>) -> Self {
        self.labels_length_fn = length_fn;
        self
    }

    pub fn padded_shapes(mut self, padded_shapes: Option<Shapes>) -> Self {
        self.padded_shapes = padded_shapes;
        self
    }

    /// Examples (or tokens) per batch once the multiplier is applied.
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size * self.batch_multiplier
    }

    /// Window size policy of bucket `key`.
    pub fn window_size(&self, key: u64) -> usize {
        match self.batch_type {
            BatchType::Examples => self.effective_batch_size(),
            BatchType::Tokens => token_window_size(
                key,
                self.effective_batch_size(),
                self.bucket_width.unwrap_or(1),
                self.batch_multiplier,
                self.batch_size_multiple,
            ),
        }
    }
}

impl Transformation<Example, Example> for BucketedBatcher {
    fn apply(&self, dataset: BoxedDataset<Example>) -> Result<BoxedDataset<Example>> {
        if self.batch_multiplier == 0 || self.batch_size_multiple == 0 {
            return Err(PipelineError::invalid_configuration(
                "batch_multiplier and batch_size_multiple must be at least 1",
            ));
        }
        let batch_size = self.effective_batch_size();
        let Some(bucket_width) = self.bucket_width else {
            return Batcher::new(batch_size)
                .with_padded_shapes(self.padded_shapes.clone())
                .apply(dataset);
        };
        if bucket_width == 0 {
            return Err(PipelineError::invalid_configuration(
                "bucket_width must be greater than 0",
            ));
        }

        let features_length_fn = self.features_length_fn.clone();
        let labels_length_fn = self.labels_length_fn.clone();
        let key_fn: KeyFn = Arc::new(move |example: &Example| {
            bucket_key(
                example,
                bucket_width,
                features_length_fn.as_ref(),
                labels_length_fn.as_ref(),
            )
        });
        let policy = self.clone();
        let window_size_fn: WindowSizeFn = Arc::new(move |key| policy.window_size(key));

        tracing::debug!(
            "Bucketing by {} with width {} and batch size {}",
            self.batch_type,
            bucket_width,
            batch_size
        );
        GroupByWindow::new(key_fn, window_size_fn, batch_size)
            .with_padded_shapes(self.padded_shapes.clone())
            .apply(dataset)
    }
}
