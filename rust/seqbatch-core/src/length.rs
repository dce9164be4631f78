// rust/seqbatch-core/src/length.rs

//! Sequence lengths and the callbacks that compute them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::example::Example;

/// Length of one side of a parallel example.
///
/// Multi-source features report one length per source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Length {
    Single(usize),
    Multi(Vec<usize>),
}

impl Length {
    pub fn as_slice(&self) -> &[usize] {
        match self {
            Length::Single(len) => std::slice::from_ref(len),
            Length::Multi(lens) => lens,
        }
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, Length::Multi(_))
    }
}

impl From<usize> for Length {
    fn from(len: usize) -> Self {
        Length::Single(len)
    }
}

impl From<Vec<usize>> for Length {
    fn from(lens: Vec<usize>) -> Self {
        Length::Multi(lens)
    }
}

/// Maps one side of an example to its sequence length(s).
pub type LengthFn = Arc<dyn Fn(&Example) -> Result<Length> + Send + Sync>;

/// Wraps a closure as a [`LengthFn`].
pub fn length_fn<F>(f: F) -> LengthFn
where
    F: Fn(&Example) -> Result<Length> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Configured maximum length: one value, or one value per source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LengthLimit {
    Single(usize),
    PerSource(Vec<usize>),
}

impl LengthLimit {
    /// Per-position maxima for `count` observed lengths; positions without a
    /// configured value are unconstrained and surplus values are ignored.
    pub fn per_position(limit: Option<&LengthLimit>, count: usize) -> Vec<Option<usize>> {
        let configured: &[usize] = match limit {
            None => &[],
            Some(LengthLimit::Single(max)) => std::slice::from_ref(max),
            Some(LengthLimit::PerSource(maxima)) => maxima,
        };
        (0..count).map(|i| configured.get(i).copied()).collect()
    }
}
