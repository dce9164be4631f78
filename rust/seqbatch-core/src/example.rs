// rust/seqbatch-core/src/example.rs

//! Structured records flowing through the pipelines.
//!
//! An [`Example`] is a nested structure of tensors: a single tensor, a
//! dictionary of named fields or a tuple. A parallel training example is the
//! tuple `(features, labels)`; multi-source features are a tuple of feature
//! records. Batches use the same type, with every tensor carrying a leading
//! batch axis.

use std::collections::BTreeMap;

use crate::error::{PipelineError, Result};
use crate::tensor::Tensor;

#[derive(Debug, Clone, PartialEq)]
pub enum Example {
    Tensor(Tensor),
    Dict(BTreeMap<String, Example>),
    Tuple(Vec<Example>),
}

impl Example {
    /// Builds a dictionary example from `(name, value)` pairs.
    pub fn dict<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Example>,
    {
        Example::Dict(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Builds the `(features, labels)` tuple of a parallel example.
    pub fn pair(features: impl Into<Example>, labels: impl Into<Example>) -> Self {
        Example::Tuple(vec![features.into(), labels.into()])
    }

    pub fn is_dict(&self) -> bool {
        matches!(self, Example::Dict(_))
    }

    /// Splits a parallel example into its features and labels.
    pub fn as_pair(&self) -> Result<(&Example, &Example)> {
        match self {
            Example::Tuple(items) if items.len() == 2 => Ok((&items[0], &items[1])),
            other => Err(PipelineError::structure(format!(
                "expected a (features, labels) pair, got {}",
                other.kind()
            ))),
        }
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Example::Tensor(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, Example>> {
        match self {
            Example::Dict(fields) => Some(fields),
            _ => None,
        }
    }

    /// Field `key` of a dictionary example.
    pub fn get(&self, key: &str) -> Option<&Example> {
        self.as_dict().and_then(|fields| fields.get(key))
    }

    /// Tensor stored under `key` of a dictionary example.
    pub fn tensor(&self, key: &str) -> Option<&Tensor> {
        self.get(key).and_then(Example::as_tensor)
    }

    /// Inserts or replaces a field of a dictionary example.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Example>) -> Result<()> {
        match self {
            Example::Dict(fields) => {
                fields.insert(key.into(), value.into());
                Ok(())
            }
            other => Err(PipelineError::structure(format!(
                "cannot insert a field into a {}",
                other.kind()
            ))),
        }
    }

    /// All tensors in flattened order: dictionary keys ascending, tuple
    /// positions in order.
    pub fn tensors(&self) -> Vec<&Tensor> {
        let mut out = Vec::new();
        self.collect_tensors(&mut out);
        out
    }

    fn collect_tensors<'a>(&'a self, out: &mut Vec<&'a Tensor>) {
        match self {
            Example::Tensor(t) => out.push(t),
            Example::Dict(fields) => fields.values().for_each(|v| v.collect_tensors(out)),
            Example::Tuple(items) => items.iter().for_each(|v| v.collect_tensors(out)),
        }
    }

    /// Leading extent of the first tensor, which is the batch size when this
    /// example is a batch.
    pub fn batch_size(&self) -> Option<usize> {
        self.tensors().first().and_then(|t| t.leading_dim())
    }

    /// Splits a batch back into its individual (still padded) examples.
    pub fn unbatch(&self) -> Result<Vec<Example>> {
        let size = self
            .batch_size()
            .ok_or_else(|| PipelineError::structure("example has no batch axis"))?;
        (0..size).map(|i| self.batch_row(i)).collect()
    }

    fn batch_row(&self, index: usize) -> Result<Example> {
        match self {
            Example::Tensor(t) => t.row(index).map(Example::Tensor).ok_or_else(|| {
                PipelineError::structure(format!(
                    "tensor of shape {:?} has no row {}",
                    t.shape(),
                    index
                ))
            }),
            Example::Dict(fields) => fields
                .iter()
                .map(|(k, v)| Ok((k.clone(), v.batch_row(index)?)))
                .collect::<Result<BTreeMap<_, _>>>()
                .map(Example::Dict),
            Example::Tuple(items) => items
                .iter()
                .map(|v| v.batch_row(index))
                .collect::<Result<Vec<_>>>()
                .map(Example::Tuple),
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Example::Tensor(_) => "tensor",
            Example::Dict(_) => "dictionary",
            Example::Tuple(_) => "tuple",
        }
    }
}

impl From<Tensor> for Example {
    fn from(tensor: Tensor) -> Self {
        Example::Tensor(tensor)
    }
}

impl From<Vec<Example>> for Example {
    fn from(items: Vec<Example>) -> Self {
        Example::Tuple(items)
    }
}
