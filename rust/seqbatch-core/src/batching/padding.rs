// rust/seqbatch-core/src/batching/padding.rs

use std::sync::Arc;

use crate::dataset::{BoxedDataset, Dataset, Elements, Transformation};
use crate::error::{PipelineError, Result};
use crate::example::Example;
use crate::shapes::Shapes;
use crate::tensor::Tensor;

/// Combines examples into one batch, right-padding every tensor with zeros.
///
/// Every example must have the nesting described by `shapes`; each tensor is
/// padded to the fixed dims of its shape, or to the largest extent in the
/// group for unconstrained dims.
pub fn pad_batch(examples: &[Example], shapes: &Shapes) -> Result<Example> {
    if examples.is_empty() {
        return Err(PipelineError::structure("cannot batch zero examples"));
    }
    match shapes {
        Shapes::Tensor(shape) => {
            let tensors = examples
                .iter()
                .map(|e| {
                    e.as_tensor().ok_or_else(|| {
                        PipelineError::structure(format!("expected a tensor, got a {}", e.kind()))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            let target = shape.resolve(&tensors)?;
            Ok(Example::Tensor(Tensor::stack_padded(&tensors, &target)?))
        }
        Shapes::Dict(fields) => {
            let mut batched = std::collections::BTreeMap::new();
            for (key, field_shapes) in fields {
                let column = examples
                    .iter()
                    .map(|e| match e {
                        Example::Dict(map) if map.len() == fields.len() => {
                            map.get(key).cloned().ok_or_else(|| {
                                PipelineError::structure(format!("missing field '{}'", key))
                            })
                        }
                        Example::Dict(_) => Err(PipelineError::structure(
                            "examples in a batch must share the same fields",
                        )),
                        other => Err(PipelineError::structure(format!(
                            "expected a dictionary, got a {}",
                            other.kind()
                        ))),
                    })
                    .collect::<Result<Vec<_>>>()?;
                batched.insert(key.clone(), pad_batch(&column, field_shapes)?);
            }
            Ok(Example::Dict(batched))
        }
        Shapes::Tuple(items) => {
            let mut batched = Vec::with_capacity(items.len());
            for (position, item_shapes) in items.iter().enumerate() {
                let column = examples
                    .iter()
                    .map(|e| match e {
                        Example::Tuple(values) if values.len() == items.len() => {
                            Ok(values[position].clone())
                        }
                        other => Err(PipelineError::structure(format!(
                            "expected a tuple of {} items, got a {}",
                            items.len(),
                            other.kind()
                        ))),
                    })
                    .collect::<Result<Vec<_>>>()?;
                batched.push(pad_batch(&column, item_shapes)?);
            }
            Ok(Example::Tuple(batched))
        }
    }
}

/// Reusable batch assembler: fixed padded shapes, or shapes inferred once
/// from the first example it sees.
#[derive(Debug, Clone)]
pub(crate) struct PadState {
    shapes: Option<Shapes>,
}

impl PadState {
    pub(crate) fn new(shapes: Option<Shapes>) -> Self {
        Self { shapes }
    }

    pub(crate) fn pad(&mut self, examples: &[Example]) -> Result<Example> {
        let first = examples
            .first()
            .ok_or_else(|| PipelineError::structure("cannot batch zero examples"))?;
        let shapes = self
            .shapes
            .get_or_insert_with(|| Shapes::unconstrained(first));
        pad_batch(examples, shapes)
    }
}

/// Groups consecutive examples into padded batches of `batch_size`.
///
/// The last batch of a finite stream may be smaller.
#[derive(Debug, Clone)]
pub struct Batcher {
    batch_size: usize,
    padded_shapes: Option<Shapes>,
}

impl Batcher {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            padded_shapes: None,
        }
    }

    /// Pads to explicit shapes instead of inferring them.
    pub fn with_padded_shapes(mut self, padded_shapes: Option<Shapes>) -> Self {
        self.padded_shapes = padded_shapes;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl Transformation<Example, Example> for Batcher {
    fn apply(&self, dataset: BoxedDataset<Example>) -> Result<BoxedDataset<Example>> {
        if self.batch_size == 0 {
            return Err(PipelineError::invalid_configuration(
                "batch_size must be greater than 0",
            ));
        }
        Ok(Arc::new(BatchDataset {
            inner: dataset,
            batch_size: self.batch_size,
            padded_shapes: self.padded_shapes.clone(),
        }))
    }
}

struct BatchDataset {
    inner: BoxedDataset<Example>,
    batch_size: usize,
    padded_shapes: Option<Shapes>,
}

impl Dataset<Example> for BatchDataset {
    fn iter(&self) -> Result<Elements<Example>> {
        Ok(Box::new(BatchIter {
            upstream: self.inner.iter()?,
            batch_size: self.batch_size,
            pad: PadState::new(self.padded_shapes.clone()),
            pending: Vec::with_capacity(self.batch_size),
            done: false,
        }))
    }

    fn name(&self) -> &str {
        "batch"
    }
}

struct BatchIter {
    upstream: Elements<Example>,
    batch_size: usize,
    pad: PadState,
    // Examples of the batch being filled; kept across upstream errors.
    pending: Vec<Example>,
    done: bool,
}

impl Iterator for BatchIter {
    type Item = Result<Example>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        while self.pending.len() < self.batch_size {
            match self.upstream.next() {
                Some(Ok(example)) => self.pending.push(example),
                Some(Err(e)) => return Some(Err(e)),
                None => {
                    self.done = true;
                    break;
                }
            }
        }
        if self.pending.is_empty() {
            return None;
        }
        let window = std::mem::replace(&mut self.pending, Vec::with_capacity(self.batch_size));
        Some(self.pad.pad(&window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{GeneratorDataset, InMemoryDataset};
    use crate::shapes::TensorShape;

    fn record(len: usize) -> Example {
        Example::dict([
            ("ids", Tensor::from_i64((1..=len as i64).collect())),
            ("length", Tensor::scalar_i64(len as i64)),
        ])
    }

    fn batches(dataset: BoxedDataset<Example>, batcher: Batcher) -> Vec<Example> {
        batcher
            .apply(dataset)
            .unwrap()
            .iter()
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn test_padding_to_batch_max() {
        let dataset = InMemoryDataset::new(vec![record(3), record(5)]).boxed();
        let out = batches(dataset, Batcher::new(2));
        assert_eq!(out.len(), 1);

        let ids = out[0].tensor("ids").unwrap();
        assert_eq!(ids.shape(), &[2, 5]);
        assert_eq!(ids.as_i64().unwrap(), &[1, 2, 3, 0, 0, 1, 2, 3, 4, 5]);
        assert_eq!(out[0].tensor("length").unwrap().as_i64().unwrap(), &[3, 5]);
    }

    #[test]
    fn test_last_batch_may_be_short() {
        let dataset = InMemoryDataset::new((1..=5).map(record).collect()).boxed();
        let sizes: Vec<_> = batches(dataset, Batcher::new(2))
            .iter()
            .map(|b| b.batch_size().unwrap())
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_explicit_padded_shapes() {
        let shapes = Shapes::Dict(
            [
                ("ids".to_string(), Shapes::Tensor(TensorShape::fixed(&[6]))),
                ("length".to_string(), Shapes::Tensor(TensorShape::fixed(&[]))),
            ]
            .into_iter()
            .collect(),
        );
        let dataset = InMemoryDataset::new(vec![record(2), record(3)]).boxed();
        let out = batches(dataset, Batcher::new(4).with_padded_shapes(Some(shapes)));
        assert_eq!(out[0].tensor("ids").unwrap().shape(), &[2, 6]);
    }

    #[test]
    fn test_mismatched_fields_fail() {
        let odd = Example::dict([("other", Tensor::from_i64(vec![1]))]);
        let err = pad_batch(&[record(1), odd], &Shapes::unconstrained(&record(1))).unwrap_err();
        assert!(matches!(err, PipelineError::Structure { .. }));
    }

    #[test]
    fn test_pairs_batch_per_side() {
        let pair = |a, b| Example::pair(record(a), record(b));
        let dataset = InMemoryDataset::new(vec![pair(2, 4), pair(3, 1)]).boxed();
        let out = batches(dataset, Batcher::new(2));
        let (features, labels) = out[0].as_pair().unwrap();
        assert_eq!(features.tensor("ids").unwrap().shape(), &[2, 3]);
        assert_eq!(labels.tensor("ids").unwrap().shape(), &[2, 4]);
    }

    #[test]
    fn test_upstream_error_keeps_partial_batch() {
        let dataset = GeneratorDataset::new(|| {
            let elements = vec![
                Ok(record(1)),
                Ok(record(2)),
                Err(PipelineError::process("bad record")),
                Ok(record(4)),
            ];
            Ok(Box::new(elements.into_iter()) as Elements<Example>)
        })
        .boxed();
        let mut iter = Batcher::new(3).apply(dataset).unwrap().iter().unwrap();

        assert!(matches!(iter.next(), Some(Err(PipelineError::Process { .. }))));
        let batch = iter.next().unwrap().unwrap();
        assert_eq!(batch.tensor("length").unwrap().as_i64().unwrap(), &[1, 2, 4]);
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let dataset = InMemoryDataset::new(vec![record(1)]).boxed();
        let err = Batcher::new(0).apply(dataset).err().unwrap();
        assert!(err.is_invalid_configuration());
    }
}
