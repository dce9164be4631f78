// rust/seqbatch-core/src/shapes.rs

//! Padded-shape descriptors and shape inference.

use std::collections::BTreeMap;

use crate::dataset::Dataset;
use crate::error::{PipelineError, Result};
use crate::example::Example;
use crate::tensor::Tensor;

/// Shape of one tensor in a batch; `None` dims are padded to the largest
/// extent present in the batch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TensorShape {
    dims: Vec<Option<usize>>,
}

impl TensorShape {
    pub fn new(dims: Vec<Option<usize>>) -> Self {
        Self { dims }
    }

    /// A shape with every dim fixed.
    pub fn fixed(dims: &[usize]) -> Self {
        Self {
            dims: dims.iter().copied().map(Some).collect(),
        }
    }

    /// The shape of `tensor` with its leading (sequence) axis left free.
    pub fn sequence_of(tensor: &Tensor) -> Self {
        Self {
            dims: tensor
                .shape()
                .iter()
                .enumerate()
                .map(|(axis, &dim)| if axis == 0 { None } else { Some(dim) })
                .collect(),
        }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[Option<usize>] {
        &self.dims
    }

    /// Resolves the padded extent of every axis for a group of tensors.
    pub(crate) fn resolve(&self, tensors: &[&Tensor]) -> Result<Vec<usize>> {
        let mut target = Vec::with_capacity(self.dims.len());
        for (axis, dim) in self.dims.iter().enumerate() {
            let observed = tensors
                .iter()
                .map(|t| t.shape().get(axis).copied())
                .try_fold(0usize, |acc, d| d.map(|d| acc.max(d)))
                .ok_or_else(|| {
                    PipelineError::shape(format!(
                        "tensor rank does not match padded shape {:?}",
                        self.dims
                    ))
                })?;
            match dim {
                Some(fixed) if observed > *fixed => {
                    return Err(PipelineError::shape(format!(
                        "axis {} has extent {} but is padded to {}",
                        axis, observed, fixed
                    )));
                }
                Some(fixed) => target.push(*fixed),
                None => target.push(observed),
            }
        }
        Ok(target)
    }
}

/// Padded shapes for a whole example, mirroring its nesting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shapes {
    Tensor(TensorShape),
    Dict(BTreeMap<String, Shapes>),
    Tuple(Vec<Shapes>),
}

impl Shapes {
    /// Shapes of `example` with every sequence axis unconstrained.
    pub fn unconstrained(example: &Example) -> Self {
        match example {
            Example::Tensor(t) => Shapes::Tensor(TensorShape::sequence_of(t)),
            Example::Dict(fields) => Shapes::Dict(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Shapes::unconstrained(v)))
                    .collect(),
            ),
            Example::Tuple(items) => Shapes::Tuple(items.iter().map(Shapes::unconstrained).collect()),
        }
    }

    pub fn is_dict(&self) -> bool {
        matches!(self, Shapes::Dict(_))
    }
}

/// Infers the padded shapes of a dataset from its first element.
///
/// A fresh pass is started for the lookahead, so callers iterating the same
/// dataset are unaffected.
///
/// # Errors
///
/// Returns [`PipelineError::EmptySource`] if the dataset has no elements,
/// or the error produced while computing the first element.
pub fn infer_shapes(dataset: &dyn Dataset<Example>) -> Result<Shapes> {
    let mut lookahead = dataset.iter()?;
    match lookahead.next() {
        Some(first) => Ok(Shapes::unconstrained(&first?)),
        None => Err(PipelineError::empty_source(dataset.name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::InMemoryDataset;

    #[test]
    fn test_sequence_axis_is_free() {
        let tensor = Tensor::from_shape_f32(vec![3, 4], vec![0.0; 12]).unwrap();
        assert_eq!(TensorShape::sequence_of(&tensor).dims(), &[None, Some(4)]);
        assert_eq!(TensorShape::sequence_of(&Tensor::scalar_i64(1)).rank(), 0);
    }

    #[test]
    fn test_resolve_pads_to_max_or_fixed() {
        let a = Tensor::from_i64(vec![1, 2, 3]);
        let b = Tensor::from_i64(vec![1, 2, 3, 4, 5]);
        assert_eq!(TensorShape::new(vec![None]).resolve(&[&a, &b]).unwrap(), vec![5]);
        assert_eq!(TensorShape::fixed(&[8]).resolve(&[&a, &b]).unwrap(), vec![8]);
        assert!(TensorShape::fixed(&[4]).resolve(&[&a, &b]).is_err());
        assert!(TensorShape::fixed(&[4, 1]).resolve(&[&a]).is_err());
    }

    #[test]
    fn test_infer_shapes_from_first_element() {
        let example = Example::dict([("ids", Tensor::from_i64(vec![1, 2]))]);
        let dataset = InMemoryDataset::new(vec![example]);
        let shapes = infer_shapes(&dataset).unwrap();
        assert!(shapes.is_dict());

        let Shapes::Dict(fields) = shapes else {
            unreachable!()
        };
        assert_eq!(fields["ids"], Shapes::Tensor(TensorShape::new(vec![None])));
    }

    #[test]
    fn test_infer_shapes_empty_dataset() {
        let dataset = InMemoryDataset::<Example>::new(vec![]);
        let err = infer_shapes(&dataset).unwrap_err();
        assert!(matches!(err, PipelineError::EmptySource { .. }));
    }
}
