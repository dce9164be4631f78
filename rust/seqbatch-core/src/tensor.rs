// rust/seqbatch-core/src/tensor.rs

//! Dense numeric arrays carried by examples.
//!
//! Tensors wrap dynamic-rank `ndarray` arrays. Only the two element types the
//! pipelines need are supported: `i64` for token ids, lengths and indices,
//! and `f32` for dense features. Padding always uses the type's zero value.

use ndarray::{Array1, ArrayD, Axis, IxDyn, Slice};

use crate::error::{PipelineError, Result};

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Int64,
    Float32,
}

/// Typed storage of a tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    Int64(ArrayD<i64>),
    Float32(ArrayD<f32>),
}

impl TensorData {
    pub fn dtype(&self) -> DType {
        match self {
            TensorData::Int64(_) => DType::Int64,
            TensorData::Float32(_) => DType::Float32,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            TensorData::Int64(a) => a.shape(),
            TensorData::Float32(a) => a.shape(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorData::Int64(a) => a.len(),
            TensorData::Float32(a) => a.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A dense array of `i64` or `f32` values.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: TensorData,
}

impl Tensor {
    /// An `i64` tensor of the given shape, checking that `values` holds
    /// exactly `prod(shape)` elements.
    pub fn from_shape_i64(shape: Vec<usize>, values: Vec<i64>) -> Result<Self> {
        Ok(Self::from(shaped(shape, values)?))
    }

    /// An `f32` tensor of the given shape.
    pub fn from_shape_f32(shape: Vec<usize>, values: Vec<f32>) -> Result<Self> {
        Ok(Self::from(shaped(shape, values)?))
    }

    /// A rank-1 `i64` tensor, typically a sequence of token ids.
    pub fn from_i64(values: Vec<i64>) -> Self {
        Self::from(Array1::from(values).into_dyn())
    }

    /// A rank-1 `f32` tensor.
    pub fn from_f32(values: Vec<f32>) -> Self {
        Self::from(Array1::from(values).into_dyn())
    }

    pub fn scalar_i64(value: i64) -> Self {
        Self::from(ArrayD::from_elem(IxDyn(&[]), value))
    }

    pub fn scalar_f32(value: f32) -> Self {
        Self::from(ArrayD::from_elem(IxDyn(&[]), value))
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn rank(&self) -> usize {
        self.shape().len()
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn num_elements(&self) -> usize {
        self.data.len()
    }

    /// Extent of the first axis, `None` for scalars.
    pub fn leading_dim(&self) -> Option<usize> {
        self.shape().first().copied()
    }

    pub fn array_i64(&self) -> Option<&ArrayD<i64>> {
        match &self.data {
            TensorData::Int64(a) => Some(a),
            TensorData::Float32(_) => None,
        }
    }

    pub fn array_f32(&self) -> Option<&ArrayD<f32>> {
        match &self.data {
            TensorData::Float32(a) => Some(a),
            TensorData::Int64(_) => None,
        }
    }

    /// Values in row-major order.
    pub fn as_i64(&self) -> Option<&[i64]> {
        self.array_i64().and_then(|a| a.as_slice())
    }

    /// Values in row-major order.
    pub fn as_f32(&self) -> Option<&[f32]> {
        self.array_f32().and_then(|a| a.as_slice())
    }

    /// The single value of a one-element `i64` tensor.
    pub fn to_scalar_i64(&self) -> Option<i64> {
        match self.array_i64() {
            Some(a) if a.len() == 1 => a.iter().next().copied(),
            _ => None,
        }
    }

    /// Row `index` along the first axis, as a tensor of rank `rank() - 1`.
    pub fn row(&self, index: usize) -> Option<Tensor> {
        let rows = self.leading_dim()?;
        if index >= rows {
            return None;
        }
        let data = match &self.data {
            TensorData::Int64(a) => TensorData::Int64(a.index_axis(Axis(0), index).to_owned()),
            TensorData::Float32(a) => {
                TensorData::Float32(a.index_axis(Axis(0), index).to_owned())
            }
        };
        Some(Tensor { data })
    }

    /// Stacks tensors along a new leading axis, right-padding each one with
    /// zeros to `target` (which must have the tensors' rank).
    pub(crate) fn stack_padded(tensors: &[&Tensor], target: &[usize]) -> Result<Tensor> {
        let first = tensors
            .first()
            .ok_or_else(|| PipelineError::shape("cannot stack an empty list of tensors"))?;
        for tensor in tensors {
            if tensor.rank() != target.len()
                || tensor.shape().iter().zip(target).any(|(dim, max)| dim > max)
            {
                return Err(PipelineError::shape(format!(
                    "tensor of shape {:?} does not fit padded shape {:?}",
                    tensor.shape(),
                    target
                )));
            }
        }

        let mut shape = Vec::with_capacity(target.len() + 1);
        shape.push(tensors.len());
        shape.extend_from_slice(target);

        let data = match &first.data {
            TensorData::Int64(_) => {
                TensorData::Int64(stack_arrays(tensors, &shape, Tensor::array_i64)?)
            }
            TensorData::Float32(_) => {
                TensorData::Float32(stack_arrays(tensors, &shape, Tensor::array_f32)?)
            }
        };
        Ok(Tensor { data })
    }
}

fn shaped<T>(shape: Vec<usize>, values: Vec<T>) -> Result<ArrayD<T>> {
    let given = values.len();
    ArrayD::from_shape_vec(IxDyn(&shape), values).map_err(|_| {
        PipelineError::shape(format!(
            "shape {:?} needs {} values but {} were given",
            shape,
            shape.iter().product::<usize>(),
            given
        ))
    })
}

/// A `shape` array filled with `T::default()`, with each tensor assigned
/// into the leading corner of its row.
fn stack_arrays<T, F>(tensors: &[&Tensor], shape: &[usize], typed: F) -> Result<ArrayD<T>>
where
    T: Clone + Default,
    F: Fn(&Tensor) -> Option<&ArrayD<T>>,
{
    let mut out = ArrayD::from_elem(IxDyn(shape), T::default());
    for (i, tensor) in tensors.iter().enumerate() {
        let values = typed(tensor).ok_or_else(|| {
            PipelineError::shape(format!(
                "cannot batch {:?} values with {:?} values",
                tensors[0].dtype(),
                tensor.dtype()
            ))
        })?;
        let mut row = out.index_axis_mut(Axis(0), i);
        row.slice_each_axis_mut(|ax| Slice::from(0..values.shape()[ax.axis.index()]))
            .assign(values);
    }
    Ok(out)
}

impl From<ArrayD<i64>> for Tensor {
    fn from(array: ArrayD<i64>) -> Self {
        Tensor {
            data: TensorData::Int64(array),
        }
    }
}

impl From<ArrayD<f32>> for Tensor {
    fn from(array: ArrayD<f32>) -> Self {
        Tensor {
            data: TensorData::Float32(array),
        }
    }
}

impl From<Vec<i64>> for Tensor {
    fn from(values: Vec<i64>) -> Self {
        Tensor::from_i64(values)
    }
}

impl From<Vec<f32>> for Tensor {
    fn from(values: Vec<f32>) -> Self {
        Tensor::from_f32(values)
    }
}
