// rust/seqbatch-core/src/dataset/traits.rs

use std::sync::Arc;

use crate::error::Result;

/// A lazy stream of elements produced by one pass over a dataset.
pub type Elements<T> = Box<dyn Iterator<Item = Result<T>> + Send>;

/// Shared handle to a dataset; transformations wrap and return these.
pub type BoxedDataset<T> = Arc<dyn Dataset<T>>;

/// A restartable, lazy source of elements.
///
/// Every call to `iter` starts an independent pass, so several consumers
/// (a shape lookahead and the main pipeline, or successive epochs) never
/// disturb each other.
pub trait Dataset<T>: Send + Sync {
    /// Starts a new pass over the dataset.
    fn iter(&self) -> Result<Elements<T>>;

    /// Starts a new pass positioned at `offset`.
    ///
    /// The default skips elements one by one; random-access sources should
    /// override it.
    fn iter_from(&self, offset: usize) -> Result<Elements<T>>
    where
        T: 'static,
    {
        Ok(Box::new(self.iter()?.skip(offset)))
    }

    /// Short name used in logs and error messages.
    fn name(&self) -> &str {
        "dataset"
    }
}

/// A pipeline stage: turns one dataset into another.
///
/// Configuration problems are reported by `apply`, before any element is
/// pulled from the input.
pub trait Transformation<In, Out>: Send + Sync {
    fn apply(&self, dataset: BoxedDataset<In>) -> Result<BoxedDataset<Out>>;
}

/// Vector-backed dataset with random access.
#[derive(Debug, Clone)]
pub struct InMemoryDataset<T> {
    elements: Arc<Vec<T>>,
}

impl<T> InMemoryDataset<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(elements: Vec<T>) -> Self {
        Self {
            elements: Arc::new(elements),
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Wraps the dataset in a shared handle.
    pub fn boxed(self) -> BoxedDataset<T> {
        Arc::new(self)
    }
}

impl<T> Dataset<T> for InMemoryDataset<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn iter(&self) -> Result<Elements<T>> {
        self.iter_from(0)
    }

    fn iter_from(&self, offset: usize) -> Result<Elements<T>> {
        let elements = self.elements.clone();
        let start = offset.min(elements.len());
        Ok(Box::new(
            (start..elements.len()).map(move |i| Ok(elements[i].clone())),
        ))
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

/// Dataset backed by a closure that builds a fresh iterator for each pass.
pub struct GeneratorDataset<T> {
    generator: Arc<dyn Fn() -> Result<Elements<T>> + Send + Sync>,
}

impl<T: 'static> GeneratorDataset<T> {
    pub fn new<F>(generator: F) -> Self
    where
        F: Fn() -> Result<Elements<T>> + Send + Sync + 'static,
    {
        Self {
            generator: Arc::new(generator),
        }
    }

    /// Wraps the dataset in a shared handle.
    pub fn boxed(self) -> BoxedDataset<T> {
        Arc::new(self)
    }
}

impl<T: 'static> Dataset<T> for GeneratorDataset<T> {
    fn iter(&self) -> Result<Elements<T>> {
        (self.generator)()
    }

    fn name(&self) -> &str {
        "generator"
    }
}
