mod collection;
mod matrix;

pub use collection::{Splittable, split_collection};
pub use matrix::{
    BlockCoord, BlockGrid, Matrix, MatrixSplit, NestedMatrix, from_nested, split_matrix_pair,
    to_nested,
};

/// One slice of a job's input tagged with the slice of the original input it came from.
///
/// For a single job the origins are exactly `0..n` with no gaps or duplicates.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition<T> {
    origin: usize,
    data: T,
}

impl<T> Partition<T> {
    /// Creates a new `Partition`.
    ///
    /// # Arguments
    /// * `origin` - The index of the slice of the original input.
    /// * `data` - The slice itself.
    pub fn new(origin: usize, data: T) -> Self {
        Self { origin, data }
    }

    pub fn origin(&self) -> usize {
        self.origin
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }

    /// Transforms the data while keeping the origin tag.
    pub fn map<U, F>(self, f: F) -> Partition<U>
    where
        F: FnOnce(T) -> U,
    {
        Partition {
            origin: self.origin,
            data: f(self.data),
        }
    }
}
