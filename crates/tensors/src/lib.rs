//! Plain, framework-free containers for windowed time-series batches.
//!
//! The windower fills these and any model backend reads them, so neither side
//! has to know about the other's tensor library.

use std::fmt;

/// Dense row-major `f32` buffer of shape `[d0, d1, d2]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor3 {
    data: Vec<f32>,
    dims: [usize; 3],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeError {
    pub expected: usize,
    pub actual: usize,
}

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shape needs {} elements, got {}", self.expected, self.actual)
    }
}

impl std::error::Error for ShapeError {}

impl Tensor3 {
    pub fn from_vec(data: Vec<f32>, dims: [usize; 3]) -> Result<Self, ShapeError> {
        let expected = dims.iter().product();
        if data.len() != expected {
            return Err(ShapeError {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { data, dims })
    }

    pub fn zeros(dims: [usize; 3]) -> Self {
        Self {
            data: vec![0.0; dims.iter().product()],
            dims,
        }
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn get(&self, i: usize, j: usize, k: usize) -> f32 {
        self.data[self.offset(i, j, k)]
    }

    /// Mutable view of the innermost row `[i, j, ..]`.
    pub fn row_mut(&mut self, i: usize, j: usize) -> &mut [f32] {
        let start = self.offset(i, j, 0);
        &mut self.data[start..start + self.dims[2]]
    }

    fn offset(&self, i: usize, j: usize, k: usize) -> usize {
        (i * self.dims[1] + j) * self.dims[2] + k
    }
}

/// A group of windowed examples: inputs are `[batch, input_width, inputs]`,
/// labels are `[batch, label_width, labels]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub inputs: Tensor3,
    pub labels: Tensor3,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.inputs.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
