//! Rank-3 `f32` sequence tensor with axes `(batch, position, channel)`.
//!
//! Every layer consumes and produces this type. Flattened vectors are carried
//! as a single-position sequence `(batch, 1, features)` so that fan-out/fuse
//! can concatenate along the channel axis without a separate type.

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};

use crate::error::{DcnnError, DcnnResult};

/// A batch of feature sequences.
///
/// Memory layout: standard (row-major) `Array3<f32>`, so the channel axis is
/// contiguous for each `(batch, position)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceTensor {
    data: Array3<f32>,
}

impl SequenceTensor {
    /// Zero-initialized tensor of the given shape.
    pub fn zeros(batch: usize, positions: usize, channels: usize) -> Self {
        Self {
            data: Array3::zeros((batch, positions, channels)),
        }
    }

    /// Wrap an existing array.
    pub fn from_array(data: Array3<f32>) -> Self {
        Self { data }
    }

    /// Build from a flat row-major buffer.
    ///
    /// Returns an error if `values.len() != batch * positions * channels`.
    pub fn from_shape_vec(
        batch: usize,
        positions: usize,
        channels: usize,
        values: Vec<f32>,
    ) -> DcnnResult<Self> {
        let expected = batch * positions * channels;
        if values.len() != expected {
            return Err(DcnnError::DimensionMismatch {
                expected,
                actual: values.len(),
            });
        }
        let data = Array3::from_shape_vec((batch, positions, channels), values).map_err(|_| {
            DcnnError::DimensionMismatch {
                expected,
                actual: expected,
            }
        })?;
        Ok(Self { data })
    }

    /// Lift a `(batch, features)` matrix into a single-position sequence.
    pub fn from_matrix(matrix: Array2<f32>) -> Self {
        Self {
            data: matrix.insert_axis(Axis(1)),
        }
    }

    #[inline]
    pub fn batch(&self) -> usize {
        self.data.dim().0
    }

    #[inline]
    pub fn positions(&self) -> usize {
        self.data.dim().1
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.data.dim().2
    }

    #[inline]
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn view(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    pub fn array(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn array_mut(&mut self) -> &mut Array3<f32> {
        &mut self.data
    }

    pub fn into_array(self) -> Array3<f32> {
        self.data
    }

    /// One example as a `(position, channel)` view.
    pub fn example(&self, index: usize) -> ArrayView2<'_, f32> {
        self.data.index_axis(Axis(0), index)
    }

    /// Collapse `(batch, position, channel)` into `(batch, position * channel)`.
    ///
    /// Row-major order: all channels of position 0, then position 1, and so on.
    pub fn to_matrix(&self) -> DcnnResult<Array2<f32>> {
        let (batch, positions, channels) = self.data.dim();
        let matrix = self
            .data
            .to_shape((batch, positions * channels))
            .map_err(|_| DcnnError::DimensionMismatch {
                expected: self.data.len(),
                actual: batch * positions * channels,
            })?;
        Ok(matrix.into_owned())
    }

    /// Reinterpret the tensor with a new `(positions, channels)` split.
    pub fn reshape(&self, positions: usize, channels: usize) -> DcnnResult<Self> {
        let (batch, p, c) = self.data.dim();
        if p * c != positions * channels {
            return Err(DcnnError::DimensionMismatch {
                expected: p * c,
                actual: positions * channels,
            });
        }
        let data = self
            .data
            .to_shape((batch, positions, channels))
            .map_err(|_| DcnnError::DimensionMismatch {
                expected: p * c,
                actual: positions * channels,
            })?;
        Ok(Self { data: data.into_owned() })
    }

    /// Total number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
