//! Order-preserving k-max pooling over the position axis.
//!
//! For every `(example, channel)` slice the `k` largest activations are kept
//! and emitted in their original left-to-right order, so the pooled result is
//! still a (shorter) sequence that later convolutions can slide over.
//! No learnable parameters.

use log::debug;

use crate::error::{DcnnError, DcnnResult};
use crate::math::{self, TieBreak};
use crate::tensor::SequenceTensor;
use super::{Layer, Shape};

/// k-max pooling layer: `(B, L, C)` → `(B, k, C)` for `k <= L`.
#[derive(Debug, Clone)]
pub struct KMaxPool1D {
    pub k: usize,
    pub tie_break: TieBreak,
    /// Zero-based stage index, reported in length errors.
    pub stage: usize,
}

impl KMaxPool1D {
    pub const NAME: &'static str = "KMaxPool1D";

    pub fn new(k: usize) -> DcnnResult<Self> {
        Self::with_tie_break(k, TieBreak::default())
    }

    pub fn with_tie_break(k: usize, tie_break: TieBreak) -> DcnnResult<Self> {
        if k == 0 {
            return Err(DcnnError::InvalidConfig("pooling k must be >= 1".into()));
        }
        Ok(Self { k, tie_break, stage: 0 })
    }

    /// Tag the layer with its stage index.
    pub fn at_stage(mut self, stage: usize) -> Self {
        self.stage = stage;
        self
    }

    fn check_length(&self, available: usize) -> DcnnResult<()> {
        if self.k > available {
            return Err(DcnnError::PoolingExceedsLength {
                stage: self.stage,
                k: self.k,
                available,
            });
        }
        Ok(())
    }
}

impl Layer for KMaxPool1D {
    fn name(&self) -> &'static str { Self::NAME }

    fn output_shape(&self, input_shape: &Shape) -> DcnnResult<Shape> {
        if input_shape.is_flat() {
            return Err(DcnnError::DimensionMismatch { expected: 2, actual: input_shape.ndim });
        }
        self.check_length(input_shape.positions())?;
        Ok(Shape::d2(self.k, input_shape.channels()))
    }

    fn forward(&self, input: &SequenceTensor) -> DcnnResult<SequenceTensor> {
        self.check_length(input.positions())?;
        if log::log_enabled!(log::Level::Debug) {
            let degenerate = degenerate_slices(input, self.k);
            if degenerate > 0 {
                debug!(
                    "stage {}: {degenerate} slice(s) have fewer than k={} non-zero positions",
                    self.stage, self.k
                );
            }
        }
        let out = math::k_max_pool(input.view(), self.k, self.tie_break)?;
        Ok(SequenceTensor::from_array(out))
    }

    fn backward(
        &mut self,
        input: &SequenceTensor,
        _output: &SequenceTensor,
        output_grad: &SequenceTensor,
        _learning_rate: f32,
    ) -> DcnnResult<SequenceTensor> {
        self.check_length(input.positions())?;
        let indices = math::k_max_pool_indices(input.view(), self.k, self.tie_break)?;
        let grad = math::scatter_positions(output_grad.view(), &indices, input.positions())?;
        Ok(SequenceTensor::from_array(grad))
    }
}

/// Count `(example, channel)` slices with fewer than `k` non-zero values.
///
/// Such slices still pool fine, but part of their output is padding-derived.
fn degenerate_slices(input: &SequenceTensor, k: usize) -> usize {
    let (batch, _, channels) = input.dim();
    let view = input.view();
    let mut count = 0;
    for b in 0..batch {
        for c in 0..channels {
            let nonzero = view
                .slice(ndarray::s![b, .., c])
                .iter()
                .filter(|&&v| v != 0.0)
                .count();
            if nonzero < k {
                count += 1;
            }
        }
    }
    count
}
