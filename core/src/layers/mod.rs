//! Layer zoo for the convolution/pooling pipeline.

pub mod activations;
pub mod conv;
pub mod dense;
pub mod embedding;
pub mod flatten;
pub mod pooling;

use ndarray::ArrayViewD;

use crate::error::DcnnResult;
use crate::tensor::SequenceTensor;

/// Per-example shape; the batch axis is always dynamic.
///
/// `d2(positions, channels)` describes a sequence, `d1(features)` a flattened
/// vector (carried as a single position).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    pub dims: [usize; 2],
    pub ndim: usize,
}

impl Shape {
    pub const fn d1(features: usize) -> Self {
        Self { dims: [features, 0], ndim: 1 }
    }
    pub const fn d2(positions: usize, channels: usize) -> Self {
        Self { dims: [positions, channels], ndim: 2 }
    }
    pub fn total(&self) -> usize {
        self.dims[..self.ndim].iter().product()
    }
    pub fn positions(&self) -> usize {
        if self.ndim == 2 { self.dims[0] } else { 1 }
    }
    pub fn channels(&self) -> usize {
        if self.ndim == 2 { self.dims[1] } else { self.dims[0] }
    }
    pub fn is_flat(&self) -> bool {
        self.ndim == 1
    }
}

/// One step of a pipeline.
///
/// `output_shape` is the construction-time contract: a model calls it for
/// every layer before accepting the chain, so any length or channel problem
/// surfaces before the first batch.
pub trait Layer: Send {
    fn name(&self) -> &'static str;

    fn output_shape(&self, input_shape: &Shape) -> DcnnResult<Shape>;

    fn forward(&self, input: &SequenceTensor) -> DcnnResult<SequenceTensor>;

    /// Gradient w.r.t. `input`, applying an SGD step to any owned parameters.
    ///
    /// `output` is what `forward(input)` returned.
    fn backward(
        &mut self,
        input: &SequenceTensor,
        output: &SequenceTensor,
        output_grad: &SequenceTensor,
        learning_rate: f32,
    ) -> DcnnResult<SequenceTensor>;

    /// Views of every learned tensor, in a fixed order.
    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        Vec::new()
    }

    /// Number of learned scalars.
    fn parameter_count(&self) -> usize {
        self.parameters().iter().map(|p| p.len()).sum()
    }
}

pub use activations::{Activation, IdentityLayer, ReLULayer, SigmoidLayer, TanhLayer};
pub use conv::WideConv1D;
pub use dense::Dense;
pub use embedding::Embedding;
pub use flatten::FlattenLayer;
pub use pooling::KMaxPool1D;
