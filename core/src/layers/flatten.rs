//! Flatten layer: `(B, k, C)` → `(B, 1, k * C)`.
//!
//! Only the shape changes; values keep row-major order (all channels of the
//! first pooled position, then the next position, and so on).

use crate::error::{DcnnError, DcnnResult};
use crate::tensor::SequenceTensor;
use super::{Layer, Shape};

pub struct FlattenLayer;

impl Layer for FlattenLayer {
    fn name(&self) -> &'static str { "Flatten" }

    fn output_shape(&self, input_shape: &Shape) -> DcnnResult<Shape> {
        Ok(Shape::d1(input_shape.total()))
    }

    fn forward(&self, input: &SequenceTensor) -> DcnnResult<SequenceTensor> {
        input.reshape(1, input.positions() * input.channels())
    }

    fn backward(
        &mut self,
        input: &SequenceTensor,
        _output: &SequenceTensor,
        output_grad: &SequenceTensor,
        _learning_rate: f32,
    ) -> DcnnResult<SequenceTensor> {
        if output_grad.batch() != input.batch() {
            return Err(DcnnError::DimensionMismatch {
                expected: input.batch(),
                actual: output_grad.batch(),
            });
        }
        output_grad.reshape(input.positions(), input.channels())
    }
}
