//! Wide 1-D convolution layer with trainable kernel and bias.

use ndarray::{Array1, Array3, ArrayViewD};
use rand::Rng;

use crate::error::{DcnnError, DcnnResult};
use crate::math;
use crate::tensor::SequenceTensor;
use super::{Layer, Shape};

/// Wide convolution: `(B, L, in_ch)` → `(B, L + width - 1, out_ch)`.
///
/// Kernel layout is `(width, in_ch, out_ch)`. The layer owns its parameters
/// exclusively; no two layers ever alias the same kernel.
pub struct WideConv1D {
    kernel: Array3<f32>,
    bias: Array1<f32>,
    pub width: usize,
    pub in_ch: usize,
    pub out_ch: usize,
}

impl WideConv1D {
    pub const NAME: &'static str = "WideConv1D";

    /// Glorot-uniform kernel, zero bias.
    pub fn new<R: Rng + ?Sized>(
        width: usize,
        in_ch: usize,
        out_ch: usize,
        rng: &mut R,
    ) -> DcnnResult<Self> {
        if width == 0 || in_ch == 0 || out_ch == 0 {
            return Err(DcnnError::InvalidConfig(format!(
                "convolution needs width, in_ch and out_ch >= 1 (got {width}, {in_ch}, {out_ch})"
            )));
        }
        let limit = math::glorot_limit(width * in_ch, width * out_ch);
        let kernel = Array3::from_shape_simple_fn((width, in_ch, out_ch), || {
            rng.random_range(-limit..=limit)
        });
        Ok(Self {
            kernel,
            bias: Array1::zeros(out_ch),
            width,
            in_ch,
            out_ch,
        })
    }

    pub fn from_weights(kernel: Array3<f32>, bias: Array1<f32>) -> DcnnResult<Self> {
        let (width, in_ch, out_ch) = kernel.dim();
        if width == 0 || in_ch == 0 || out_ch == 0 {
            return Err(DcnnError::InvalidConfig(
                "convolution kernel has an empty axis".into(),
            ));
        }
        if bias.len() != out_ch {
            return Err(DcnnError::DimensionMismatch { expected: out_ch, actual: bias.len() });
        }
        Ok(Self { kernel, bias, width, in_ch, out_ch })
    }

    pub fn kernel(&self) -> &Array3<f32> { &self.kernel }
    pub fn bias(&self) -> &Array1<f32> { &self.bias }

    pub fn load_weights(&mut self, kernel: Array3<f32>, bias: Array1<f32>) -> DcnnResult<()> {
        if kernel.dim() != self.kernel.dim() {
            return Err(DcnnError::DimensionMismatch {
                expected: self.kernel.len(),
                actual: kernel.len(),
            });
        }
        if bias.len() != self.out_ch {
            return Err(DcnnError::DimensionMismatch { expected: self.out_ch, actual: bias.len() });
        }
        self.kernel = kernel;
        self.bias = bias;
        Ok(())
    }
}

impl Layer for WideConv1D {
    fn name(&self) -> &'static str { Self::NAME }

    fn output_shape(&self, input_shape: &Shape) -> DcnnResult<Shape> {
        if input_shape.is_flat() {
            return Err(DcnnError::DimensionMismatch { expected: 2, actual: input_shape.ndim });
        }
        if input_shape.channels() != self.in_ch {
            return Err(DcnnError::ShapeMismatch {
                expected: self.in_ch,
                actual: input_shape.channels(),
            });
        }
        if input_shape.positions() == 0 {
            return Err(DcnnError::InvalidInputLength { expected: 1, actual: 0 });
        }
        let out_len = math::wide_conv_output_len(input_shape.positions(), self.width);
        Ok(Shape::d2(out_len, self.out_ch))
    }

    fn forward(&self, input: &SequenceTensor) -> DcnnResult<SequenceTensor> {
        let out = math::wide_conv1d(input.view(), self.kernel.view(), self.bias.view())?;
        Ok(SequenceTensor::from_array(out))
    }

    fn backward(
        &mut self,
        input: &SequenceTensor,
        _output: &SequenceTensor,
        output_grad: &SequenceTensor,
        learning_rate: f32,
    ) -> DcnnResult<SequenceTensor> {
        let grads = math::wide_conv1d_backward(input.view(), self.kernel.view(), output_grad.view())?;
        self.kernel.scaled_add(-learning_rate, &grads.kernel);
        self.bias.scaled_add(-learning_rate, &grads.bias);
        Ok(SequenceTensor::from_array(grads.input))
    }

    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        vec![self.kernel.view().into_dyn(), self.bias.view().into_dyn()]
    }
}
