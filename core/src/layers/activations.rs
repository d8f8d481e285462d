//! Activation layers: ReLU, Tanh, Sigmoid, Identity.
//!
//! Each activation is a parameterless, shape-preserving layer, so it can sit
//! after any convolution or dense layer in a pipeline.

use serde::{Deserialize, Serialize};

use crate::error::{DcnnError, DcnnResult};
use crate::math;
use crate::tensor::SequenceTensor;
use super::{Layer, Shape};

/// Non-linearity applied after each wide convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Relu,
    Tanh,
    Sigmoid,
    Identity,
}

impl Activation {
    /// A fresh layer implementing this activation.
    pub fn layer(self) -> Box<dyn Layer> {
        match self {
            Activation::Relu => Box::new(ReLULayer),
            Activation::Tanh => Box::new(TanhLayer),
            Activation::Sigmoid => Box::new(SigmoidLayer),
            Activation::Identity => Box::new(IdentityLayer),
        }
    }
}

/// `grad[i] = output_grad[i] * local(source[i])`, shape-checked.
fn chain_elementwise(
    source: &SequenceTensor,
    output_grad: &SequenceTensor,
    local: impl Fn(f32) -> f32,
) -> DcnnResult<SequenceTensor> {
    if source.dim() != output_grad.dim() {
        return Err(DcnnError::DimensionMismatch {
            expected: source.len(),
            actual: output_grad.len(),
        });
    }
    let mut grad = output_grad.clone();
    grad.array_mut()
        .zip_mut_with(source.array(), |g, &x| *g *= local(x));
    Ok(grad)
}

// =============================================================================
// ReLU
// =============================================================================

/// max(0, x)
pub struct ReLULayer;

impl Layer for ReLULayer {
    fn name(&self) -> &'static str { "ReLU" }

    fn output_shape(&self, input_shape: &Shape) -> DcnnResult<Shape> {
        Ok(*input_shape)
    }

    fn forward(&self, input: &SequenceTensor) -> DcnnResult<SequenceTensor> {
        Ok(SequenceTensor::from_array(input.array().mapv(math::relu)))
    }

    fn backward(
        &mut self,
        input: &SequenceTensor,
        _output: &SequenceTensor,
        output_grad: &SequenceTensor,
        _learning_rate: f32,
    ) -> DcnnResult<SequenceTensor> {
        chain_elementwise(input, output_grad, math::relu_grad)
    }
}

// =============================================================================
// Tanh
// =============================================================================

pub struct TanhLayer;

impl Layer for TanhLayer {
    fn name(&self) -> &'static str { "Tanh" }

    fn output_shape(&self, input_shape: &Shape) -> DcnnResult<Shape> {
        Ok(*input_shape)
    }

    fn forward(&self, input: &SequenceTensor) -> DcnnResult<SequenceTensor> {
        Ok(SequenceTensor::from_array(input.array().mapv(f32::tanh)))
    }

    fn backward(
        &mut self,
        _input: &SequenceTensor,
        output: &SequenceTensor,
        output_grad: &SequenceTensor,
        _learning_rate: f32,
    ) -> DcnnResult<SequenceTensor> {
        chain_elementwise(output, output_grad, math::tanh_grad_from_output)
    }
}

// =============================================================================
// Sigmoid
// =============================================================================

/// Logistic σ(x) ∈ (0, 1). Also used as the classification head's output.
pub struct SigmoidLayer;

impl Layer for SigmoidLayer {
    fn name(&self) -> &'static str { "Sigmoid" }

    fn output_shape(&self, input_shape: &Shape) -> DcnnResult<Shape> {
        Ok(*input_shape)
    }

    fn forward(&self, input: &SequenceTensor) -> DcnnResult<SequenceTensor> {
        Ok(SequenceTensor::from_array(input.array().mapv(math::sigmoid)))
    }

    fn backward(
        &mut self,
        _input: &SequenceTensor,
        output: &SequenceTensor,
        output_grad: &SequenceTensor,
        _learning_rate: f32,
    ) -> DcnnResult<SequenceTensor> {
        chain_elementwise(output, output_grad, math::sigmoid_grad_from_output)
    }
}

// =============================================================================
// Identity
// =============================================================================

pub struct IdentityLayer;

impl Layer for IdentityLayer {
    fn name(&self) -> &'static str { "Identity" }

    fn output_shape(&self, input_shape: &Shape) -> DcnnResult<Shape> {
        Ok(*input_shape)
    }

    fn forward(&self, input: &SequenceTensor) -> DcnnResult<SequenceTensor> {
        Ok(input.clone())
    }

    fn backward(
        &mut self,
        input: &SequenceTensor,
        _output: &SequenceTensor,
        output_grad: &SequenceTensor,
        _learning_rate: f32,
    ) -> DcnnResult<SequenceTensor> {
        chain_elementwise(input, output_grad, |_| 1.0)
    }
}
