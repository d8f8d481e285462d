//! Dense (fully-connected) layer over flattened features.
//!
//! Used as the classification head: `Dense(fused_dim → 1)` then sigmoid.

use ndarray::{Array1, Array2, ArrayViewD};
use rand::Rng;

use crate::error::{DcnnError, DcnnResult};
use crate::math;
use crate::tensor::SequenceTensor;
use super::{Layer, Shape};

/// `y = x · W + b` with `W: (in_features, out_features)`.
pub struct Dense {
    weights: Array2<f32>,
    bias: Array1<f32>,
    in_features: usize,
    out_features: usize,
}

impl Dense {
    /// Glorot-uniform weights, zero bias.
    pub fn new<R: Rng + ?Sized>(in_features: usize, out_features: usize, rng: &mut R) -> DcnnResult<Self> {
        if in_features == 0 || out_features == 0 {
            return Err(DcnnError::InvalidConfig(format!(
                "dense layer needs non-empty dimensions (got {in_features} -> {out_features})"
            )));
        }
        let limit = math::glorot_limit(in_features, out_features);
        let weights = Array2::from_shape_simple_fn((in_features, out_features), || {
            rng.random_range(-limit..=limit)
        });
        Ok(Self {
            weights,
            bias: Array1::zeros(out_features),
            in_features,
            out_features,
        })
    }

    pub fn from_weights(weights: Array2<f32>, bias: Array1<f32>) -> DcnnResult<Self> {
        let (in_features, out_features) = weights.dim();
        if bias.len() != out_features {
            return Err(DcnnError::DimensionMismatch { expected: out_features, actual: bias.len() });
        }
        Ok(Self { weights, bias, in_features, out_features })
    }

    pub fn weights(&self) -> &Array2<f32> { &self.weights }
    pub fn bias(&self) -> &Array1<f32> { &self.bias }
    pub fn in_features(&self) -> usize { self.in_features }
    pub fn out_features(&self) -> usize { self.out_features }

    pub fn load_weights(&mut self, weights: Array2<f32>, bias: Array1<f32>) -> DcnnResult<()> {
        if weights.dim() != (self.in_features, self.out_features) {
            return Err(DcnnError::DimensionMismatch {
                expected: self.in_features * self.out_features,
                actual: weights.len(),
            });
        }
        if bias.len() != self.out_features {
            return Err(DcnnError::DimensionMismatch { expected: self.out_features, actual: bias.len() });
        }
        self.weights = weights;
        self.bias = bias;
        Ok(())
    }

    fn check_input(&self, input: &SequenceTensor) -> DcnnResult<()> {
        let features = input.positions() * input.channels();
        if features != self.in_features {
            return Err(DcnnError::ShapeMismatch { expected: self.in_features, actual: features });
        }
        Ok(())
    }
}

impl Layer for Dense {
    fn name(&self) -> &'static str { "Dense" }

    fn output_shape(&self, input_shape: &Shape) -> DcnnResult<Shape> {
        if input_shape.total() != self.in_features {
            return Err(DcnnError::ShapeMismatch {
                expected: self.in_features,
                actual: input_shape.total(),
            });
        }
        Ok(Shape::d1(self.out_features))
    }

    fn forward(&self, input: &SequenceTensor) -> DcnnResult<SequenceTensor> {
        self.check_input(input)?;
        let mut out = input.to_matrix()?.dot(&self.weights);
        out += &self.bias;
        Ok(SequenceTensor::from_matrix(out))
    }

    fn backward(
        &mut self,
        input: &SequenceTensor,
        _output: &SequenceTensor,
        output_grad: &SequenceTensor,
        learning_rate: f32,
    ) -> DcnnResult<SequenceTensor> {
        self.check_input(input)?;
        let x = input.to_matrix()?;
        let g = output_grad.to_matrix()?;
        if g.dim() != (x.nrows(), self.out_features) {
            return Err(DcnnError::DimensionMismatch {
                expected: x.nrows() * self.out_features,
                actual: g.len(),
            });
        }
        let input_grad = g.dot(&self.weights.t());
        let weight_grad = x.t().dot(&g);
        let bias_grad = g.sum_axis(ndarray::Axis(0));
        self.weights.scaled_add(-learning_rate, &weight_grad);
        self.bias.scaled_add(-learning_rate, &bias_grad);
        SequenceTensor::from_matrix(input_grad).reshape(input.positions(), input.channels())
    }

    fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        vec![self.weights.view().into_dyn(), self.bias.view().into_dyn()]
    }
}
