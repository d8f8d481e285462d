//! SequentialModel: chain layers into a pipeline.
//!
//! ```text
//! Input → Layer[0] → Layer[1] → ... → Layer[N-1] → Output
//! ```
//!
//! Each layer declares its output shape, so the whole chain is validated at
//! construction time, before any data flows through. A pooling `k` that is
//! larger than the length reaching it, or a channel disagreement between two
//! layers, is rejected here rather than on the first batch.

use log::{debug, trace};
use ndarray::ArrayViewD;

use crate::error::{DcnnError, DcnnResult};
use crate::layers::{Layer, Shape};
use crate::tensor::SequenceTensor;

/// A sequential model: layers executed in order, output feeds into next.
pub struct SequentialModel {
    layers: Vec<Box<dyn Layer>>,
    input_shape: Shape,
    /// Output shape of every layer, computed once at construction.
    shapes: Vec<Shape>,
}

/// Intermediate outputs of one forward pass, kept for `backward`.
///
/// `outputs[i]` is what layer `i` produced.
pub struct ForwardTrace {
    pub outputs: Vec<SequenceTensor>,
}

impl ForwardTrace {
    /// Final output of the pass, if the model has any layers.
    pub fn output(&self) -> Option<&SequenceTensor> {
        self.outputs.last()
    }
}

impl SequentialModel {
    /// Create a new sequential model and validate the layer chain.
    pub fn new(layers: Vec<Box<dyn Layer>>, input_shape: Shape) -> DcnnResult<Self> {
        let mut shape = input_shape;
        let mut shapes = Vec::with_capacity(layers.len());
        for layer in layers.iter() {
            shape = layer.output_shape(&shape)?;
            debug!("  {:<12} -> {:?}", layer.name(), &shape.dims[..shape.ndim]);
            shapes.push(shape);
        }
        Ok(Self { layers, input_shape, shapes })
    }

    fn check_input(&self, input: &SequenceTensor) -> DcnnResult<()> {
        if input.batch() == 0 {
            return Err(DcnnError::EmptyBatch);
        }
        if input.positions() != self.input_shape.positions() {
            return Err(DcnnError::InvalidInputLength {
                expected: self.input_shape.positions(),
                actual: input.positions(),
            });
        }
        if input.channels() != self.input_shape.channels() {
            return Err(DcnnError::ShapeMismatch {
                expected: self.input_shape.channels(),
                actual: input.channels(),
            });
        }
        Ok(())
    }

    /// Run forward pass through all layers.
    pub fn forward(&self, input: &SequenceTensor) -> DcnnResult<SequenceTensor> {
        self.check_input(input)?;
        let mut current = input.clone();
        for layer in self.layers.iter() {
            current = layer.forward(&current)?;
        }
        Ok(current)
    }

    /// Forward pass that keeps every intermediate output.
    pub fn forward_traced(&self, input: &SequenceTensor) -> DcnnResult<ForwardTrace> {
        self.check_input(input)?;
        let mut outputs: Vec<SequenceTensor> = Vec::with_capacity(self.layers.len());
        for layer in self.layers.iter() {
            let next = match outputs.last() {
                Some(prev) => layer.forward(prev)?,
                None => layer.forward(input)?,
            };
            trace!("{} -> {:?}", layer.name(), next.dim());
            outputs.push(next);
        }
        Ok(ForwardTrace { outputs })
    }

    /// Backpropagate `output_grad` through the chain, updating every layer's
    /// parameters in place. Returns the gradient w.r.t. `input`.
    pub fn backward(
        &mut self,
        input: &SequenceTensor,
        trace: &ForwardTrace,
        output_grad: &SequenceTensor,
        learning_rate: f32,
    ) -> DcnnResult<SequenceTensor> {
        if trace.outputs.len() != self.layers.len() {
            return Err(DcnnError::DimensionMismatch {
                expected: self.layers.len(),
                actual: trace.outputs.len(),
            });
        }
        let mut grad = output_grad.clone();
        for idx in (0..self.layers.len()).rev() {
            let layer_input = if idx == 0 { input } else { &trace.outputs[idx - 1] };
            grad = self.layers[idx].backward(layer_input, &trace.outputs[idx], &grad, learning_rate)?;
            trace!("{} <- {:?}", self.layers[idx].name(), grad.dim());
        }
        Ok(grad)
    }

    /// Expected output shape (computed from layer chain).
    pub fn output_shape(&self) -> Shape {
        self.shapes.last().copied().unwrap_or(self.input_shape)
    }

    pub fn input_shape(&self) -> Shape {
        self.input_shape
    }

    /// Output shape of every layer, in order.
    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layer(&self, idx: usize) -> Option<&dyn Layer> {
        self.layers.get(idx).map(|l| l.as_ref())
    }

    /// Views of every learned tensor, layer by layer.
    pub fn parameters(&self) -> Vec<ArrayViewD<'_, f32>> {
        self.layers.iter().flat_map(|l| l.parameters()).collect()
    }

    /// Total learned scalars across all layers.
    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(|l| l.parameter_count()).sum()
    }
}
