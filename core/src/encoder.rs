//! Feature-map fan-out/fuse.
//!
//! `M` independently parameterised branches read the same embedded sentence;
//! their flattened outputs are concatenated in branch order into one fused
//! vector per example.

use log::{debug, trace};
use ndarray::{concatenate, s, Array2, ArrayView2, Axis};
use rand::Rng;

use crate::branch::{self, StageLengths, StageSpec};
use crate::config::DcnnConfig;
use crate::error::{DcnnError, DcnnResult};
use crate::layers::Shape;
use crate::model::{ForwardTrace, SequentialModel};
use crate::tensor::SequenceTensor;

/// The DCNN feature extractor: `(B, max_len, embedding_dim)` → `(B, output_dim)`.
pub struct FeatureMapEncoder {
    branches: Vec<SequentialModel>,
    input_shape: Shape,
    branch_dims: Vec<usize>,
    stage_lengths: Vec<StageLengths>,
}

/// Per-branch traces plus the fused output, kept for `backward`.
pub struct EncoderTrace {
    pub branches: Vec<ForwardTrace>,
    pub fused: Array2<f32>,
}

impl FeatureMapEncoder {
    /// Build `config.num_feature_maps` branches from one configuration.
    ///
    /// Branches draw their parameters from `rng` one after another, so no two
    /// share initial values.
    pub fn from_config<R: Rng + ?Sized>(config: &DcnnConfig, rng: &mut R) -> DcnnResult<Self> {
        config.validate()?;
        let stages = config.stage_specs();
        let input_shape = Shape::d2(config.max_len, config.embedding_dim);
        let branches = (0..config.num_feature_maps)
            .map(|_| {
                branch::build_branch(&stages, input_shape, config.activation, config.tie_break, &mut *rng)
            })
            .collect::<DcnnResult<Vec<_>>>()?;
        let encoder = Self::new(branches)?;
        debug!(
            "encoder ready: {} branch(es), stage lengths {:?}, fused width {}",
            encoder.num_branches(),
            encoder
                .stage_lengths
                .iter()
                .map(|l| (l.convolved, l.pooled))
                .collect::<Vec<_>>(),
            encoder.output_dim()
        );
        Ok(encoder)
    }

    /// Assemble an encoder from pre-built branches.
    ///
    /// Every branch must have the same layer shapes as the first one and end
    /// in a flattened output; the stage schedule is read off the branches.
    pub fn new(branches: Vec<SequentialModel>) -> DcnnResult<Self> {
        let first = branches
            .first()
            .ok_or_else(|| DcnnError::InvalidConfig("num_feature_maps must be >= 1".into()))?;
        let input_shape = first.input_shape();
        let mut branch_dims = Vec::with_capacity(branches.len());
        for (idx, branch) in branches.iter().enumerate() {
            let shape = branch.input_shape();
            if shape.positions() != input_shape.positions() {
                return Err(DcnnError::InvalidInputLength {
                    expected: input_shape.positions(),
                    actual: shape.positions(),
                });
            }
            if shape.channels() != input_shape.channels() {
                return Err(DcnnError::ShapeMismatch {
                    expected: input_shape.channels(),
                    actual: shape.channels(),
                });
            }
            if branch.shapes() != first.shapes() {
                return Err(DcnnError::InvalidConfig(format!(
                    "branch {idx} layer shapes differ from branch 0"
                )));
            }
            let out = branch.output_shape();
            if !out.is_flat() {
                return Err(DcnnError::DimensionMismatch { expected: 1, actual: out.ndim });
            }
            branch_dims.push(out.total());
        }
        let stage_lengths = branch::branch_stage_lengths(first);
        if stage_lengths.is_empty() {
            return Err(DcnnError::InvalidConfig(
                "branch has no convolution/pooling stage".into(),
            ));
        }
        Ok(Self { branches, input_shape, branch_dims, stage_lengths })
    }

    /// Run every branch and concatenate in branch order.
    pub fn forward(&self, input: &SequenceTensor) -> DcnnResult<Array2<f32>> {
        let outputs = self
            .branches
            .iter()
            .map(|b| b.forward(input)?.to_matrix())
            .collect::<DcnnResult<Vec<_>>>()?;
        fuse(&outputs)
    }

    /// Forward pass keeping every branch's intermediates.
    pub fn forward_traced(&self, input: &SequenceTensor) -> DcnnResult<EncoderTrace> {
        let traces = self
            .branches
            .iter()
            .map(|b| b.forward_traced(input))
            .collect::<DcnnResult<Vec<_>>>()?;
        let outputs = traces
            .iter()
            .map(|t| {
                t.output()
                    .ok_or(DcnnError::DimensionMismatch { expected: 1, actual: 0 })?
                    .to_matrix()
            })
            .collect::<DcnnResult<Vec<_>>>()?;
        let fused = fuse(&outputs)?;
        trace!("fused {:?}", fused.dim());
        Ok(EncoderTrace { branches: traces, fused })
    }

    /// Split the fused gradient by branch width, send each slice back through
    /// its own branch and return the summed gradient w.r.t. `input`.
    pub fn backward(
        &mut self,
        input: &SequenceTensor,
        trace: &EncoderTrace,
        fused_grad: &Array2<f32>,
        learning_rate: f32,
    ) -> DcnnResult<SequenceTensor> {
        if fused_grad.dim() != (input.batch(), self.output_dim()) {
            return Err(DcnnError::DimensionMismatch {
                expected: input.batch() * self.output_dim(),
                actual: fused_grad.len(),
            });
        }
        if trace.branches.len() != self.branches.len() {
            return Err(DcnnError::DimensionMismatch {
                expected: self.branches.len(),
                actual: trace.branches.len(),
            });
        }
        let mut input_grad = SequenceTensor::zeros(input.batch(), input.positions(), input.channels());
        let mut offset = 0;
        for (idx, ((branch, branch_trace), &width)) in self
            .branches
            .iter_mut()
            .zip(trace.branches.iter())
            .zip(self.branch_dims.iter())
            .enumerate()
        {
            let slice = fused_grad.slice(s![.., offset..offset + width]).to_owned();
            let grad = branch.backward(
                input,
                branch_trace,
                &SequenceTensor::from_matrix(slice),
                learning_rate,
            )?;
            *input_grad.array_mut() += grad.array();
            trace!("branch {idx}: gradient slice {offset}..{}", offset + width);
            offset += width;
        }
        Ok(input_grad)
    }

    /// Width of the fused vector.
    pub fn output_dim(&self) -> usize {
        self.branch_dims.iter().sum()
    }

    /// Flattened width of each branch, in branch order.
    pub fn branch_output_dims(&self) -> &[usize] {
        &self.branch_dims
    }

    pub fn num_branches(&self) -> usize {
        self.branches.len()
    }

    pub fn branch(&self, idx: usize) -> Option<&SequentialModel> {
        self.branches.get(idx)
    }

    pub fn branch_mut(&mut self, idx: usize) -> Option<&mut SequentialModel> {
        self.branches.get_mut(idx)
    }

    pub fn input_shape(&self) -> Shape {
        self.input_shape
    }

    /// Conv/pool length schedule shared by every branch.
    pub fn stage_lengths(&self) -> &[StageLengths] {
        &self.stage_lengths
    }

    pub fn parameter_count(&self) -> usize {
        self.branches.iter().map(SequentialModel::parameter_count).sum()
    }
}

fn fuse(outputs: &[Array2<f32>]) -> DcnnResult<Array2<f32>> {
    let views: Vec<ArrayView2<'_, f32>> = outputs.iter().map(|o| o.view()).collect();
    concatenate(Axis(1), &views).map_err(|_| DcnnError::DimensionMismatch {
        expected: outputs.first().map_or(0, |o| o.nrows()),
        actual: outputs.iter().map(|o| o.nrows()).max().unwrap_or(0),
    })
}

/// Stage specs → fused width, without building anything.
pub fn fused_output_dim(num_feature_maps: usize, embedding_dim: usize, stages: &[StageSpec]) -> usize {
    num_feature_maps * branch::branch_output_dim(embedding_dim, stages)
}
