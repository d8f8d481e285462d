//! Stage composer: turns an ordered list of stage specs into one feature-map
//! branch.
//!
//! ```text
//! (B, L, C) → [WideConv1D → activation → KMaxPool1D] × S → Flatten → (B, 1, k_S · C_S)
//! ```
//!
//! The length entering stage `i + 1` is exactly the `k` of stage `i`, so every
//! length in the pipeline is fixed by the configuration and `max_len`.

use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{DcnnError, DcnnResult};
use crate::layers::{Activation, FlattenLayer, KMaxPool1D, Layer, Shape, WideConv1D};
use crate::math::{self, TieBreak};
use crate::model::SequentialModel;

/// One (wide convolution → k-max pooling) unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    pub kernel_width: usize,
    pub out_channels: usize,
    pub pooling_k: usize,
}

impl StageSpec {
    pub const fn new(kernel_width: usize, out_channels: usize, pooling_k: usize) -> Self {
        Self { kernel_width, out_channels, pooling_k }
    }
}

/// How the pooling `k` of each stage is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolingSchedule {
    /// Use the configured `k` of every stage as is.
    #[default]
    Fixed,
    /// Length-adaptive: `k_l = max(k_top, ceil((S - l) / S · max_len))`,
    /// last stage pinned to `k_top`.
    Dynamic { k_top: usize },
}

impl PoolingSchedule {
    /// Concrete `k` per stage for sentences padded to `max_len`.
    pub fn resolve(&self, configured: &[usize], max_len: usize) -> Vec<usize> {
        match *self {
            PoolingSchedule::Fixed => configured.to_vec(),
            PoolingSchedule::Dynamic { k_top } => {
                let total = configured.len();
                (1..=total)
                    .map(|stage| math::dynamic_k(k_top, stage, total, max_len))
                    .collect()
            }
        }
    }
}

/// Sequence lengths around one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageLengths {
    /// Entering the convolution.
    pub input: usize,
    /// After the wide convolution: `input + width - 1`.
    pub convolved: usize,
    /// After pooling: the stage's `k`.
    pub pooled: usize,
}

/// Statically compute the length schedule, rejecting any stage whose `k`
/// exceeds the length reaching it.
pub fn plan_stages(max_len: usize, stages: &[StageSpec]) -> DcnnResult<Vec<StageLengths>> {
    if max_len == 0 {
        return Err(DcnnError::InvalidConfig("max_len must be >= 1".into()));
    }
    let mut len = max_len;
    let mut plan = Vec::with_capacity(stages.len());
    for (idx, stage) in stages.iter().enumerate() {
        if stage.kernel_width == 0 {
            return Err(DcnnError::InvalidConfig(format!("stage {idx}: kernel width must be >= 1")));
        }
        if stage.pooling_k == 0 {
            return Err(DcnnError::InvalidConfig(format!("stage {idx}: pooling k must be >= 1")));
        }
        let convolved = math::wide_conv_output_len(len, stage.kernel_width);
        if stage.pooling_k > convolved {
            return Err(DcnnError::PoolingExceedsLength {
                stage: idx,
                k: stage.pooling_k,
                available: convolved,
            });
        }
        plan.push(StageLengths { input: len, convolved, pooled: stage.pooling_k });
        len = stage.pooling_k;
    }
    Ok(plan)
}

/// Recover the conv/pool length schedule of a built branch from its layer
/// shapes. Layers between a convolution and its pooling must keep the length.
pub fn branch_stage_lengths(branch: &SequentialModel) -> Vec<StageLengths> {
    let shapes = branch.shapes();
    let mut plan = Vec::new();
    let mut convolved: Option<(usize, usize)> = None;
    for (idx, shape) in shapes.iter().enumerate() {
        let before = if idx == 0 { branch.input_shape() } else { shapes[idx - 1] };
        match branch.layer(idx).map(|l| l.name()) {
            Some(WideConv1D::NAME) => convolved = Some((before.positions(), shape.positions())),
            Some(KMaxPool1D::NAME) => {
                if let Some((input, conv_len)) = convolved.take() {
                    plan.push(StageLengths { input, convolved: conv_len, pooled: shape.positions() });
                }
            }
            _ => {}
        }
    }
    plan
}

/// Flattened width of a branch built from `stages` on `embedding_dim` input.
pub fn branch_output_dim(embedding_dim: usize, stages: &[StageSpec]) -> usize {
    match stages.last() {
        Some(last) => last.pooling_k * last.out_channels,
        None => embedding_dim,
    }
}

/// Build one feature-map branch with freshly initialized parameters.
///
/// Shape problems (channel mismatch, `k` too large) are reported here.
pub fn build_branch<R: Rng + ?Sized>(
    stages: &[StageSpec],
    input_shape: Shape,
    activation: Activation,
    tie_break: TieBreak,
    rng: &mut R,
) -> DcnnResult<SequentialModel> {
    if input_shape.is_flat() {
        return Err(DcnnError::DimensionMismatch { expected: 2, actual: input_shape.ndim });
    }
    plan_stages(input_shape.positions(), stages)?;

    let mut layers: Vec<Box<dyn Layer>> = Vec::with_capacity(stages.len() * 3 + 1);
    let mut in_ch = input_shape.channels();
    for (idx, stage) in stages.iter().enumerate() {
        layers.push(Box::new(WideConv1D::new(stage.kernel_width, in_ch, stage.out_channels, rng)?));
        layers.push(activation.layer());
        layers.push(Box::new(
            KMaxPool1D::with_tie_break(stage.pooling_k, tie_break)?.at_stage(idx),
        ));
        in_ch = stage.out_channels;
    }
    layers.push(Box::new(FlattenLayer));

    debug!("building branch: {} stage(s), input {:?}", stages.len(), input_shape.dims);
    SequentialModel::new(layers, input_shape)
}
