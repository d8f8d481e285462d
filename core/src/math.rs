//! Pure numeric kernels: wide 1-D convolution, order-preserving k-max
//! selection, activations and the binary cross-entropy used by the head.
//!
//! Layers in `crate::layers` are thin wrappers around these functions; every
//! function here is stateless and shape-checked.
//!
//! Convolution follows the im2col + matmul pattern: each output position's
//! receptive field is unrolled into one row of a `(T, w * C_in)` matrix, and
//! a single `dot` against the `(w * C_in, C_out)` kernel matrix produces the
//! whole output sequence for one example.

use std::cmp::Ordering;

use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{DcnnError, DcnnResult};

/// Probability clamp for the log terms of binary cross-entropy.
pub const BCE_EPSILON: f32 = 1e-7;

// =============================================================================
// Wide Convolution
// =============================================================================

/// Output length of a wide convolution: `len + width - 1`, or 0 when both
/// are 0.
#[inline]
pub fn wide_conv_output_len(len: usize, width: usize) -> usize {
    (len + width).saturating_sub(1)
}

/// Zero-pad every example with `width - 1` positions on both ends.
///
/// A valid convolution over the result visits every alignment of the kernel
/// that overlaps at least one real position, exactly once.
pub fn wide_pad(input: ArrayView3<'_, f32>, width: usize) -> Array3<f32> {
    let (batch, len, channels) = input.dim();
    let pad = width.saturating_sub(1);
    let mut padded = Array3::zeros((batch, len + 2 * pad, channels));
    padded.slice_mut(s![.., pad..pad + len, ..]).assign(&input);
    padded
}

/// Rearrange a `(width, in_ch, out_ch)` kernel into `(width * in_ch, out_ch)`.
fn kernel_matrix(kernel: ArrayView3<'_, f32>) -> Array2<f32> {
    let (width, in_ch, out_ch) = kernel.dim();
    Array2::from_shape_fn((width * in_ch, out_ch), |(f, o)| {
        kernel[[f / in_ch, f % in_ch, o]]
    })
}

/// Unroll one padded example `(padded_len, ch)` into `(out_len, width * ch)`.
fn im2col(padded: ArrayView2<'_, f32>, width: usize, out_len: usize) -> Array2<f32> {
    let channels = padded.ncols();
    Array2::from_shape_fn((out_len, width * channels), |(t, f)| {
        padded[[t + f / channels, f % channels]]
    })
}

fn check_conv_shapes(
    input: &ArrayView3<'_, f32>,
    kernel: &ArrayView3<'_, f32>,
    bias_len: usize,
) -> DcnnResult<()> {
    let (_, len, in_ch) = input.dim();
    let (width, k_in, out_ch) = kernel.dim();
    if width == 0 {
        return Err(DcnnError::InvalidConfig("kernel width must be >= 1".into()));
    }
    if len == 0 {
        return Err(DcnnError::InvalidInputLength { expected: 1, actual: 0 });
    }
    if in_ch != k_in {
        return Err(DcnnError::ShapeMismatch {
            expected: k_in,
            actual: in_ch,
        });
    }
    if bias_len != out_ch {
        return Err(DcnnError::DimensionMismatch {
            expected: out_ch,
            actual: bias_len,
        });
    }
    Ok(())
}

/// Wide 1-D convolution (no activation).
///
/// Input:  `(batch, L, in_ch)`
/// Kernel: `(width, in_ch, out_ch)`
/// Bias:   `(out_ch)`
/// Output: `(batch, L + width - 1, out_ch)`
///
/// `out[b, t, o] = bias[o] + Σ_j Σ_c kernel[j, c, o] · padded[b, t + j, c]`
pub fn wide_conv1d(
    input: ArrayView3<'_, f32>,
    kernel: ArrayView3<'_, f32>,
    bias: ArrayView1<'_, f32>,
) -> DcnnResult<Array3<f32>> {
    check_conv_shapes(&input, &kernel, bias.len())?;
    let (batch, len, _) = input.dim();
    let (width, _, out_ch) = kernel.dim();
    let out_len = wide_conv_output_len(len, width);

    let padded = wide_pad(input, width);
    let weights = kernel_matrix(kernel);
    let mut output = Array3::zeros((batch, out_len, out_ch));

    for (b, mut out_b) in output.axis_iter_mut(Axis(0)).enumerate() {
        let cols = im2col(padded.index_axis(Axis(0), b), width, out_len);
        let mut result = cols.dot(&weights);
        result += &bias;
        out_b.assign(&result);
    }
    Ok(output)
}

/// Gradients of a wide convolution.
pub struct WideConvGrads {
    /// `(batch, L, in_ch)`
    pub input: Array3<f32>,
    /// `(width, in_ch, out_ch)`
    pub kernel: Array3<f32>,
    /// `(out_ch)`
    pub bias: Array1<f32>,
}

/// Backward pass of [`wide_conv1d`] given the gradient w.r.t. its output.
pub fn wide_conv1d_backward(
    input: ArrayView3<'_, f32>,
    kernel: ArrayView3<'_, f32>,
    output_grad: ArrayView3<'_, f32>,
) -> DcnnResult<WideConvGrads> {
    let (width, in_ch, out_ch) = kernel.dim();
    check_conv_shapes(&input, &kernel, out_ch)?;
    let (batch, len, _) = input.dim();
    let out_len = wide_conv_output_len(len, width);
    if output_grad.dim() != (batch, out_len, out_ch) {
        return Err(DcnnError::DimensionMismatch {
            expected: batch * out_len * out_ch,
            actual: output_grad.len(),
        });
    }

    let pad = width - 1;
    let padded = wide_pad(input, width);
    let weights = kernel_matrix(kernel);

    let mut kernel_grad = Array2::<f32>::zeros((width * in_ch, out_ch));
    let mut input_grad = Array3::<f32>::zeros((batch, len, in_ch));

    for b in 0..batch {
        let grad_b = output_grad.index_axis(Axis(0), b);
        let cols = im2col(padded.index_axis(Axis(0), b), width, out_len);
        kernel_grad += &cols.t().dot(&grad_b);

        // col2im: scatter column gradients back onto the unpadded positions.
        let col_grad = grad_b.dot(&weights.t());
        let mut in_b = input_grad.index_axis_mut(Axis(0), b);
        for t in 0..out_len {
            for j in 0..width {
                let padded_pos = t + j;
                if padded_pos < pad || padded_pos >= pad + len {
                    continue;
                }
                let pos = padded_pos - pad;
                for c in 0..in_ch {
                    in_b[[pos, c]] += col_grad[[t, j * in_ch + c]];
                }
            }
        }
    }

    let kernel = Array3::from_shape_fn((width, in_ch, out_ch), |(j, c, o)| {
        kernel_grad[[j * in_ch + c, o]]
    });
    let bias = output_grad.sum_axis(Axis(0)).sum_axis(Axis(0));

    Ok(WideConvGrads {
        input: input_grad,
        kernel,
        bias,
    })
}

// =============================================================================
// k-Max Selection
// =============================================================================

/// How equal activations are ranked during k-max selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Among equal values, the earlier position wins.
    #[default]
    LowestIndex,
    /// Among equal values, the later position wins.
    HighestIndex,
}

/// Rank `a` before `b` when it should be selected first.
///
/// Larger values first; NaN ranks below every number; ties resolved by
/// position according to `tie_break`.
fn rank(values: &[f32], a: usize, b: usize, tie_break: TieBreak) -> Ordering {
    let (va, vb) = (values[a], values[b]);
    let by_value = match (va.is_nan(), vb.is_nan()) {
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (true, true) => Ordering::Equal,
        (false, false) => vb.partial_cmp(&va).unwrap_or(Ordering::Equal),
    };
    by_value.then_with(|| match tie_break {
        TieBreak::LowestIndex => a.cmp(&b),
        TieBreak::HighestIndex => b.cmp(&a),
    })
}

/// Positions of the `k` largest values, in ascending position order.
pub fn k_max_indices(values: &[f32], k: usize, tie_break: TieBreak) -> DcnnResult<Vec<usize>> {
    if k == 0 {
        return Err(DcnnError::InvalidConfig("pooling k must be >= 1".into()));
    }
    if k > values.len() {
        return Err(DcnnError::PoolingExceedsLength {
            stage: 0,
            k,
            available: values.len(),
        });
    }
    let mut order: Vec<usize> = (0..values.len()).collect();
    if k < order.len() {
        order.select_nth_unstable_by(k - 1, |&a, &b| rank(values, a, b, tie_break));
    }
    order.truncate(k);
    order.sort_unstable();
    Ok(order)
}

/// Selected positions for every `(batch, channel)` slice: `(batch, k, channels)`.
///
/// `indices[b, i, c]` is the original position of the i-th emitted value.
pub fn k_max_pool_indices(
    input: ArrayView3<'_, f32>,
    k: usize,
    tie_break: TieBreak,
) -> DcnnResult<Array3<usize>> {
    let (batch, len, channels) = input.dim();
    if k > len {
        return Err(DcnnError::PoolingExceedsLength {
            stage: 0,
            k,
            available: len,
        });
    }
    let mut indices = Array3::zeros((batch, k, channels));
    let mut column = Vec::with_capacity(len);
    for b in 0..batch {
        for c in 0..channels {
            column.clear();
            column.extend(input.slice(s![b, .., c]).iter().copied());
            let picked = k_max_indices(&column, k, tie_break)?;
            for (i, pos) in picked.into_iter().enumerate() {
                indices[[b, i, c]] = pos;
            }
        }
    }
    Ok(indices)
}

/// Order-preserving k-max pooling: `(batch, L, C)` → `(batch, k, C)`.
pub fn k_max_pool(
    input: ArrayView3<'_, f32>,
    k: usize,
    tie_break: TieBreak,
) -> DcnnResult<Array3<f32>> {
    let indices = k_max_pool_indices(input, k, tie_break)?;
    Ok(gather_positions(input, &indices))
}

/// `out[b, i, c] = input[b, indices[b, i, c], c]`.
pub fn gather_positions(input: ArrayView3<'_, f32>, indices: &Array3<usize>) -> Array3<f32> {
    Array3::from_shape_fn(indices.dim(), |(b, i, c)| input[[b, indices[[b, i, c]], c]])
}

/// Inverse of [`gather_positions`] for gradients: zeros everywhere except the
/// selected positions.
pub fn scatter_positions(
    output_grad: ArrayView3<'_, f32>,
    indices: &Array3<usize>,
    len: usize,
) -> DcnnResult<Array3<f32>> {
    if output_grad.dim() != indices.dim() {
        return Err(DcnnError::DimensionMismatch {
            expected: indices.len(),
            actual: output_grad.len(),
        });
    }
    let (batch, _, channels) = indices.dim();
    let mut grad = Array3::zeros((batch, len, channels));
    for ((b, i, c), &pos) in indices.indexed_iter() {
        grad[[b, pos, c]] += output_grad[[b, i, c]];
    }
    Ok(grad)
}

/// Pooling `k` for stage `stage` (1-based) of `total_stages` under the
/// length-adaptive schedule: `max(k_top, ceil((S - l) / S · len))`, with the
/// last stage pinned to `k_top`.
pub fn dynamic_k(k_top: usize, stage: usize, total_stages: usize, sentence_len: usize) -> usize {
    if total_stages == 0 || stage >= total_stages {
        return k_top;
    }
    let remaining = total_stages - stage;
    let scaled = (remaining * sentence_len).div_ceil(total_stages);
    scaled.max(k_top)
}

// =============================================================================
// Activations
// =============================================================================

#[inline]
pub fn relu(x: f32) -> f32 {
    x.max(0.0)
}

#[inline]
pub fn relu_grad(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else {
        0.0
    }
}

/// Numerically stable logistic function.
#[inline]
pub fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Derivative of sigmoid expressed through its output `y = sigmoid(x)`.
#[inline]
pub fn sigmoid_grad_from_output(y: f32) -> f32 {
    y * (1.0 - y)
}

/// Derivative of tanh expressed through its output `y = tanh(x)`.
#[inline]
pub fn tanh_grad_from_output(y: f32) -> f32 {
    1.0 - y * y
}

// =============================================================================
// Loss
// =============================================================================

fn check_labels(probs: &ArrayView1<'_, f32>, labels: &ArrayView1<'_, f32>) -> DcnnResult<()> {
    if probs.is_empty() {
        return Err(DcnnError::EmptyBatch);
    }
    if probs.len() != labels.len() {
        return Err(DcnnError::DimensionMismatch {
            expected: probs.len(),
            actual: labels.len(),
        });
    }
    Ok(())
}

/// Mean binary cross-entropy; probabilities are clamped to
/// `[BCE_EPSILON, 1 - BCE_EPSILON]`.
pub fn binary_cross_entropy(
    probs: ArrayView1<'_, f32>,
    labels: ArrayView1<'_, f32>,
) -> DcnnResult<f32> {
    check_labels(&probs, &labels)?;
    let total: f32 = probs
        .iter()
        .zip(labels.iter())
        .map(|(&p, &y)| {
            let p = p.clamp(BCE_EPSILON, 1.0 - BCE_EPSILON);
            -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
        })
        .sum();
    Ok(total / probs.len() as f32)
}

/// Gradient of mean BCE w.r.t. the pre-sigmoid logits: `(p - y) / n`.
pub fn binary_cross_entropy_logit_grad(
    probs: ArrayView1<'_, f32>,
    labels: ArrayView1<'_, f32>,
) -> DcnnResult<Array1<f32>> {
    check_labels(&probs, &labels)?;
    let n = probs.len() as f32;
    Ok((&probs - &labels).mapv(|g| g / n))
}

// =============================================================================
// Initialization
// =============================================================================

/// Glorot-uniform bound `sqrt(6 / (fan_in + fan_out))`.
#[inline]
pub fn glorot_limit(fan_in: usize, fan_out: usize) -> f32 {
    let fan = (fan_in + fan_out).max(1) as f32;
    (6.0 / fan).sqrt()
}
