//! # dcnn-core: Dynamic Convolutional Neural Network sentence encoder
//!
//! Turns a padded batch of token ids into one fixed-length vector per sentence
//! by alternating wide 1-D convolutions with order-preserving k-max pooling,
//! optionally over several independent feature maps, then scores the fused
//! vector with a dense + sigmoid head.
//!
//! ## Architecture
//!
//! - **Layer Zoo**: `WideConv1D`, `KMaxPool1D`, activations, `Flatten`, `Dense`, `Embedding`
//! - **Stage Composer**: `branch::build_branch` chains (conv → activation → pool) stages
//! - **Fan-out/Fuse**: `FeatureMapEncoder` runs `M` branches and concatenates them
//! - **Static shape checks**: every length and channel count is validated when
//!   the model is built, never on the first batch
//!
//! ## Usage
//!
//! ```no_run
//! use dcnn_core::*;
//!
//! # fn main() -> DcnnResult<()> {
//! let config = DcnnConfig::two_feature_map();
//! let model = SentimentClassifier::new(config)?;
//!
//! let batch = pad_sequences(&[vec![12, 7, 431]], 300, 0, PaddingSide::Pre, PaddingSide::Pre)?;
//! let fused = model.encode(&batch)?;        // (1, 1000)
//! let probs = model.predict_proba(&batch)?; // (1)
//! # let _ = (fused, probs);
//! # Ok(())
//! # }
//! ```

pub mod branch;
pub mod classifier;
pub mod config;
pub mod data;
pub mod encoder;
pub mod error;
pub mod layers;
pub mod math;
pub mod model;
pub mod tensor;

// Re-export primary types
pub use branch::{branch_stage_lengths, build_branch, plan_stages, PoolingSchedule, StageLengths, StageSpec};
pub use classifier::SentimentClassifier;
pub use config::DcnnConfig;
pub use data::{pad_sequences, PaddingSide};
pub use encoder::{EncoderTrace, FeatureMapEncoder};
pub use error::{DcnnError, DcnnResult};
pub use layers::{Layer, Shape};
pub use layers::{
    Activation, IdentityLayer, ReLULayer, SigmoidLayer, TanhLayer,
    Dense, Embedding, FlattenLayer, KMaxPool1D, WideConv1D,
};
pub use math::{
    binary_cross_entropy, dynamic_k, k_max_indices, k_max_pool, k_max_pool_indices,
    sigmoid, wide_conv1d, wide_conv_output_len, TieBreak,
};
pub use model::{ForwardTrace, SequentialModel};
pub use tensor::SequenceTensor;
