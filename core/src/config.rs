//! Model configuration.
//!
//! One parameterised description covers every architecture variant; the
//! presets [`DcnnConfig::basic`], [`DcnnConfig::two_stage`] and
//! [`DcnnConfig::two_feature_map`] reproduce the reference set-ups.
//!
//! ```toml
//! vocab_size = 5000
//! embedding_dim = 50
//! max_len = 300
//! num_feature_maps = 2
//! stage_kernel_widths = [20, 30]
//! stage_output_channels = [50, 50]
//! stage_pooling_k = [20, 10]
//! activation = "relu"
//! ```

use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::branch::{self, PoolingSchedule, StageSpec};
use crate::error::{DcnnError, DcnnResult};
use crate::layers::Activation;
use crate::math::TieBreak;

/// Full model description: embedding, stage pipeline, fan-out and training
/// step size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcnnConfig {
    /// Rows in the embedding table.
    pub vocab_size: usize,
    /// Channels entering the first stage.
    pub embedding_dim: usize,
    /// Length every input batch is padded/truncated to.
    pub max_len: usize,
    /// Number of parallel feature-map branches (`M`).
    #[serde(default = "default_num_feature_maps")]
    pub num_feature_maps: usize,
    pub stage_kernel_widths: Vec<usize>,
    pub stage_output_channels: Vec<usize>,
    /// Ignored under a dynamic pooling schedule except for its length.
    pub stage_pooling_k: Vec<usize>,
    #[serde(default)]
    pub activation: Activation,
    #[serde(default)]
    pub pooling_schedule: PoolingSchedule,
    #[serde(default)]
    pub tie_break: TieBreak,
    /// Seed for parameter initialization.
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,
    /// Whether `train_step` also updates the embedding table.
    #[serde(default = "default_train_embedding")]
    pub train_embedding: bool,
}

fn default_num_feature_maps() -> usize {
    1
}

fn default_seed() -> u64 {
    42
}

fn default_learning_rate() -> f32 {
    0.01
}

fn default_train_embedding() -> bool {
    true
}

impl Default for DcnnConfig {
    fn default() -> Self {
        Self::basic()
    }
}

impl DcnnConfig {
    const REFERENCE_VOCAB: usize = 5000;
    const REFERENCE_EMBEDDING_DIM: usize = 50;
    const REFERENCE_MAX_LEN: usize = 300;

    /// One stage: width 30, k = 5, single branch.
    pub fn basic() -> Self {
        Self {
            vocab_size: Self::REFERENCE_VOCAB,
            embedding_dim: Self::REFERENCE_EMBEDDING_DIM,
            max_len: Self::REFERENCE_MAX_LEN,
            num_feature_maps: 1,
            stage_kernel_widths: vec![30],
            stage_output_channels: vec![Self::REFERENCE_EMBEDDING_DIM],
            stage_pooling_k: vec![5],
            activation: Activation::Relu,
            pooling_schedule: PoolingSchedule::Fixed,
            tie_break: TieBreak::LowestIndex,
            seed: default_seed(),
            learning_rate: default_learning_rate(),
            train_embedding: true,
        }
    }

    /// Two stages: widths [20, 30], k [20, 10], single branch.
    pub fn two_stage() -> Self {
        Self {
            stage_kernel_widths: vec![20, 30],
            stage_output_channels: vec![Self::REFERENCE_EMBEDDING_DIM; 2],
            stage_pooling_k: vec![20, 10],
            ..Self::basic()
        }
    }

    /// The two-stage pipeline on two independent feature maps.
    pub fn two_feature_map() -> Self {
        Self {
            num_feature_maps: 2,
            ..Self::two_stage()
        }
    }

    pub fn from_toml_str(text: &str) -> DcnnResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> DcnnResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        info!(
            "loaded config from {}: {} stage(s), {} feature map(s)",
            path.display(),
            config.num_stages(),
            config.num_feature_maps
        );
        Ok(config)
    }

    pub fn num_stages(&self) -> usize {
        self.stage_kernel_widths.len()
    }

    /// Per-stage specs with the pooling schedule applied.
    pub fn stage_specs(&self) -> Vec<StageSpec> {
        let ks = self.pooling_schedule.resolve(&self.stage_pooling_k, self.max_len);
        self.stage_kernel_widths
            .iter()
            .zip(self.stage_output_channels.iter())
            .zip(ks)
            .map(|((&w, &c), k)| StageSpec::new(w, c, k))
            .collect()
    }

    /// Width of the fused vector this configuration produces.
    pub fn fused_dim(&self) -> usize {
        crate::encoder::fused_output_dim(self.num_feature_maps, self.embedding_dim, &self.stage_specs())
    }

    /// Reject malformed configurations, including any pooling `k` larger than
    /// the sequence length that reaches it.
    pub fn validate(&self) -> DcnnResult<()> {
        let invalid = |msg: String| Err(DcnnError::InvalidConfig(msg));
        if self.vocab_size == 0 {
            return invalid("vocab_size must be >= 1".into());
        }
        if self.embedding_dim == 0 {
            return invalid("embedding_dim must be >= 1".into());
        }
        if self.max_len == 0 {
            return invalid("max_len must be >= 1".into());
        }
        if self.num_feature_maps == 0 {
            return invalid("num_feature_maps must be >= 1".into());
        }
        let stages = self.stage_kernel_widths.len();
        if stages == 0 {
            return invalid("at least one stage is required".into());
        }
        if self.stage_output_channels.len() != stages || self.stage_pooling_k.len() != stages {
            return invalid(format!(
                "stage lists disagree: {} widths, {} channel counts, {} pooling k values",
                stages,
                self.stage_output_channels.len(),
                self.stage_pooling_k.len()
            ));
        }
        if let Some(idx) = self.stage_output_channels.iter().position(|&c| c == 0) {
            return invalid(format!("stage {idx}: output channels must be >= 1"));
        }
        if let PoolingSchedule::Dynamic { k_top: 0 } = self.pooling_schedule {
            return invalid("dynamic pooling k_top must be >= 1".into());
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return invalid(format!("learning_rate must be positive, got {}", self.learning_rate));
        }
        branch::plan_stages(self.max_len, &self.stage_specs())?;
        Ok(())
    }
}
