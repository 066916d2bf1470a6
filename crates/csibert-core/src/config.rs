//! Experiment configuration.
//!
//! Every section has a `Default` matching the reference CSI-BERT setup, so a
//! config file only needs to name the values it overrides. Environment
//! variables use the `CSIBERT` prefix and `__` as the section separator, e.g.
//! `CSIBERT_MODEL__FEATURE_DIM=128`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Complete experiment configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Tokenizer/normalizer settings
    pub tokenizer: TokenizerConfig,

    /// Padding and mask settings
    pub collate: CollateConfig,

    /// Model architecture
    pub model: CsiBertConfig,

    /// Device to place tensors on
    pub device: DeviceType,
}

/// What the normalizer does with a constant (zero-variance) matrix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ZeroVariancePolicy {
    /// Fail with `Error::DegenerateInput`
    #[default]
    Reject,
    /// Divide by `max(std, eps)`
    Epsilon(f64),
    /// Divide by zero and let the output go non-finite
    Propagate,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    pub zero_variance: ZeroVariancePolicy,
}

/// How the collator decides which positions are real data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MaskStrategy {
    /// Positions inside each sample's original length are valid
    #[default]
    Lengths,
    /// Positions whose values are not all zero are valid
    ValueInferred,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollateConfig {
    /// Fill value for padded input positions
    pub padding_value: f32,

    /// Fill value for padded label positions
    pub label_padding_value: f32,

    /// Expected width of every feature vector, if known up front
    pub feature_dim: Option<usize>,

    pub mask_strategy: MaskStrategy,
}

impl Default for CollateConfig {
    fn default() -> Self {
        Self {
            padding_value: 0.0,
            label_padding_value: 0.0,
            feature_dim: None,
            mask_strategy: MaskStrategy::default(),
        }
    }
}

/// BERT encoder hyper-parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    /// Capacity of the absolute position table
    pub max_position_embeddings: usize,
    pub type_vocab_size: usize,
    pub layer_norm_eps: f64,
    pub hidden_dropout_prob: f32,
    pub attention_probs_dropout_prob: f32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            hidden_size: 768,
            num_hidden_layers: 12,
            num_attention_heads: 12,
            intermediate_size: 3072,
            max_position_embeddings: 4096,
            type_vocab_size: 2,
            layer_norm_eps: 1e-12,
            hidden_dropout_prob: 0.1,
            attention_probs_dropout_prob: 0.1,
        }
    }
}

impl EncoderConfig {
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_attention_heads == 0 || self.hidden_size % self.num_attention_heads != 0 {
            return Err(Error::Config(format!(
                "hidden size {} is not divisible by {} attention heads",
                self.hidden_size, self.num_attention_heads
            )));
        }
        if self.num_hidden_layers == 0 {
            return Err(Error::Config("encoder needs at least one layer".into()));
        }
        if self.max_position_embeddings == 0 || self.type_vocab_size == 0 {
            return Err(Error::Config("embedding tables must be non-empty".into()));
        }
        Ok(())
    }
}

/// Regression model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsiBertConfig {
    /// Width of each input/output feature vector
    pub feature_dim: usize,

    /// Size of the learned time-position table
    pub time_positions: usize,

    pub encoder: EncoderConfig,
}

impl Default for CsiBertConfig {
    fn default() -> Self {
        Self {
            feature_dim: 64,
            time_positions: 1024,
            encoder: EncoderConfig::default(),
        }
    }
}

impl CsiBertConfig {
    pub fn new(feature_dim: usize) -> Self {
        Self {
            feature_dim,
            ..Default::default()
        }
    }

    /// Longest sequence both positional tables can index
    pub fn max_sequence_length(&self) -> usize {
        self.time_positions.min(self.encoder.max_position_embeddings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.feature_dim == 0 {
            return Err(Error::Config("feature dimension must be non-zero".into()));
        }
        if self.time_positions == 0 {
            return Err(Error::Config("time embedding table must be non-empty".into()));
        }
        self.encoder.validate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    #[default]
    Cpu,
    Cuda(usize),
    Metal,
}

impl DeviceType {
    pub fn to_device(self) -> Result<candle_core::Device> {
        let device = match self {
            DeviceType::Cpu => candle_core::Device::Cpu,
            DeviceType::Cuda(ordinal) => candle_core::Device::new_cuda(ordinal)?,
            DeviceType::Metal => candle_core::Device::new_metal(0)?,
        };
        Ok(device)
    }
}

impl ExperimentConfig {
    /// Load configuration from file, with environment overrides
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(Self::environment())
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(Self::environment())
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix("CSIBERT")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        if let Some(dim) = self.collate.feature_dim {
            if dim != self.model.feature_dim {
                return Err(Error::FeatureDim {
                    expected: self.model.feature_dim,
                    actual: dim,
                });
            }
        }
        Ok(())
    }
}
