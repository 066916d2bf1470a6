//! CSI-BERT: a BERT encoder adapted to regress per-step CSI feature vectors.
//!
//! Each time step's feature vector is linearly projected to the hidden size
//! and summed with a learned time-position embedding. The encoder's hidden
//! states are projected back to the feature dimension with no activation.

use candle_core::{DType, Device, Module, Result, Tensor};
use candle_nn::{embedding, linear, Embedding, Linear, VarBuilder};
use csibert_core::CsiBertConfig;

use crate::encoder::{BertEncoder, SequenceEncoder};

/// Output of [`CsiBert::forward`]
#[derive(Debug, Clone)]
pub struct ModelOutput {
    /// Per-position feature predictions `[batch, seq_len, feature_dim]`
    pub predictions: Tensor,
    /// Per-layer attention weights, present only when requested
    pub attentions: Option<Vec<Tensor>>,
}

impl ModelOutput {
    pub fn into_parts(self) -> (Tensor, Option<Vec<Tensor>>) {
        (self.predictions, self.attentions)
    }
}

/// Regression encoder model
pub struct CsiBert<E: SequenceEncoder = BertEncoder> {
    time_embedding: Embedding,
    feature_embedding: Linear,
    encoder: E,
    output_layer: Linear,
    config: CsiBertConfig,
}

impl CsiBert<BertEncoder> {
    /// Build the model with the stock BERT encoder under the `bert` prefix
    pub fn new(config: CsiBertConfig, vb: VarBuilder) -> Result<Self> {
        config.validate().map_err(candle_core::Error::wrap)?;
        let encoder = BertEncoder::new(config.encoder.clone(), vb.pp("bert"))?;
        Self::with_encoder(config, encoder, vb)
    }
}

impl<E: SequenceEncoder> CsiBert<E> {
    /// Build the model around an existing encoder. Embedding and output
    /// widths follow `encoder.hidden_size()`.
    pub fn with_encoder(config: CsiBertConfig, encoder: E, vb: VarBuilder) -> Result<Self> {
        let hidden = encoder.hidden_size();

        let time_embedding = embedding(config.time_positions, hidden, vb.pp("time_embedding"))?;
        let feature_embedding = linear(config.feature_dim, hidden, vb.pp("feature_embedding"))?;
        let output_layer = linear(hidden, config.feature_dim, vb.pp("output_layer"))?;

        tracing::debug!(
            "CSI-BERT: feature_dim={} hidden={} time_positions={} encoder_positions={}",
            config.feature_dim,
            hidden,
            config.time_positions,
            encoder.max_positions()
        );

        Ok(Self {
            time_embedding,
            feature_embedding,
            encoder,
            output_layer,
            config,
        })
    }

    /// Combined input embedding: time-position embedding + projected features.
    ///
    /// # Arguments
    /// * `inputs` - Tensor of shape [batch, seq_len, feature_dim]
    ///
    /// # Returns
    /// Embeddings of shape [batch, seq_len, hidden_size]
    pub fn embed(&self, inputs: &Tensor) -> Result<Tensor> {
        let (_batch, seq_len, feature_dim) = inputs.dims3()?;

        if feature_dim != self.config.feature_dim {
            candle_core::bail!(
                "feature dimension mismatch: model expects {}, input has {}",
                self.config.feature_dim,
                feature_dim
            );
        }
        if seq_len > self.config.time_positions {
            candle_core::bail!(
                "sequence length {} exceeds the {} time-position embeddings",
                seq_len,
                self.config.time_positions
            );
        }

        // Same positional signal for every batch member
        let time_indices = Tensor::arange(0u32, seq_len as u32, inputs.device())?;
        let time_embeds = self.time_embedding.forward(&time_indices)?.unsqueeze(0)?;

        let feature_embeds = self.feature_embedding.forward(inputs)?;

        feature_embeds.broadcast_add(&time_embeds)
    }

    /// Forward pass in evaluation mode (dropout disabled)
    ///
    /// # Arguments
    /// * `inputs` - Tensor of shape [batch, seq_len, feature_dim]
    /// * `attention_mask` - Optional [batch, seq_len] mask, 1 for real positions
    /// * `output_attentions` - Also return per-layer attention weights
    pub fn forward(
        &self,
        inputs: &Tensor,
        attention_mask: Option<&Tensor>,
        output_attentions: bool,
    ) -> Result<ModelOutput> {
        self.forward_t(inputs, attention_mask, output_attentions, false)
    }

    /// Forward pass with explicit control over dropout
    pub fn forward_t(
        &self,
        inputs: &Tensor,
        attention_mask: Option<&Tensor>,
        output_attentions: bool,
        train: bool,
    ) -> Result<ModelOutput> {
        let combined = self.embed(inputs)?;

        let encoded = self
            .encoder
            .encode(&combined, attention_mask, output_attentions, train)?;

        // Regression head: no activation
        let predictions = self.output_layer.forward(&encoded.hidden_states)?;

        Ok(ModelOutput {
            predictions,
            attentions: encoded.attentions,
        })
    }

    /// Predictions only
    pub fn predict(&self, inputs: &Tensor, attention_mask: Option<&Tensor>) -> Result<Tensor> {
        Ok(self.forward(inputs, attention_mask, false)?.predictions)
    }

    /// Longest sequence both positional tables accept
    pub fn max_sequence_length(&self) -> usize {
        self.config.time_positions.min(self.encoder.max_positions())
    }

    pub fn feature_dim(&self) -> usize {
        self.config.feature_dim
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    pub fn config(&self) -> &CsiBertConfig {
        &self.config
    }
}

/// Zero inputs of the right shape for a quick smoke pass
pub fn dummy_inputs(batch: usize, seq_len: usize, config: &CsiBertConfig, device: &Device) -> Result<Tensor> {
    Tensor::zeros((batch, seq_len, config.feature_dim), DType::F32, device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::EncoderOutput;
    use candle_core::D;
    use candle_nn::VarMap;
    use csibert_core::EncoderConfig;

    fn small_config(feature_dim: usize) -> CsiBertConfig {
        CsiBertConfig {
            feature_dim,
            time_positions: 32,
            encoder: EncoderConfig {
                hidden_size: 32,
                num_hidden_layers: 2,
                num_attention_heads: 4,
                intermediate_size: 64,
                max_position_embeddings: 64,
                ..Default::default()
            },
        }
    }

    fn build(config: CsiBertConfig) -> Result<CsiBert> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        CsiBert::new(config, vb)
    }

    fn max_abs_diff(a: &Tensor, b: &Tensor) -> Result<f32> {
        (a - b)?.abs()?.flatten_all()?.max(0)?.to_scalar::<f32>()
    }

    #[test]
    fn test_forward_shapes() -> Result<()> {
        let device = Device::Cpu;
        let model = build(small_config(64))?;
        let inputs = Tensor::randn(0f32, 1f32, (2, 10, 64), &device)?;

        let output = model.forward(&inputs, None, false)?;
        assert_eq!(output.predictions.dims(), &[2, 10, 64]);
        assert!(output.attentions.is_none());

        let (predictions, attentions) = model.forward(&inputs, None, true)?.into_parts();
        assert_eq!(predictions.dims(), &[2, 10, 64]);
        let attentions = attentions.expect("attentions requested");
        assert!(!attentions.is_empty());
        assert_eq!(attentions.len(), 2);
        assert_eq!(attentions[0].dims(), &[2, 4, 10, 10]);
        Ok(())
    }

    #[test]
    fn test_mask_is_wired_through() -> Result<()> {
        let device = Device::Cpu;
        let model = build(small_config(8))?;
        let inputs = Tensor::randn(0f32, 1f32, (2, 6, 8), &device)?;

        let hidden = Tensor::zeros((2, 6), DType::F32, &device)?;
        let visible = Tensor::ones((2, 6), DType::F32, &device)?;

        let masked = model.predict(&inputs, Some(&hidden))?;
        let unmasked = model.predict(&inputs, Some(&visible))?;

        assert!(max_abs_diff(&masked, &unmasked)? > 1e-6);
        Ok(())
    }

    #[test]
    fn test_full_mask_matches_no_mask() -> Result<()> {
        let device = Device::Cpu;
        let model = build(small_config(8))?;
        let inputs = Tensor::randn(0f32, 1f32, (1, 5, 8), &device)?;
        let visible = Tensor::ones((1, 5), DType::F32, &device)?;

        let a = model.predict(&inputs, None)?;
        let b = model.predict(&inputs, Some(&visible))?;
        assert!(max_abs_diff(&a, &b)? < 1e-5);
        Ok(())
    }

    #[test]
    fn test_padding_does_not_leak() -> Result<()> {
        let device = Device::Cpu;
        let model = build(small_config(8))?;

        let short = Tensor::randn(0f32, 1f32, (1, 3, 8), &device)?;
        let padded = Tensor::cat(&[&short, &Tensor::zeros((1, 2, 8), DType::F32, &device)?], 1)?;
        let mask = Tensor::new(&[[1f32, 1.0, 1.0, 0.0, 0.0]], &device)?;

        let alone = model.predict(&short, None)?;
        let batched = model.predict(&padded, Some(&mask))?.narrow(1, 0, 3)?;

        assert!(max_abs_diff(&alone, &batched)? < 1e-4);
        Ok(())
    }

    #[test]
    fn test_eval_is_deterministic() -> Result<()> {
        let device = Device::Cpu;
        let model = build(small_config(4))?;
        let inputs = Tensor::randn(0f32, 1f32, (2, 7, 4), &device)?;

        let a = model.predict(&inputs, None)?;
        let b = model.predict(&inputs, None)?;
        assert_eq!(max_abs_diff(&a, &b)?, 0.0);
        Ok(())
    }

    #[test]
    fn test_time_embedding_is_batch_independent() -> Result<()> {
        let device = Device::Cpu;
        let model = build(small_config(4))?;

        // Zero features: the embedding reduces to the feature bias plus time
        // embedding, identical for every batch row
        let combined = model.embed(&dummy_inputs(3, 5, model.config(), &device)?)?;
        let first = combined.narrow(0, 0, 1)?;
        let spread = combined.broadcast_sub(&first)?.abs()?.max(D::Minus1)?;
        let worst = spread.flatten_all()?.max(0)?.to_scalar::<f32>()?;
        assert_eq!(worst, 0.0);
        Ok(())
    }

    #[test]
    fn test_feature_dim_checked() -> Result<()> {
        let device = Device::Cpu;
        let model = build(small_config(8))?;
        let inputs = Tensor::zeros((1, 4, 6), DType::F32, &device)?;

        let err = model.forward(&inputs, None, false).unwrap_err();
        assert!(err.to_string().contains("feature dimension mismatch"));
        Ok(())
    }

    #[test]
    fn test_time_capacity_checked() -> Result<()> {
        let device = Device::Cpu;
        let model = build(small_config(4))?;
        assert_eq!(model.max_sequence_length(), 32);

        let inputs = Tensor::zeros((1, 33, 4), DType::F32, &device)?;
        let err = model.forward(&inputs, None, false).unwrap_err();
        assert!(err.to_string().contains("time-position"));
        Ok(())
    }

    #[test]
    fn test_encoder_capacity_propagates() -> Result<()> {
        let device = Device::Cpu;
        let mut config = small_config(4);
        config.encoder.max_position_embeddings = 8;
        let model = build(config)?;
        assert_eq!(model.max_sequence_length(), 8);

        let inputs = Tensor::zeros((1, 12, 4), DType::F32, &device)?;
        let err = model.forward(&inputs, None, false).unwrap_err();
        assert!(err.to_string().contains("position embeddings"));
        Ok(())
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = small_config(4);
        config.encoder.num_attention_heads = 5;
        assert!(build(config).is_err());
    }

    /// Passes embeddings straight through, ignoring the mask
    struct Passthrough {
        hidden: usize,
    }

    impl SequenceEncoder for Passthrough {
        fn hidden_size(&self) -> usize {
            self.hidden
        }

        fn max_positions(&self) -> usize {
            usize::MAX
        }

        fn encode(
            &self,
            embeddings: &Tensor,
            _attention_mask: Option<&Tensor>,
            output_attentions: bool,
            _train: bool,
        ) -> Result<EncoderOutput> {
            Ok(EncoderOutput {
                hidden_states: embeddings.clone(),
                attentions: output_attentions.then(Vec::new),
            })
        }
    }

    #[test]
    fn test_custom_encoder() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let config = CsiBertConfig {
            feature_dim: 3,
            time_positions: 16,
            ..Default::default()
        };

        let model = CsiBert::with_encoder(config, Passthrough { hidden: 8 }, vb)?;
        assert_eq!(model.max_sequence_length(), 16);

        let inputs = Tensor::randn(0f32, 1f32, (2, 4, 3), &device)?;
        let output = model.forward(&inputs, None, false)?;
        assert_eq!(output.predictions.dims(), &[2, 4, 3]);
        Ok(())
    }
}
