//! Inference engine: CSI matrices in, per-step feature predictions out.

use std::path::Path;
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};

use csibert_core::{CsiMatrix, Error, ExperimentConfig, MaskStrategy, Result, Sequence};
use csibert_data::{build_mask, SequencePadder, Tokenizer};

use crate::model::CsiBert;

/// Evaluation-mode inference over batches of CSI matrices
pub struct InferenceEngine {
    model: CsiBert,
    tokenizer: Tokenizer,
    padder: SequencePadder,
    device: Device,
    config: ExperimentConfig,
}

impl InferenceEngine {
    /// Create a new inference engine with random weights (for testing)
    pub fn new_random(config: ExperimentConfig) -> Result<Self> {
        config.validate()?;
        let device = config.device.to_device()?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let model = CsiBert::new(config.model.clone(), vb)?;

        Ok(Self::assemble(model, device, config))
    }

    /// Load model weights from a safetensors checkpoint
    pub fn load<P: AsRef<Path>>(path: P, config: ExperimentConfig) -> Result<Self> {
        config.validate()?;
        let device = config.device.to_device()?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[path.as_ref()], DType::F32, &device)?
        };

        let model = CsiBert::new(config.model.clone(), vb)?;
        tracing::debug!("Loaded CSI-BERT weights from {}", path.as_ref().display());

        Ok(Self::assemble(model, device, config))
    }

    fn assemble(model: CsiBert, device: Device, config: ExperimentConfig) -> Self {
        let tokenizer = Tokenizer::new(config.tokenizer.clone());
        let padder = SequencePadder::new(&device)
            .with_padding_value(config.collate.padding_value)
            .with_feature_dim(Some(config.model.feature_dim));

        Self {
            model,
            tokenizer,
            padder,
            device,
            config,
        }
    }

    /// Tokenize each matrix into one feature vector per time step and run
    /// the model over the padded batch.
    ///
    /// Every matrix must have `subcarriers × antennas == feature_dim`.
    pub fn predict(&self, matrices: &[CsiMatrix]) -> Result<InferenceResult> {
        let sequences = matrices
            .iter()
            .map(|m| self.tokenizer.tokenize_steps(m))
            .collect::<Result<Vec<_>>>()?;

        self.predict_sequences(&sequences)
    }

    /// Run the model over already tokenized sequences
    pub fn predict_sequences(&self, sequences: &[Sequence]) -> Result<InferenceResult> {
        let start = Instant::now();

        let max = self.model.max_sequence_length();
        if let Some(length) = sequences.iter().map(Sequence::len).find(|&len| len > max) {
            return Err(Error::Capacity { length, max });
        }

        let padded = self.padder.pad(sequences)?;
        let attention_mask = match self.config.collate.mask_strategy {
            MaskStrategy::Lengths => padded.validity_mask()?,
            MaskStrategy::ValueInferred => build_mask(&padded.values)?,
        };

        let predictions = self.model.predict(&padded.values, Some(&attention_mask))?;

        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        tracing::debug!(
            "Inference on {} sequences (max length {}) took {:.2} ms",
            padded.batch_size(),
            padded.max_len(),
            latency_ms
        );

        Ok(InferenceResult {
            predictions,
            attention_mask,
            lengths: padded.lengths,
            latency_ms,
        })
    }

    pub fn model(&self) -> &CsiBert {
        &self.model
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }
}

/// Result from inference
#[derive(Debug, Clone)]
pub struct InferenceResult {
    /// `[batch, max_len, feature_dim]`
    pub predictions: Tensor,
    /// Mask the model was run with
    pub attention_mask: Tensor,
    /// Unpadded length of each sample
    pub lengths: Vec<usize>,
    pub latency_ms: f64,
}

impl InferenceResult {
    pub fn batch_size(&self) -> usize {
        self.lengths.len()
    }

    /// Unpadded predictions for sample `index`, one vector per time step
    pub fn sample(&self, index: usize) -> Result<Vec<Vec<f32>>> {
        let length = *self.lengths.get(index).ok_or_else(|| {
            Error::Validation(format!(
                "sample {} out of range for batch of {}",
                index,
                self.lengths.len()
            ))
        })?;

        let rows = self
            .predictions
            .narrow(0, index, 1)?
            .squeeze(0)?
            .narrow(0, 0, length)?
            .to_vec2::<f32>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csibert_core::{CsiBertConfig, EncoderConfig, ZeroVariancePolicy};
    use ndarray::Array3;

    fn test_config() -> ExperimentConfig {
        ExperimentConfig {
            model: CsiBertConfig {
                feature_dim: 6,
                time_positions: 16,
                encoder: EncoderConfig {
                    hidden_size: 16,
                    num_hidden_layers: 1,
                    num_attention_heads: 2,
                    intermediate_size: 32,
                    max_position_embeddings: 32,
                    ..Default::default()
                },
            },
            ..Default::default()
        }
    }

    fn test_matrix(n_timesteps: usize) -> CsiMatrix {
        // 3 subcarriers × 2 antennas = 6 features per step
        let values = (0..n_timesteps * 6)
            .map(|i| (i as f64 * 0.7).sin() + 2.0)
            .collect();
        CsiMatrix::from_shape_vec((n_timesteps, 3, 2), values).unwrap()
    }

    #[test]
    fn test_engine_creation() -> Result<()> {
        let engine = InferenceEngine::new_random(test_config())?;
        assert_eq!(engine.model().feature_dim(), 6);
        assert!(engine.device().is_cpu());
        Ok(())
    }

    #[test]
    fn test_predict_batch() -> Result<()> {
        let engine = InferenceEngine::new_random(test_config())?;
        let matrices = vec![test_matrix(4), test_matrix(7), test_matrix(2)];

        let result = engine.predict(&matrices)?;

        assert_eq!(result.predictions.dims(), &[3, 7, 6]);
        assert_eq!(result.lengths, vec![4, 7, 2]);
        assert_eq!(result.batch_size(), 3);
        assert!(result.latency_ms >= 0.0);

        let first = result.sample(0)?;
        assert_eq!(first.len(), 4);
        assert!(first.iter().all(|step| step.len() == 6));
        assert!(first.iter().flatten().all(|v| v.is_finite()));
        assert!(result.sample(3).is_err());
        Ok(())
    }

    #[test]
    fn test_wrong_feature_width() -> Result<()> {
        let engine = InferenceEngine::new_random(test_config())?;
        let matrix = CsiMatrix::from_shape_vec((3, 2, 2), (0..12).map(f64::from).collect())?;

        assert!(matches!(
            engine.predict(&[matrix]),
            Err(Error::FeatureDim { expected: 6, actual: 4 })
        ));
        Ok(())
    }

    #[test]
    fn test_capacity_error() -> Result<()> {
        let engine = InferenceEngine::new_random(test_config())?;

        assert!(matches!(
            engine.predict(&[test_matrix(17)]),
            Err(Error::Capacity { length: 17, max: 16 })
        ));
        Ok(())
    }

    #[test]
    fn test_degenerate_matrix() -> Result<()> {
        let engine = InferenceEngine::new_random(test_config())?;
        let constant = CsiMatrix::new(Array3::from_elem((3, 3, 2), 1.0));

        assert!(matches!(
            engine.predict(&[constant.clone()]),
            Err(Error::DegenerateInput { .. })
        ));

        let mut config = test_config();
        config.tokenizer.zero_variance = ZeroVariancePolicy::Epsilon(1e-8);
        let lenient = InferenceEngine::new_random(config)?;
        assert_eq!(lenient.predict(&[constant])?.lengths, vec![3]);
        Ok(())
    }

    #[test]
    fn test_load_missing_checkpoint() {
        let result = InferenceEngine::load("/nonexistent/csibert.safetensors", test_config());
        assert!(matches!(result, Err(Error::Tensor(_))));
    }
}
