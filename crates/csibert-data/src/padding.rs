//! Right-padding of variable-length sequences into one rectangular tensor.

use candle_core::{Device, Tensor};

use csibert_core::{Error, Result, Sequence, SequenceKind};

/// A padded batch together with the original length of every row.
#[derive(Debug, Clone)]
pub struct PaddedBatch {
    /// `[batch, max_len]` for scalar sequences, `[batch, max_len, feature_dim]`
    /// for vector sequences
    pub values: Tensor,
    /// Unpadded length of each row, in input order
    pub lengths: Vec<usize>,
    /// `None` for scalar sequences
    pub feature_dim: Option<usize>,
}

impl PaddedBatch {
    pub fn batch_size(&self) -> usize {
        self.lengths.len()
    }

    pub fn max_len(&self) -> usize {
        self.lengths.iter().copied().max().unwrap_or(0)
    }

    /// Length-derived mask `[batch, max_len]`, 1.0 inside each row's length
    pub fn validity_mask(&self) -> Result<Tensor> {
        crate::mask::validity_mask(&self.lengths, self.max_len(), self.values.device())
    }

    pub fn into_values(self) -> Tensor {
        self.values
    }
}

/// Pads batches of [`Sequence`]s on a fixed device
#[derive(Debug, Clone)]
pub struct SequencePadder {
    padding_value: f32,
    feature_dim: Option<usize>,
    device: Device,
}

impl SequencePadder {
    pub fn new(device: &Device) -> Self {
        Self {
            padding_value: 0.0,
            feature_dim: None,
            device: device.clone(),
        }
    }

    pub fn with_padding_value(mut self, padding_value: f32) -> Self {
        self.padding_value = padding_value;
        self
    }

    /// Require every feature vector to have exactly `feature_dim` entries.
    /// Scalar sequences are not affected.
    pub fn with_feature_dim(mut self, feature_dim: Option<usize>) -> Self {
        self.feature_dim = feature_dim;
        self
    }

    /// Pad `sequences` to the length of the longest one.
    ///
    /// Never truncates. Fails when the batch is empty, mixes scalar and vector
    /// sequences, or contains feature vectors of differing widths.
    pub fn pad(&self, sequences: &[Sequence]) -> Result<PaddedBatch> {
        let first = sequences
            .first()
            .ok_or_else(|| Error::Validation("cannot pad an empty batch".into()))?;

        let kind = first.kind();
        if let Some(other) = sequences.iter().find(|s| s.kind() != kind) {
            return Err(Error::Validation(format!(
                "all sequences must be sequences of the same kind: found {:?} and {:?}",
                kind,
                other.kind()
            )));
        }

        let lengths: Vec<usize> = sequences.iter().map(Sequence::len).collect();
        let max_len = lengths.iter().copied().max().unwrap_or(0);

        match kind {
            SequenceKind::Scalars => self.pad_scalars(sequences, lengths, max_len),
            SequenceKind::Vectors => self.pad_vectors(sequences, lengths, max_len),
        }
    }

    fn pad_scalars(
        &self,
        sequences: &[Sequence],
        lengths: Vec<usize>,
        max_len: usize,
    ) -> Result<PaddedBatch> {
        let batch = sequences.len();
        let mut data = vec![self.padding_value; batch * max_len];

        for (row, seq) in sequences.iter().enumerate() {
            if let Sequence::Scalars(values) = seq {
                let offset = row * max_len;
                data[offset..offset + values.len()].copy_from_slice(values);
            }
        }

        let values = Tensor::from_vec(data, (batch, max_len), &self.device)?;

        Ok(PaddedBatch {
            values,
            lengths,
            feature_dim: None,
        })
    }

    fn pad_vectors(
        &self,
        sequences: &[Sequence],
        lengths: Vec<usize>,
        max_len: usize,
    ) -> Result<PaddedBatch> {
        let feature_dim = match self.feature_dim {
            Some(dim) => dim,
            None => sequences
                .iter()
                .find_map(Sequence::feature_dim)
                .ok_or_else(|| {
                    Error::Validation("cannot infer feature dimension from empty sequences".into())
                })?,
        };

        let batch = sequences.len();
        let row_stride = max_len * feature_dim;
        let mut data = vec![self.padding_value; batch * row_stride];

        for (row, seq) in sequences.iter().enumerate() {
            let Sequence::Vectors(steps) = seq else {
                continue;
            };
            for (t, step) in steps.iter().enumerate() {
                if step.len() != feature_dim {
                    return Err(Error::FeatureDim {
                        expected: feature_dim,
                        actual: step.len(),
                    });
                }
                let offset = row * row_stride + t * feature_dim;
                data[offset..offset + feature_dim].copy_from_slice(step);
            }
        }

        let values = Tensor::from_vec(data, (batch, max_len, feature_dim), &self.device)?;

        Ok(PaddedBatch {
            values,
            lengths,
            feature_dim: Some(feature_dim),
        })
    }
}

/// Pad `sequences` with `padding_value` and return the bare tensor
pub fn pad_sequences(sequences: &[Sequence], padding_value: f32, device: &Device) -> Result<Tensor> {
    SequencePadder::new(device)
        .with_padding_value(padding_value)
        .pad(sequences)
        .map(PaddedBatch::into_values)
}
