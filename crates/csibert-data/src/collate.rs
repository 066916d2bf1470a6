//! Batch collation: (input, label) pairs to padded, masked tensors.

use candle_core::{Device, Tensor};

use csibert_core::{CollateConfig, Error, MaskStrategy, Result, Sequence};

use crate::mask::build_mask;
use crate::padding::SequencePadder;

/// Model-ready batch. Row `i` of every tensor belongs to sample `i`.
#[derive(Debug, Clone)]
pub struct Batch {
    /// `[batch, max_len, feature_dim]` (or `[batch, max_len]` for scalars)
    pub inputs: Tensor,
    /// Labels padded independently of the inputs
    pub labels: Tensor,
    /// `[batch, max_len]`, 1.0 at real positions
    pub attention_mask: Tensor,
    /// Unpadded input lengths
    pub lengths: Vec<usize>,
}

impl Batch {
    pub fn batch_size(&self) -> usize {
        self.lengths.len()
    }

    pub fn seq_len(&self) -> usize {
        self.lengths.iter().copied().max().unwrap_or(0)
    }

    /// `(padded_inputs, padded_labels, attention_mask)`
    pub fn into_tuple(self) -> (Tensor, Tensor, Tensor) {
        (self.inputs, self.labels, self.attention_mask)
    }
}

/// Turns lists of samples into [`Batch`]es
#[derive(Debug, Clone)]
pub struct Collator {
    inputs: SequencePadder,
    labels: SequencePadder,
    mask_strategy: MaskStrategy,
}

impl Collator {
    pub fn new(config: CollateConfig, device: &Device) -> Self {
        let inputs = SequencePadder::new(device)
            .with_padding_value(config.padding_value)
            .with_feature_dim(config.feature_dim);
        let labels = SequencePadder::new(device)
            .with_padding_value(config.label_padding_value)
            .with_feature_dim(config.feature_dim);

        Self {
            inputs,
            labels,
            mask_strategy: config.mask_strategy,
        }
    }

    /// Collate a list of `(input, label)` pairs
    pub fn collate(&self, batch: &[(Sequence, Sequence)]) -> Result<Batch> {
        let (inputs, labels): (Vec<Sequence>, Vec<Sequence>) = batch.iter().cloned().unzip();
        self.collate_parts(&inputs, &labels)
    }

    /// Collate inputs and labels given as separate, index-aligned lists
    pub fn collate_parts(&self, inputs: &[Sequence], labels: &[Sequence]) -> Result<Batch> {
        if inputs.len() != labels.len() {
            return Err(Error::ShapeMismatch {
                inputs: inputs.len(),
                labels: labels.len(),
            });
        }

        let padded_inputs = self.inputs.pad(inputs)?;
        let padded_labels = self.labels.pad(labels)?;

        let attention_mask = match self.mask_strategy {
            MaskStrategy::Lengths => padded_inputs.validity_mask()?,
            MaskStrategy::ValueInferred => build_mask(&padded_inputs.values)?,
        };

        tracing::debug!(
            "Collated batch of {} samples, max length {}",
            padded_inputs.batch_size(),
            padded_inputs.max_len()
        );

        Ok(Batch {
            inputs: padded_inputs.values,
            labels: padded_labels.values,
            attention_mask,
            lengths: padded_inputs.lengths,
        })
    }

    /// Collate consecutive chunks of `batch_size` pairs, in order.
    /// The final batch may be smaller.
    pub fn batches<'a>(
        &'a self,
        pairs: &'a [(Sequence, Sequence)],
        batch_size: usize,
    ) -> impl Iterator<Item = Result<Batch>> + 'a {
        pairs
            .chunks(batch_size.max(1))
            .map(move |chunk| self.collate(chunk))
    }
}

/// Collate with default settings on `device`
pub fn collate(batch: &[(Sequence, Sequence)], device: &Device) -> Result<(Tensor, Tensor, Tensor)> {
    Collator::new(CollateConfig::default(), device)
        .collate(batch)
        .map(Batch::into_tuple)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: usize, dim: usize, seed: usize) -> (Sequence, Sequence) {
        let input: Vec<Vec<f32>> = (0..len)
            .map(|t| (0..dim).map(|d| (seed + t * dim + d + 1) as f32).collect())
            .collect();
        let label: Vec<Vec<f32>> = input
            .iter()
            .map(|step| step.iter().map(|v| v * 0.5).collect())
            .collect();
        (Sequence::from(input), Sequence::from(label))
    }

    fn row_sums(mask: &Tensor) -> Vec<f32> {
        mask.sum(1).unwrap().to_vec1::<f32>().unwrap()
    }

    #[test]
    fn test_collate_lengths() -> Result<()> {
        let device = Device::Cpu;
        let batch = vec![sample(2, 3, 0), sample(4, 3, 10), sample(3, 3, 20)];

        let (inputs, labels, mask) = collate(&batch, &device)?;

        assert_eq!(inputs.dims(), &[3, 4, 3]);
        assert_eq!(labels.dims(), &[3, 4, 3]);
        assert_eq!(mask.dims(), &[3, 4]);
        assert_eq!(row_sums(&mask), vec![2.0, 4.0, 3.0]);
        Ok(())
    }

    #[test]
    fn test_value_inferred_strategy() -> Result<()> {
        let device = Device::Cpu;
        let config = CollateConfig {
            mask_strategy: MaskStrategy::ValueInferred,
            ..Default::default()
        };
        let collator = Collator::new(config, &device);
        let batch = vec![sample(2, 2, 0), sample(4, 2, 10), sample(3, 2, 20)];

        let collated = collator.collate(&batch)?;
        assert_eq!(row_sums(&collated.attention_mask), vec![2.0, 4.0, 3.0]);
        assert_eq!(collated.seq_len(), 4);
        Ok(())
    }

    #[test]
    fn test_rows_stay_aligned() -> Result<()> {
        let device = Device::Cpu;
        let batch = vec![sample(1, 2, 0), sample(3, 2, 50)];
        let collated = Collator::new(CollateConfig::default(), &device).collate(&batch)?;

        let inputs = collated.inputs.to_vec3::<f32>()?;
        let labels = collated.labels.to_vec3::<f32>()?;

        for (row, (input, label)) in batch.iter().enumerate() {
            let (Sequence::Vectors(input), Sequence::Vectors(label)) = (input, label) else {
                unreachable!()
            };
            assert_eq!(&inputs[row][..input.len()], input.as_slice());
            assert_eq!(&labels[row][..label.len()], label.as_slice());
        }
        Ok(())
    }

    #[test]
    fn test_label_padding_value() -> Result<()> {
        let device = Device::Cpu;
        let config = CollateConfig {
            label_padding_value: -100.0,
            ..Default::default()
        };
        let batch = vec![sample(1, 1, 0), sample(2, 1, 0)];
        let collated = Collator::new(config, &device).collate(&batch)?;

        let labels = collated.labels.to_vec3::<f32>()?;
        let inputs = collated.inputs.to_vec3::<f32>()?;
        assert_eq!(labels[0][1], vec![-100.0]);
        assert_eq!(inputs[0][1], vec![0.0]);
        Ok(())
    }

    #[test]
    fn test_count_mismatch() {
        let device = Device::Cpu;
        let collator = Collator::new(CollateConfig::default(), &device);
        let (a, b) = sample(2, 2, 0);

        let result = collator.collate_parts(&[a.clone(), a], &[b]);
        assert!(matches!(
            result,
            Err(Error::ShapeMismatch { inputs: 2, labels: 1 })
        ));
    }

    #[test]
    fn test_batches() -> Result<()> {
        let device = Device::Cpu;
        let collator = Collator::new(CollateConfig::default(), &device);
        let pairs: Vec<_> = (0..5).map(|i| sample(i + 1, 2, i)).collect();

        let batches: Vec<Batch> = collator.batches(&pairs, 2).collect::<Result<_>>()?;

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].lengths, vec![1, 2]);
        assert_eq!(batches[1].lengths, vec![3, 4]);
        assert_eq!(batches[2].lengths, vec![5]);
        assert_eq!(batches[2].inputs.dims(), &[1, 5, 2]);
        Ok(())
    }
}
