//! Attention masks for padded batches.
//!
//! Two derivations are provided. [`build_mask`] infers padding from the data
//! itself: a position is padding when every value at it is exactly zero, so a
//! genuine all-zero reading is masked out as well. [`validity_mask`] uses the
//! lengths recorded by the padder and has no such ambiguity.

use candle_core::{DType, Device, Tensor, D};

use csibert_core::{Error, Result};

/// Mask `[batch, max_len]` with 1.0 where the padded value (or any feature
/// of the padded vector) differs from zero, 0.0 elsewhere.
pub fn build_mask(padded: &Tensor) -> Result<Tensor> {
    let non_zero = padded.ne(&padded.zeros_like()?)?;

    let mask = match padded.rank() {
        2 => non_zero,
        3 => non_zero.max(D::Minus1)?,
        rank => {
            return Err(Error::Validation(format!(
                "padded batch must have rank 2 or 3, got {}",
                rank
            )))
        }
    };

    Ok(mask.to_dtype(DType::F32)?)
}

/// Mask `[batch, max_len]` with 1.0 for the first `lengths[i]` positions of
/// row `i`.
pub fn validity_mask(lengths: &[usize], max_len: usize, device: &Device) -> Result<Tensor> {
    let mut data = vec![0f32; lengths.len() * max_len];

    for (row, &len) in lengths.iter().enumerate() {
        if len > max_len {
            return Err(Error::Validation(format!(
                "row {} has length {} beyond padded length {}",
                row, len, max_len
            )));
        }
        data[row * max_len..row * max_len + len].fill(1.0);
    }

    Ok(Tensor::from_vec(data, (lengths.len(), max_len), device)?)
}
