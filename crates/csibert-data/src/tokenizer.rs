//! CSI tokenization: per-matrix z-score normalization followed by a
//! row-major flatten.
//!
//! Statistics are taken from the matrix being tokenized only, never from
//! the rest of the dataset. The original (T, S, A) shape is not recorded in
//! the output; callers that need to reconstruct it must keep it themselves.

use ndarray::Array1;

use csibert_core::{CsiMatrix, Error, Result, Sequence, TokenizerConfig, ZeroVariancePolicy};

/// Normalize and flatten a CSI matrix.
///
/// Computes `(x - mean) / std` over all elements with the population standard
/// deviation. A constant matrix has `std == 0` and yields NaN for every
/// element; use [`Tokenizer`] for a guarded variant.
pub fn tokenize_csi_matrix(matrix: &CsiMatrix) -> Array1<f64> {
    let data = matrix.data();
    let mean = data.mean().unwrap_or(0.0);
    let std = data.std(0.0);
    normalize(matrix, mean, std)
}

fn normalize(matrix: &CsiMatrix, mean: f64, std: f64) -> Array1<f64> {
    matrix.data().iter().map(|&x| (x - mean) / std).collect()
}

/// Tokenizer with an explicit zero-variance policy
#[derive(Debug, Clone, Default)]
pub struct Tokenizer {
    config: TokenizerConfig,
}

impl Tokenizer {
    pub fn new(config: TokenizerConfig) -> Self {
        Self { config }
    }

    pub fn with_policy(mut self, policy: ZeroVariancePolicy) -> Self {
        self.config.zero_variance = policy;
        self
    }

    /// Normalize and flatten `matrix` into a 1D sequence
    pub fn tokenize(&self, matrix: &CsiMatrix) -> Result<Array1<f64>> {
        if matrix.is_empty() {
            return Err(Error::Validation("cannot tokenize an empty CSI matrix".into()));
        }
        if let Some(index) = matrix.data().iter().position(|x| !x.is_finite()) {
            return Err(Error::Validation(format!(
                "CSI matrix has a non-finite value at flat index {}",
                index
            )));
        }

        let mean = matrix.mean().unwrap_or(0.0);
        let std = matrix.std();

        match self.config.zero_variance {
            ZeroVariancePolicy::Epsilon(eps) => {
                if std < eps {
                    tracing::debug!("Clamping std {} to epsilon {}", std, eps);
                }
                Ok(normalize(matrix, mean, std.max(eps)))
            }
            _ if std > 0.0 => Ok(normalize(matrix, mean, std)),
            ZeroVariancePolicy::Reject => Err(Error::DegenerateInput {
                n_elements: matrix.len(),
            }),
            ZeroVariancePolicy::Propagate => {
                tracing::warn!(
                    "Tokenizing constant CSI matrix of {} elements, output is non-finite",
                    matrix.len()
                );
                Ok(normalize(matrix, mean, std))
            }
        }
    }

    /// Tokenize and regroup into one feature vector per time step
    /// (subcarriers × antennas features each).
    pub fn tokenize_steps(&self, matrix: &CsiMatrix) -> Result<Sequence> {
        let flat = self.tokenize(matrix)?;
        let values = flat.to_vec();
        Sequence::from_flat(&values, matrix.features_per_step())
    }
}
