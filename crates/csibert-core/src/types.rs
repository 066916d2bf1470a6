//! Fundamental data types shared by the tokenizer, collator and model.

use ndarray::{Array1, Array3};
use num_complex::Complex;

use crate::error::{Error, Result};

/// Real-valued CSI measurements indexed by (time step, subcarrier, antenna).
///
/// Complex captures are reduced to magnitudes |H| on construction.
#[derive(Debug, Clone, PartialEq)]
pub struct CsiMatrix(Array3<f64>);

impl CsiMatrix {
    pub fn new(data: Array3<f64>) -> Self {
        Self(data)
    }

    /// Build from a row-major buffer of shape (timesteps, subcarriers, antennas)
    pub fn from_shape_vec(shape: (usize, usize, usize), values: Vec<f64>) -> Result<Self> {
        Array3::from_shape_vec(shape, values)
            .map(Self)
            .map_err(|e| Error::Validation(format!("CSI matrix shape: {}", e)))
    }

    /// Build from complex samples, keeping the amplitude of each entry
    pub fn from_complex(data: &Array3<Complex<f64>>) -> Self {
        Self(data.mapv(|c| c.norm()))
    }

    pub fn from_complex_vec(
        shape: (usize, usize, usize),
        values: Vec<Complex<f64>>,
    ) -> Result<Self> {
        let data = Array3::from_shape_vec(shape, values)
            .map_err(|e| Error::Validation(format!("CSI matrix shape: {}", e)))?;
        Ok(Self::from_complex(&data))
    }

    pub fn data(&self) -> &Array3<f64> {
        &self.0
    }

    pub fn into_inner(self) -> Array3<f64> {
        self.0
    }

    /// (timesteps, subcarriers, antennas)
    pub fn shape(&self) -> (usize, usize, usize) {
        self.0.dim()
    }

    pub fn n_timesteps(&self) -> usize {
        self.0.dim().0
    }

    /// Number of scalar measurements in one time step (subcarriers × antennas)
    pub fn features_per_step(&self) -> usize {
        let (_, subcarriers, antennas) = self.0.dim();
        subcarriers * antennas
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Mean over every element, `None` for an empty matrix
    pub fn mean(&self) -> Option<f64> {
        self.0.mean()
    }

    /// Population standard deviation over every element
    pub fn std(&self) -> f64 {
        self.0.std(0.0)
    }
}

impl From<Array3<f64>> for CsiMatrix {
    fn from(data: Array3<f64>) -> Self {
        Self(data)
    }
}

/// Representation kind of a sequence; a batch must not mix kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceKind {
    Scalars,
    Vectors,
}

/// One sample: an ordered run of scalars or of feature vectors.
#[derive(Debug, Clone, PartialEq)]
pub enum Sequence {
    Scalars(Vec<f32>),
    Vectors(Vec<Vec<f32>>),
}

impl Sequence {
    /// Number of time steps
    pub fn len(&self) -> usize {
        match self {
            Sequence::Scalars(values) => values.len(),
            Sequence::Vectors(steps) => steps.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> SequenceKind {
        match self {
            Sequence::Scalars(_) => SequenceKind::Scalars,
            Sequence::Vectors(_) => SequenceKind::Vectors,
        }
    }

    /// Width of the first feature vector; `None` for scalar or empty sequences
    pub fn feature_dim(&self) -> Option<usize> {
        match self {
            Sequence::Scalars(_) => None,
            Sequence::Vectors(steps) => steps.first().map(Vec::len),
        }
    }

    /// Split a flat (tokenized) sequence into consecutive feature vectors.
    ///
    /// A row-major (T, S, A) matrix flattened by the tokenizer becomes T steps
    /// of S·A features when `feature_dim = S * A`.
    pub fn from_flat(values: &[f64], feature_dim: usize) -> Result<Self> {
        if feature_dim == 0 {
            return Err(Error::Validation("feature dimension must be non-zero".into()));
        }
        if values.len() % feature_dim != 0 {
            return Err(Error::Validation(format!(
                "sequence of {} values is not a multiple of feature dimension {}",
                values.len(),
                feature_dim
            )));
        }

        let steps = values
            .chunks_exact(feature_dim)
            .map(|chunk| chunk.iter().map(|&v| v as f32).collect())
            .collect();

        Ok(Sequence::Vectors(steps))
    }
}

impl From<Vec<f32>> for Sequence {
    fn from(values: Vec<f32>) -> Self {
        Sequence::Scalars(values)
    }
}

impl From<Vec<Vec<f32>>> for Sequence {
    fn from(steps: Vec<Vec<f32>>) -> Self {
        Sequence::Vectors(steps)
    }
}

impl From<Array1<f64>> for Sequence {
    fn from(values: Array1<f64>) -> Self {
        Sequence::Scalars(values.iter().map(|&v| v as f32).collect())
    }
}
