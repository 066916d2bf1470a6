//! # CSI-BERT Model
//!
//! BERT-style encoder adapted from token classification to continuous
//! regression over CSI sequences.
//!
//! ## Architecture Overview
//!
//! 1. **Time Embedding**: learned table indexed by sequence position (1024)
//! 2. **Feature Embedding**: linear projection feature_dim → hidden (768)
//! 3. **Encoder**: 12-layer, 12-head BERT stack over the summed embeddings
//! 4. **Regression Head**: linear projection hidden → feature_dim, no activation
//!
//! Predictions are the (normalized) feature vectors at every position.

pub mod encoder;
pub mod inference;
pub mod model;

pub use encoder::*;
pub use inference::*;
pub use model::*;
