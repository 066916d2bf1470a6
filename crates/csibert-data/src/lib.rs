//! # CSI-BERT Data
//!
//! Data preparation for the CSI-BERT regression model.
//!
//! ## Pipeline Stages
//!
//! 1. **Tokenization**: z-score normalize each CSI matrix and flatten it
//! 2. **Padding**: right-pad variable-length sequences to the batch maximum
//! 3. **Masking**: mark real positions vs. padding
//! 4. **Collation**: build `(inputs, labels, attention_mask)` batches

pub mod collate;
pub mod mask;
pub mod padding;
pub mod tokenizer;

pub use collate::*;
pub use mask::*;
pub use padding::*;
pub use tokenizer::*;
