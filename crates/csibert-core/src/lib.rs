//! # CSI-BERT Core
//!
//! Shared types, configuration and errors for the CSI-BERT workspace.
//!
//! A CSI matrix H(t, f, a) holds one real-valued measurement per time step,
//! subcarrier and antenna. The data crate turns batches of such matrices into
//! padded tensors; the model crate regresses per-step feature vectors from
//! them.

pub mod config;
pub mod error;
pub mod types;

pub use crate::config::*;
pub use error::{Error, Result};
pub use types::*;
