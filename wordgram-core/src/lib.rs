//! N-gram-based next-word prediction library.
//!
//! This crate builds and serves a word-level n-gram model:
//! - Raw n-gram counting over a normalized token stream
//! - Thresholding and per-context normalization into probabilities
//! - Longest-context-first (stupid backoff) next-word lookup
//! - JSON and compact binary persistence of the tables
//!
//! The probability table is immutable once built and can be shared by any
//! number of concurrent readers.

/// Runtime configuration (model parameters and file locations).
pub mod config;

/// Error type shared by every fallible operation.
pub mod error;

/// Core n-gram models and prediction logic.
pub mod model;

/// Batch jobs (train, optimize) and predictor loading.
pub mod pipeline;

/// I/O utilities (file loading, path helpers).
///
/// Not exposed
pub(crate) mod io;

pub use config::Config;
pub use error::{ModelError, Result};
pub use model::predictor::{Match, Predictor};
pub use model::table::{Candidate, ProbabilityTable};
