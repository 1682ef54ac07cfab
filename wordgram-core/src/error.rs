use std::path::PathBuf;

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors raised while building, persisting or loading a model.
///
/// All batch failures (counting, optimizing) are fatal to the run: there is
/// no partial-success mode. Query-time conditions such as an empty history or
/// unknown tokens are not errors and never produce a `ModelError`.
#[derive(Error, Debug)]
pub enum ModelError {
	/// Corpus, raw count file or probability table does not exist.
	#[error("file not found: {}", .0.display())]
	NotFound(PathBuf),

	/// Persisted data has the wrong shape or violates a table invariant.
	#[error("malformed input: {0}")]
	MalformedInput(String),

	/// A configuration value is out of range.
	#[error("invalid configuration: {0}")]
	InvalidConfig(String),

	/// Any other I/O failure.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

impl ModelError {
	pub(crate) fn malformed(message: impl Into<String>) -> Self {
		ModelError::MalformedInput(message.into())
	}
}

impl From<serde_json::Error> for ModelError {
	fn from(e: serde_json::Error) -> Self {
		if e.is_io() {
			return ModelError::Io(e.into());
		}
		ModelError::MalformedInput(e.to_string())
	}
}

impl From<postcard::Error> for ModelError {
	fn from(e: postcard::Error) -> Self {
		ModelError::MalformedInput(format!("binary table: {e}"))
	}
}

impl From<toml::de::Error> for ModelError {
	fn from(e: toml::de::Error) -> Self {
		ModelError::InvalidConfig(e.to_string())
	}
}
