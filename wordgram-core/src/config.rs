//! Runtime configuration.
//!
//! Replaces process-wide constants (max order, threshold, file locations) by
//! an explicit structure handed to each component. Values come from a TOML
//! file where every field is optional:
//!
//! ```toml
//! [model]
//! max_order = 5
//! threshold = 3
//!
//! [paths]
//! corpus = "data/corpus.txt"
//! raw_model = "data/ngram_counts.json"
//! optimized_model = "data/ngram_model.json"
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ModelError, Result};

/// Environment variable pointing to a configuration file.
pub const CONFIG_ENV: &str = "WORDGRAM_CONFIG";

/// Configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "wordgram.toml";

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct Config {
	#[serde(default)]
	pub model: ModelConfig,
	#[serde(default)]
	pub paths: PathsConfig,
}

/// Model building parameters.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ModelConfig {
	/// Highest n-gram order counted and served.
	#[serde(default = "default_max_order")]
	pub max_order: usize,
	/// Minimum raw count a candidate needs to survive optimization.
	#[serde(default = "default_threshold")]
	pub threshold: u64,
}

impl Default for ModelConfig {
	fn default() -> Self {
		Self {
			max_order: default_max_order(),
			threshold: default_threshold(),
		}
	}
}

/// Locations of the corpus and of both persisted tables.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PathsConfig {
	#[serde(default = "default_corpus")]
	pub corpus: PathBuf,
	#[serde(default = "default_raw_model")]
	pub raw_model: PathBuf,
	#[serde(default = "default_optimized_model")]
	pub optimized_model: PathBuf,
}

impl Default for PathsConfig {
	fn default() -> Self {
		Self {
			corpus: default_corpus(),
			raw_model: default_raw_model(),
			optimized_model: default_optimized_model(),
		}
	}
}

fn default_max_order() -> usize {
	5
}

fn default_threshold() -> u64 {
	3
}

fn default_corpus() -> PathBuf {
	PathBuf::from("data/corpus.txt")
}

fn default_raw_model() -> PathBuf {
	PathBuf::from("data/ngram_counts.json")
}

fn default_optimized_model() -> PathBuf {
	PathBuf::from("data/ngram_model.json")
}

impl Config {
	/// Loads the configuration.
	///
	/// Resolution order: `explicit`, then `$WORDGRAM_CONFIG`, then
	/// `./wordgram.toml`. An explicitly requested file must exist; when no
	/// file is found otherwise, defaults are used.
	pub fn load(explicit: Option<&Path>) -> Result<Self> {
		if let Some(path) = explicit {
			if !path.exists() {
				return Err(ModelError::NotFound(path.to_path_buf()));
			}
			return Self::from_file(path);
		}

		let path = resolve_config_path();
		if path.exists() {
			return Self::from_file(&path);
		}

		log::debug!("no configuration file at {}, using defaults", path.display());
		Ok(Self::default())
	}

	/// Reads and validates a TOML configuration file.
	pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
		let raw = fs::read_to_string(path.as_ref())?;
		let config = Self::from_toml(&raw)?;
		log::info!("loaded configuration from {}", path.as_ref().display());
		Ok(config)
	}

	/// Parses and validates a TOML document.
	pub fn from_toml(raw: &str) -> Result<Self> {
		let config: Config = toml::from_str(raw)?;
		config.validate()?;
		Ok(config)
	}

	/// Rejects values no component can work with.
	pub fn validate(&self) -> Result<()> {
		if self.model.max_order == 0 {
			return Err(ModelError::InvalidConfig("max_order must be >= 1".to_owned()));
		}
		Ok(())
	}
}

fn resolve_config_path() -> PathBuf {
	if let Ok(path) = env::var(CONFIG_ENV) {
		return PathBuf::from(path);
	}
	PathBuf::from(DEFAULT_CONFIG_FILE)
}
