use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use wordgram_core::Config;

/// Server settings plus the shared model configuration, read from the same
/// TOML file:
///
/// ```toml
/// [server]
/// host = "0.0.0.0"
/// port = 5000
///
/// [paths]
/// optimized_model = "data/ngram_model.json"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerSettings {
	#[serde(default)]
	pub server: ServerConfig,
	#[serde(flatten)]
	pub model: Config,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ServerConfig {
	#[serde(default = "default_host")]
	pub host: String,
	#[serde(default = "default_port")]
	pub port: u16,
	/// Number of candidates returned when a request gives no `limit`.
	#[serde(default = "default_limit")]
	pub default_limit: usize,
	/// Upper bound on the `limit` a request may ask for.
	#[serde(default = "default_max_limit")]
	pub max_limit: usize,
	/// Send permissive CORS headers (browser front-ends on other origins).
	#[serde(default)]
	pub allow_any_origin: bool,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			host: default_host(),
			port: default_port(),
			default_limit: default_limit(),
			max_limit: default_max_limit(),
			allow_any_origin: false,
		}
	}
}

fn default_host() -> String {
	"127.0.0.1".to_owned()
}

fn default_port() -> u16 {
	5000
}

fn default_limit() -> usize {
	3
}

fn default_max_limit() -> usize {
	50
}

impl ServerSettings {
	/// Loads settings from `path`, or the default location used by the core
	/// configuration when `path` is `None`. Only an explicit path must exist.
	pub fn load(path: Option<&Path>) -> Result<Self> {
		let path = match path {
			Some(path) if !path.exists() => bail!("config file {} does not exist", path.display()),
			Some(path) => path.to_path_buf(),
			None => std::env::var(wordgram_core::config::CONFIG_ENV)
				.map(PathBuf::from)
				.unwrap_or_else(|_| PathBuf::from(wordgram_core::config::DEFAULT_CONFIG_FILE)),
		};

		if !path.exists() {
			log::info!("no configuration file at {}, using defaults", path.display());
			return Ok(Self::default());
		}

		let raw = fs::read_to_string(&path)
			.with_context(|| format!("failed to read config file {}", path.display()))?;
		Self::from_toml(&raw).with_context(|| format!("invalid config file {}", path.display()))
	}

	pub fn from_toml(raw: &str) -> Result<Self> {
		let settings: ServerSettings = toml::from_str(raw)?;
		settings.model.validate()?;
		Ok(settings)
	}
}
