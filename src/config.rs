use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

use crate::backend::{Architecture, BackendKind, TransportError};
use crate::errors::AdapterError;

/// Tactic generation gateway: one request shape over local and hosted
/// language-model backends.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Config {
    /// Listen address (e.g. ":8000" or "0.0.0.0:8000")
    #[arg(long, default_value = ":8000", env = "ADDR")]
    pub addr: String,

    /// Log format: "text" or "json"
    #[arg(long, default_value = "text", env = "LOG_FORMAT")]
    pub log_format: String,

    /// Path to the TOML models file
    #[arg(long, default_value = "models.toml", env = "MODELS_CONFIG")]
    pub models: PathBuf,

    /// Handle one serverless event from this JSON file, print the result and exit
    #[arg(long)]
    pub event: Option<PathBuf>,
}

/// Startup errors. Any of these aborts the process.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("model {name}: {reason}")]
    InvalidEntry { name: String, reason: String },

    #[error("model {name}: environment variable {var} is not set")]
    MissingApiKey { name: String, var: String },

    #[error("model {0} is registered twice")]
    DuplicateModel(String),

    #[error("model {name}: {source}")]
    Adapter {
        name: String,
        #[source]
        source: AdapterError,
    },

    #[error("model {name}: {source}")]
    Transport {
        name: String,
        #[source]
        source: TransportError,
    },
}

/// The models file: a `[[model]]` array.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelsFile {
    #[serde(default)]
    pub model: Vec<ModelEntry>,
}

/// One adapter entry. Everything but `name`, `backend` and `model` has a default.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelEntry {
    /// Name requests address the adapter by.
    pub name: String,
    pub backend: BackendKind,
    /// Backend model identifier.
    pub model: String,
    /// Prompt family tag; defaults per backend.
    pub prompt: Option<String>,
    /// Required for local servers; hosted backends default to the vendor API.
    pub base_url: Option<String>,
    #[serde(default)]
    pub architecture: Architecture,
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_num_candidates")]
    pub num_candidates: u32,
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Overrides the vendor's conventional key variable.
    pub api_key_env: Option<String>,
    /// Embedding width; required for `tei`.
    pub embedding_dim: Option<usize>,
}

fn default_device() -> String {
    "auto".into()
}

fn default_temperature() -> f64 {
    0.9
}

fn default_top_p() -> f64 {
    0.9
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_num_candidates() -> u32 {
    16
}

fn default_parallelism() -> usize {
    1
}

fn default_timeout_secs() -> u64 {
    45
}

fn default_max_retries() -> u32 {
    3
}

impl ModelsFile {
    pub fn parse(path: &str, text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }
}

/// Read and parse the models file.
pub fn load_models(path: &Path) -> Result<ModelsFile, ConfigError> {
    let display = path.display().to_string();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: display.clone(),
        source,
    })?;
    ModelsFile::parse(&display, &text)
}
