//! Configuration loading for the guestbook.
//!
//! One TOML file covers the whole deployment: where the server binds, where
//! greetings are stored, which prediction models to call, and how to
//! authenticate against the prediction service. Every field has a default so
//! a missing file yields a runnable (if placeholder) configuration, while a
//! file that exists but does not parse is a startup error.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "guestbook.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GuestbookConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub prediction: PredictionConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Prediction service settings.
///
/// The defaults mirror the placeholders of the original sample deployment;
/// a real deployment overrides `project_id`, `language_model` and
/// `training_data` at minimum.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PredictionConfig {
    /// Override the service base URL (used by tests and local stubs).
    pub base_url: Option<String>,
    #[serde(default = "default_project_id")]
    pub project_id: String,
    /// Project hosting the shared sentiment sample model.
    pub hosted_project: Option<String>,
    /// Hosted sentiment model name.
    pub sentiment_model: Option<String>,
    #[serde(default = "default_language_model")]
    pub language_model: String,
    /// Cloud storage location of the language training data.
    #[serde(default = "default_training_data")]
    pub training_data: String,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            project_id: default_project_id(),
            hosted_project: None,
            sentiment_model: None,
            language_model: default_language_model(),
            training_data: default_training_data(),
        }
    }
}

/// Credential settings. Exactly one of the two blocks is expected; supplying
/// neither is a configuration error surfaced when the client is built.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Fixed bearer token (API-key style deployments, local stubs).
    pub static_token: Option<String>,
    /// OAuth refresh-token flow.
    pub oauth: Option<OauthConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OauthConfig {
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("guestbook.db")
}

fn default_project_id() -> String {
    "your-numeric-project-id".to_string()
}

fn default_language_model() -> String {
    "your-model-id".to_string()
}

fn default_training_data() -> String {
    "your-cloud-storage-bucket/language_id.txt".to_string()
}

impl GuestbookConfig {
    /// Load configuration.
    ///
    /// With an explicit path the file must exist and parse. With no path the
    /// default location is tried, and a missing file falls back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_file(path),
            None => {
                let path = Path::new(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    Self::load_file(path)
                } else {
                    tracing::debug!(
                        path = DEFAULT_CONFIG_PATH,
                        "No config file found, using defaults"
                    );
                    Ok(Self::default())
                }
            }
        }
    }

    fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }
}
