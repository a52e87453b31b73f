use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;
use crate::transport::TransportConfig;

/// Query parameter carrying the client-session id on the stream URL.
pub const DEFAULT_CLIENT_ID_PARAM: &str = "clientId";

/// Top-level configuration for a sync session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// URL of the server-sent event stream.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub endpoint: Option<Url>,
  pub client_id_param: String,
  pub transport: TransportConfig,
  /// Where the client-session id is persisted between runs.
  /// Defaults to `<data dir>/runsync/client-session`.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub session_file: Option<PathBuf>,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      endpoint: None,
      client_id_param: DEFAULT_CLIENT_ID_PARAM.to_string(),
      transport: TransportConfig::default(),
      session_file: None,
    }
  }
}

impl SyncConfig {
  /// Load and validate a config file.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_json(&content)
  }

  pub fn from_json(json: &str) -> Result<Self, ConfigError> {
    let config: SyncConfig = serde_json::from_str(json)?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.client_id_param.trim().is_empty() {
      return Err(ConfigError::invalid(
        "client_id_param",
        "must not be empty",
      ));
    }
    self.transport.validate()
  }

  pub fn endpoint(&self) -> Result<&Url, ConfigError> {
    self.endpoint.as_ref().ok_or(ConfigError::MissingEndpoint)
  }

  /// Resolve the session file, falling back to the platform data directory.
  pub fn session_file(&self) -> Result<PathBuf, ConfigError> {
    match &self.session_file {
      Some(path) => Ok(path.clone()),
      None => dirs::data_dir()
        .map(|dir| dir.join("runsync").join("client-session"))
        .ok_or(ConfigError::NoDataDir),
    }
  }
}
