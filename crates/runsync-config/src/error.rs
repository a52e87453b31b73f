use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid config: {0}")]
  Parse(#[from] serde_json::Error),

  /// A field is present but violates an invariant.
  #[error("invalid value for '{field}': {message}")]
  InvalidValue { field: &'static str, message: String },

  #[error("no stream endpoint configured")]
  MissingEndpoint,

  #[error("could not determine a data directory for the session file")]
  NoDataDir,
}

impl ConfigError {
  pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
    Self::InvalidValue {
      field,
      message: message.into(),
    }
  }
}
