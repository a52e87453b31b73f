use runsync_config::ConfigError;
use runsync_store::StoreError;
use runsync_transport::TransportError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
  #[error("configuration error: {0}")]
  Config(#[from] ConfigError),

  #[error("transport error: {0}")]
  Transport(#[from] TransportError),

  #[error("store error: {0}")]
  Store(#[from] StoreError),

  #[error("sync state lock poisoned")]
  Poisoned,
}

/// Failure inside one handler invocation.
///
/// The dispatcher logs these and moves on to the next handler.
#[derive(Debug, Error)]
pub enum HandlerError {
  #[error(transparent)]
  Engine(#[from] EngineError),

  #[error("{0}")]
  Message(String),
}

impl HandlerError {
  pub fn message(message: impl Into<String>) -> Self {
    Self::Message(message.into())
  }
}
