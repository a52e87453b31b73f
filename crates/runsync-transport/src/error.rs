use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  /// The server answered the stream request with a non-success status.
  #[error("stream request rejected with status {status}")]
  Status { status: u16 },

  #[error("no frames received for {0:?}")]
  HeartbeatTimeout(Duration),

  #[error("stream closed by server")]
  Closed,

  /// Failure reported by a non-HTTP connector.
  #[error("connection failed: {message}")]
  Connect { message: String },

  #[error("client session file error: {0}")]
  Session(#[from] std::io::Error),

  #[error("no async runtime available to drive the stream")]
  NoRuntime,
}

impl TransportError {
  pub fn connect(message: impl Into<String>) -> Self {
    Self::Connect {
      message: message.into(),
    }
  }
}
