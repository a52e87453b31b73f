use thiserror::Error;

/// Reasons a raw frame could not be turned into an [`crate::EventEnvelope`].
///
/// All of these are non-fatal: the frame is dropped and the stream continues.
#[derive(Debug, Error)]
pub enum EnvelopeError {
  #[error("malformed envelope: {0}")]
  Json(#[from] serde_json::Error),

  #[error("envelope has no event kind")]
  MissingKind,

  #[error("unknown event kind: {0}")]
  UnknownKind(String),

  #[error("invalid '{kind}' payload: {source}")]
  InvalidPayload {
    kind: &'static str,
    #[source]
    source: serde_json::Error,
  },
}
