use std::path::Path;

use tracing::info;

use crate::error::TransportError;

/// Stable client identifier sent with every connection so the server can
/// correlate a client across reconnects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSession {
  id: String,
}

impl ClientSession {
  pub fn new(id: impl Into<String>) -> Self {
    Self { id: id.into() }
  }

  /// A fresh id that is not persisted.
  pub fn ephemeral() -> Self {
    Self::new(uuid::Uuid::new_v4().to_string())
  }

  /// Read the id stored at `path`, creating and persisting one if the file
  /// is missing or empty.
  pub fn load_or_create(path: &Path) -> Result<Self, TransportError> {
    match std::fs::read_to_string(path) {
      Ok(content) if !content.trim().is_empty() => return Ok(Self::new(content.trim())),
      Ok(_) => {}
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
      Err(e) => return Err(e.into()),
    }

    let session = Self::ephemeral();
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, &session.id)?;
    info!(path = %path.display(), client_id = %session.id, "client_session_created");
    Ok(session)
  }

  pub fn id(&self) -> &str {
    &self.id
  }
}
