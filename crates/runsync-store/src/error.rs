use runsync_workflow::WorkflowError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
  /// A writer panicked while holding the lock.
  #[error("{store} lock poisoned")]
  Poisoned { store: &'static str },

  #[error("workflow rejected: {0}")]
  Workflow(#[from] WorkflowError),
}

impl StoreError {
  pub(crate) fn poisoned(store: &'static str) -> Self {
    Self::Poisoned { store }
  }
}
