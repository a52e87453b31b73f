//! Workflow editor store.

use std::sync::{Arc, PoisonError, RwLock};

use runsync_workflow::{IndexedWorkflow, Node, NodeRuntime, Workflow};
use tracing::debug;

use crate::error::StoreError;

#[derive(Debug, Default)]
struct EditorState {
  workflow: Option<IndexedWorkflow>,
  active_run: Option<String>,
  revision: u64,
}

/// Shared handle to the workflow currently open in the editor.
#[derive(Debug, Clone, Default)]
pub struct EditorStore {
  inner: Arc<RwLock<EditorState>>,
}

impl EditorStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Open a workflow definition. The node index is rebuilt from it.
  pub fn load_workflow(&self, workflow: Workflow) -> Result<(), StoreError> {
    let mut state = self
      .inner
      .write()
      .map_err(|_| StoreError::poisoned("editor store"))?;
    match state.workflow.as_mut() {
      Some(current) => current.replace(workflow)?,
      None => state.workflow = Some(IndexedWorkflow::new(workflow)?),
    }
    state.revision += 1;
    Ok(())
  }

  /// Restrict runtime updates to one run. `None` accepts every run.
  pub fn bind_run(&self, run_id: Option<String>) -> Result<(), StoreError> {
    let mut state = self
      .inner
      .write()
      .map_err(|_| StoreError::poisoned("editor store"))?;
    state.active_run = run_id;
    Ok(())
  }

  /// Whether updates for `run_id` should reach the editor.
  pub fn accepts_run(&self, run_id: &str) -> bool {
    let state = self.inner.read().unwrap_or_else(PoisonError::into_inner);
    state.workflow.is_some() && state.active_run.as_deref().is_none_or(|r| r == run_id)
  }

  pub fn workflow(&self) -> Option<Workflow> {
    let state = self.inner.read().unwrap_or_else(PoisonError::into_inner);
    state.workflow.as_ref().map(|w| w.workflow().clone())
  }

  pub fn node(&self, node_id: &str) -> Option<Node> {
    let state = self.inner.read().unwrap_or_else(PoisonError::into_inner);
    state.workflow.as_ref()?.node(node_id).cloned()
  }

  pub fn revision(&self) -> u64 {
    self
      .inner
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .revision
  }

  /// Mutate the runtime fields of a node wherever it lives in the tree.
  ///
  /// `f` returns whether it changed anything. An unknown node id is a no-op
  /// and returns `Ok(false)`.
  pub fn update_runtime<F>(&self, node_id: &str, f: F) -> Result<bool, StoreError>
  where
    F: FnOnce(&mut NodeRuntime) -> bool,
  {
    let mut state = self
      .inner
      .write()
      .map_err(|_| StoreError::poisoned("editor store"))?;
    let Some(node) = state.workflow.as_mut().and_then(|w| w.node_mut(node_id)) else {
      debug!(node_id = %node_id, "editor node not found");
      return Ok(false);
    };

    let changed = f(&mut node.runtime);
    if changed {
      state.revision += 1;
    }
    Ok(changed)
  }

  /// Reset the runtime fields of every node, keeping the definition.
  pub fn clear_runtime(&self) -> Result<bool, StoreError> {
    let mut state = self
      .inner
      .write()
      .map_err(|_| StoreError::poisoned("editor store"))?;
    let changed = state
      .workflow
      .as_mut()
      .is_some_and(|workflow| workflow.clear_runtime());
    if changed {
      state.revision += 1;
    }
    Ok(changed)
  }
}
