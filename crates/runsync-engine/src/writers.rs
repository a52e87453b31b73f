//! Writers that apply admitted updates to the UI-facing caches.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use runsync_events::{NodeResult, NodeRuntimeState, RunNodeRecord, RunRecord, RunStatus};
use runsync_store::{CachedNode, CachedRun, EditorStore, NodeReplace, RunCache, StoreError};
use runsync_workflow::NodeRuntime;
use tracing::debug;

/// An update that has passed the ordering filter and, for results, the
/// merge engine. Node updates carry the complete next value.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionUpdate {
  RunStatus {
    run_id: String,
    status: RunStatus,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    error: Option<String>,
    /// A finished run was queued again. The previous attempt's outcome and
    /// node runtimes are dropped.
    restart: bool,
  },
  RunSnapshot(RunRecord),
  NodeState {
    run_id: String,
    node_id: String,
    state: NodeRuntimeState,
  },
  NodeResult {
    run_id: String,
    node_id: String,
    result: NodeResult,
  },
}

impl ProjectionUpdate {
  pub fn run_id(&self) -> &str {
    match self {
      Self::RunStatus { run_id, .. }
      | Self::NodeState { run_id, .. }
      | Self::NodeResult { run_id, .. } => run_id,
      Self::RunSnapshot(record) => &record.run_id,
    }
  }

  pub fn node_id(&self) -> Option<&str> {
    match self {
      Self::NodeState { node_id, .. } | Self::NodeResult { node_id, .. } => Some(node_id),
      Self::RunStatus { .. } | Self::RunSnapshot(_) => None,
    }
  }
}

/// Applies updates to one cache. Returns whether the cache changed.
pub trait ProjectionWriter: Send + Sync {
  fn name(&self) -> &'static str;

  fn apply(&self, update: &ProjectionUpdate) -> Result<bool, StoreError>;
}

/// Writes into the run list/detail cache.
///
/// Runs first seen through an event are synthesized. Nodes are replaced
/// copy-on-write so untouched siblings keep their `Arc` identity, and an
/// update that changes nothing stores nothing.
pub struct RunCacheWriter {
  cache: RunCache,
}

impl RunCacheWriter {
  pub fn new(cache: RunCache) -> Self {
    Self { cache }
  }

  fn write_status(
    &self,
    run_id: &str,
    status: RunStatus,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    error: Option<&String>,
    restart: bool,
  ) -> Result<bool, StoreError> {
    self.cache.modify(run_id, |current| {
      let mut next = match current {
        Some(run) => (**run).clone(),
        None => CachedRun::synthesize(run_id, status),
      };
      next.status = status;
      if restart {
        next.started_at = started_at;
        next.finished_at = finished_at;
        next.error = error.cloned();
        next.nodes = Vec::new();
      } else {
        if started_at.is_some() {
          next.started_at = started_at;
        }
        if finished_at.is_some() {
          next.finished_at = finished_at;
        }
        if let Some(error) = error {
          next.error = Some(error.clone());
        }
      }

      match current {
        Some(run) if **run == next => None,
        _ => Some(next),
      }
    })
  }

  fn write_snapshot(&self, record: &RunRecord) -> Result<bool, StoreError> {
    self.cache.modify(&record.run_id, |current| {
      let mut next = CachedRun::from(record.clone());
      if let Some(previous) = current {
        if **previous == next {
          return None;
        }
        next.nodes = share_unchanged(&previous.nodes, next.nodes);
      }
      Some(next)
    })
  }

  fn write_node<F>(&self, run_id: &str, node_id: &str, update: F) -> Result<bool, StoreError>
  where
    F: Fn(&CachedNode) -> Option<CachedNode>,
  {
    self.cache.modify(run_id, |current| {
      let synthesized;
      let run: &CachedRun = match current {
        Some(run) => &**run,
        None => {
          synthesized = CachedRun::synthesize(run_id, RunStatus::Running);
          &synthesized
        }
      };

      match run.replace_node(node_id, &update) {
        NodeReplace::Replaced(next) => Some(next),
        NodeReplace::Unchanged => None,
        NodeReplace::NotFound => {
          debug!(run_id = %run_id, node_id = %node_id, "run_cache_node_appended");
          update(&CachedNode::new(node_id)).map(|node| run.with_root_node(node))
        }
      }
    })
  }
}

impl ProjectionWriter for RunCacheWriter {
  fn name(&self) -> &'static str {
    "run_cache"
  }

  fn apply(&self, update: &ProjectionUpdate) -> Result<bool, StoreError> {
    match update {
      ProjectionUpdate::RunStatus {
        run_id,
        status,
        started_at,
        finished_at,
        error,
        restart,
      } => self.write_status(
        run_id,
        *status,
        *started_at,
        *finished_at,
        error.as_ref(),
        *restart,
      ),
      ProjectionUpdate::RunSnapshot(record) => self.write_snapshot(record),
      ProjectionUpdate::NodeState {
        run_id,
        node_id,
        state,
      } => self.write_node(run_id, node_id, |node| {
        (node.state.as_ref() != Some(state)).then(|| CachedNode {
          state: Some(state.clone()),
          ..node.clone()
        })
      }),
      ProjectionUpdate::NodeResult {
        run_id,
        node_id,
        result,
      } => self.write_node(run_id, node_id, |node| {
        (node.result.as_ref() != Some(result)).then(|| CachedNode {
          result: Some(result.clone()),
          ..node.clone()
        })
      }),
    }
  }
}

/// Reuse the previous `Arc` for every node a snapshot left unchanged.
fn share_unchanged(
  previous: &[Arc<CachedNode>],
  next: Vec<Arc<CachedNode>>,
) -> Vec<Arc<CachedNode>> {
  let by_id: HashMap<&str, &Arc<CachedNode>> = previous
    .iter()
    .map(|node| (node.node_id.as_str(), node))
    .collect();

  next
    .into_iter()
    .map(|node| match by_id.get(node.node_id.as_str()) {
      Some(old) if **old == node => Arc::clone(old),
      _ => node,
    })
    .collect()
}

/// Writes node runtime fields into the workflow open in the editor.
///
/// Updates for runs other than the editor's bound run are ignored, as are
/// node ids the workflow does not contain.
pub struct EditorWriter {
  store: EditorStore,
}

impl EditorWriter {
  pub fn new(store: EditorStore) -> Self {
    Self { store }
  }

  fn write_snapshot_nodes(&self, nodes: &[RunNodeRecord]) -> Result<bool, StoreError> {
    let mut changed = false;
    for node in nodes {
      if let Some(state) = &node.state {
        changed |= self.store.update_runtime(&node.node_id, |rt| apply_state(rt, state))?;
      }
      if let Some(result) = &node.result {
        changed |= self.store.update_runtime(&node.node_id, |rt| apply_result(rt, result))?;
      }
      changed |= self.write_snapshot_nodes(&node.middleware)?;
    }
    Ok(changed)
  }
}

impl ProjectionWriter for EditorWriter {
  fn name(&self) -> &'static str {
    "editor"
  }

  fn apply(&self, update: &ProjectionUpdate) -> Result<bool, StoreError> {
    if !self.store.accepts_run(update.run_id()) {
      return Ok(false);
    }

    match update {
      ProjectionUpdate::RunStatus { restart, .. } => {
        if *restart {
          self.store.clear_runtime()
        } else {
          Ok(false)
        }
      }
      ProjectionUpdate::RunSnapshot(record) => self.write_snapshot_nodes(&record.nodes),
      ProjectionUpdate::NodeState { node_id, state, .. } => self
        .store
        .update_runtime(node_id, |rt| apply_state(rt, state)),
      ProjectionUpdate::NodeResult {
        node_id, result, ..
      } => self
        .store
        .update_runtime(node_id, |rt| apply_result(rt, result)),
    }
  }
}

pub(crate) fn apply_state(runtime: &mut NodeRuntime, state: &NodeRuntimeState) -> bool {
  let before = runtime.clone();
  runtime.stage = Some(state.stage.clone());
  runtime.progress = state.progress;
  runtime.message = state.message.clone();
  runtime.error = state.error.clone();
  runtime.last_updated_at = state.last_updated_at;
  *runtime != before
}

pub(crate) fn apply_result(runtime: &mut NodeRuntime, result: &NodeResult) -> bool {
  let before = runtime.clone();
  runtime.result = Some(result.content.clone());
  runtime.artifacts = result.artifacts.clone();
  runtime.summary = result.summary.clone();
  *runtime != before
}
