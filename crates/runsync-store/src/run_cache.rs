//! Run list/detail cache with structural sharing.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use runsync_events::{NodeResult, NodeRuntimeState, RunNodeRecord, RunRecord, RunStatus};
use serde::Serialize;

use crate::error::StoreError;

/// A node inside a cached run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedNode {
  pub node_id: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub state: Option<NodeRuntimeState>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub result: Option<NodeResult>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub middleware: Vec<Arc<CachedNode>>,
}

impl CachedNode {
  pub fn new(node_id: impl Into<String>) -> Self {
    Self {
      node_id: node_id.into(),
      state: None,
      result: None,
      middleware: Vec::new(),
    }
  }
}

impl From<RunNodeRecord> for CachedNode {
  fn from(record: RunNodeRecord) -> Self {
    Self {
      node_id: record.node_id,
      state: record.state,
      result: record.result,
      middleware: record
        .middleware
        .into_iter()
        .map(|m| Arc::new(m.into()))
        .collect(),
    }
  }
}

/// A run as held in the cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedRun {
  pub run_id: String,
  pub status: RunStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub finished_at: Option<DateTime<Utc>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub artifacts: Option<Vec<serde_json::Value>>,
  pub nodes: Vec<Arc<CachedNode>>,
}

impl From<RunRecord> for CachedRun {
  fn from(record: RunRecord) -> Self {
    Self {
      run_id: record.run_id,
      status: record.status,
      started_at: record.started_at,
      finished_at: record.finished_at,
      error: record.error,
      artifacts: record.artifacts,
      nodes: record
        .nodes
        .into_iter()
        .map(|n| Arc::new(n.into()))
        .collect(),
    }
  }
}

/// Outcome of a copy-on-write node replacement.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeReplace {
  NotFound,
  Unchanged,
  Replaced(CachedRun),
}

impl CachedRun {
  /// Minimal run for one first seen through an event rather than a listing.
  pub fn synthesize(run_id: impl Into<String>, status: RunStatus) -> Self {
    Self {
      run_id: run_id.into(),
      status,
      started_at: None,
      finished_at: None,
      error: None,
      artifacts: None,
      nodes: Vec::new(),
    }
  }

  /// Find a node at the root or anywhere in a middleware chain.
  pub fn node(&self, node_id: &str) -> Option<&Arc<CachedNode>> {
    find(&self.nodes, node_id)
  }

  /// Produce a new run with one node replaced.
  ///
  /// `f` returns `None` to signal "no change". Every node off the path to the
  /// replaced one keeps its `Arc`.
  pub fn replace_node<F>(&self, node_id: &str, f: F) -> NodeReplace
  where
    F: FnOnce(&CachedNode) -> Option<CachedNode>,
  {
    let mut f = Some(f);
    match replace_in(&self.nodes, node_id, &mut f) {
      Lookup::Missing => NodeReplace::NotFound,
      Lookup::Same => NodeReplace::Unchanged,
      Lookup::Changed(nodes) => NodeReplace::Replaced(Self {
        nodes,
        ..self.clone()
      }),
    }
  }

  /// Produce a new run with `node` appended at the root.
  pub fn with_root_node(&self, node: CachedNode) -> Self {
    let mut next = self.clone();
    next.nodes.push(Arc::new(node));
    next
  }
}

fn find<'a>(nodes: &'a [Arc<CachedNode>], node_id: &str) -> Option<&'a Arc<CachedNode>> {
  nodes.iter().find_map(|node| {
    if node.node_id == node_id {
      Some(node)
    } else {
      find(&node.middleware, node_id)
    }
  })
}

enum Lookup {
  Missing,
  Same,
  Changed(Vec<Arc<CachedNode>>),
}

fn replace_in<F>(nodes: &[Arc<CachedNode>], node_id: &str, f: &mut Option<F>) -> Lookup
where
  F: FnOnce(&CachedNode) -> Option<CachedNode>,
{
  for (i, node) in nodes.iter().enumerate() {
    let replacement = if node.node_id == node_id {
      match f.take().and_then(|f| f(node)) {
        Some(next) => next,
        None => return Lookup::Same,
      }
    } else {
      match replace_in(&node.middleware, node_id, f) {
        Lookup::Missing => continue,
        Lookup::Same => return Lookup::Same,
        Lookup::Changed(middleware) => CachedNode {
          middleware,
          ..(**node).clone()
        },
      }
    };

    let mut next = nodes.to_vec();
    next[i] = Arc::new(replacement);
    return Lookup::Changed(next);
  }
  Lookup::Missing
}

#[derive(Debug, Default)]
struct RunCacheState {
  runs: HashMap<String, Arc<CachedRun>>,
  revision: u64,
}

/// Shared handle to the run cache.
#[derive(Debug, Clone, Default)]
pub struct RunCache {
  inner: Arc<RwLock<RunCacheState>>,
}

impl RunCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, run_id: &str) -> Option<Arc<CachedRun>> {
    let state = self.inner.read().unwrap_or_else(PoisonError::into_inner);
    state.runs.get(run_id).cloned()
  }

  /// All runs, most recently started first.
  pub fn list(&self) -> Vec<Arc<CachedRun>> {
    let state = self.inner.read().unwrap_or_else(PoisonError::into_inner);
    let mut runs: Vec<_> = state.runs.values().cloned().collect();
    runs.sort_by(|a, b| {
      b.started_at
        .cmp(&a.started_at)
        .then_with(|| a.run_id.cmp(&b.run_id))
    });
    runs
  }

  /// Bumped on every stored mutation.
  pub fn revision(&self) -> u64 {
    self
      .inner
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .revision
  }

  /// Seed the cache from a run listing. Listed runs replace cached ones.
  pub fn load_listing(&self, records: Vec<RunRecord>) -> Result<(), StoreError> {
    let mut state = self
      .inner
      .write()
      .map_err(|_| StoreError::poisoned("run cache"))?;
    for record in records {
      state
        .runs
        .insert(record.run_id.clone(), Arc::new(record.into()));
    }
    state.revision += 1;
    Ok(())
  }

  /// Read-modify-write a single run.
  ///
  /// `f` sees the current run (if any) and returns the replacement, or `None`
  /// to leave the cache untouched. Returns whether anything was stored.
  pub fn modify<F>(&self, run_id: &str, f: F) -> Result<bool, StoreError>
  where
    F: FnOnce(Option<&Arc<CachedRun>>) -> Option<CachedRun>,
  {
    let mut state = self
      .inner
      .write()
      .map_err(|_| StoreError::poisoned("run cache"))?;
    match f(state.runs.get(run_id)) {
      Some(next) => {
        state.runs.insert(run_id.to_string(), Arc::new(next));
        state.revision += 1;
        Ok(true)
      }
      None => Ok(false),
    }
  }
}
