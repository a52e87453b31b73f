use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
  Queued,
  Running,
  Succeeded,
  Failed,
  Cancelled,
}

impl RunStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Queued => "queued",
      Self::Running => "running",
      Self::Succeeded => "succeeded",
      Self::Failed => "failed",
      Self::Cancelled => "cancelled",
    }
  }
}

impl fmt::Display for RunStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Stage reported for a node.
///
/// Workers may report stages outside the standard lifecycle (e.g. "retrying").
/// Those are kept verbatim in [`NodeStage::Other`] and rank below every known
/// stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeStage {
  Queued,
  Running,
  Succeeded,
  Failed,
  Cancelled,
  Other(String),
}

impl NodeStage {
  /// Total order used by the staleness filter.
  pub fn priority(&self) -> u8 {
    match self {
      Self::Other(_) => 0,
      Self::Queued => 1,
      Self::Running => 2,
      Self::Succeeded => 3,
      Self::Failed | Self::Cancelled => 4,
    }
  }

  pub fn as_str(&self) -> &str {
    match self {
      Self::Queued => "queued",
      Self::Running => "running",
      Self::Succeeded => "succeeded",
      Self::Failed => "failed",
      Self::Cancelled => "cancelled",
      Self::Other(stage) => stage,
    }
  }
}

impl From<String> for NodeStage {
  fn from(stage: String) -> Self {
    match stage.as_str() {
      "queued" => Self::Queued,
      "running" => Self::Running,
      "succeeded" => Self::Succeeded,
      "failed" => Self::Failed,
      "cancelled" => Self::Cancelled,
      _ => Self::Other(stage),
    }
  }
}

impl From<&str> for NodeStage {
  fn from(stage: &str) -> Self {
    Self::from(stage.to_string())
  }
}

impl From<NodeStage> for String {
  fn from(stage: NodeStage) -> Self {
    match stage {
      NodeStage::Other(stage) => stage,
      known => known.as_str().to_string(),
    }
  }
}

impl fmt::Display for NodeStage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Runtime state of a single node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRuntimeState {
  pub stage: NodeStage,
  /// Fraction complete, in `[0, 1]`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub progress: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_updated_at: Option<DateTime<Utc>>,
}

impl NodeRuntimeState {
  pub fn new(stage: NodeStage) -> Self {
    Self {
      stage,
      progress: None,
      message: None,
      error: None,
      last_updated_at: None,
    }
  }

  /// Clamp progress into `[0, 1]`, dropping non-finite values.
  pub fn normalized(mut self) -> Self {
    self.progress = self
      .progress
      .filter(|p| p.is_finite())
      .map(|p| p.clamp(0.0, 1.0));
    self
  }
}

/// Result document produced by a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResult {
  pub content: serde_json::Value,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub artifacts: Option<Vec<serde_json::Value>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub summary: Option<String>,
}

impl NodeResult {
  pub fn from_content(content: serde_json::Value) -> Self {
    Self {
      content,
      artifacts: None,
      summary: None,
    }
  }
}

/// A node as it appears inside a run record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunNodeRecord {
  pub node_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub state: Option<NodeRuntimeState>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub result: Option<NodeResult>,
  /// Middleware nodes chained around this node.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub middleware: Vec<RunNodeRecord>,
}

/// Full shape of a run as delivered by listings and `run.snapshot`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
  pub run_id: String,
  pub status: RunStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub finished_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub artifacts: Option<Vec<serde_json::Value>>,
  #[serde(default)]
  pub nodes: Vec<RunNodeRecord>,
}
