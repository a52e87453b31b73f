//! Per-kind payload bodies carried in the envelope's `data` field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{NodeRuntimeState, RunNodeRecord, RunRecord, RunStatus};

/// `run.status`: a run-level status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatusEvent {
  pub run_id: String,
  pub status: RunStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub finished_at: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reason: Option<String>,
}

/// `run.snapshot`: full replacement of a run's visible state.
///
/// When `nodes` is present it supersedes `run.nodes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSnapshotEvent {
  pub run: RunRecord,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub nodes: Option<Vec<RunNodeRecord>>,
}

impl RunSnapshotEvent {
  /// The run record with the top-level node list folded in.
  pub fn into_record(self) -> RunRecord {
    let mut run = self.run;
    if let Some(nodes) = self.nodes {
      run.nodes = nodes;
    }
    run
  }
}

/// `node.state`: per-node runtime state update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStateEvent {
  pub run_id: String,
  pub node_id: String,
  pub state: NodeRuntimeState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaOperation {
  Replace,
  Append,
  Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchKind {
  Add,
  Replace,
  Remove,
}

/// One JSON-Patch style operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOp {
  pub op: PatchKind,
  pub path: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub value: Option<serde_json::Value>,
}

/// An incremental instruction against a node's result document.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultDelta {
  /// Single operation addressed by a JSON Pointer.
  Pointer {
    operation: DeltaOperation,
    path: String,
    value: Option<serde_json::Value>,
  },
  /// Ordered list of patch operations.
  Patch { patches: Vec<PatchOp> },
}

/// `node.result.delta`: incremental update of a node's result document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawResultDelta")]
pub struct NodeResultDeltaEvent {
  pub run_id: String,
  pub node_id: String,
  pub delta: ResultDelta,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResultDelta {
  run_id: String,
  node_id: String,
  operation: String,
  #[serde(default)]
  path: Option<String>,
  #[serde(default)]
  payload: Option<serde_json::Value>,
  #[serde(default)]
  patches: Option<Vec<PatchOp>>,
}

impl TryFrom<RawResultDelta> for NodeResultDeltaEvent {
  type Error = String;

  fn try_from(raw: RawResultDelta) -> Result<Self, Self::Error> {
    let pointer = |operation| ResultDelta::Pointer {
      operation,
      path: raw.path.clone().unwrap_or_default(),
      value: raw.payload.clone().map(unwrap_payload_value),
    };

    let delta = match raw.operation.as_str() {
      "replace" => pointer(DeltaOperation::Replace),
      "append" => pointer(DeltaOperation::Append),
      "remove" => pointer(DeltaOperation::Remove),
      "patch" => ResultDelta::Patch {
        patches: raw
          .patches
          .clone()
          .ok_or_else(|| "patch operation requires 'patches'".to_string())?,
      },
      other => return Err(format!("unknown delta operation '{}'", other)),
    };

    Ok(Self {
      run_id: raw.run_id,
      node_id: raw.node_id,
      delta,
    })
  }
}

/// Payloads arrive as `{ "value": X }`. Anything else, including an object
/// with keys besides `value`, is taken as the value itself.
fn unwrap_payload_value(payload: serde_json::Value) -> serde_json::Value {
  match payload {
    serde_json::Value::Object(mut map) if map.len() == 1 && map.contains_key("value") => {
      map.remove("value").unwrap_or(serde_json::Value::Null)
    }
    other => other,
  }
}

/// `node.result.snapshot`: full replacement of a node's result document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResultSnapshotEvent {
  pub run_id: String,
  pub node_id: String,
  pub content: serde_json::Value,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub artifacts: Option<Vec<serde_json::Value>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub summary: Option<String>,
}

/// `node.error`: terminal failure reported for a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeErrorEvent {
  pub run_id: String,
  pub node_id: String,
  #[serde(deserialize_with = "error_message")]
  pub error: String,
}

/// Accept `"text"`, `{ "message": "text" }`, or any other JSON (stringified).
fn error_message<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  let value = serde_json::Value::deserialize(deserializer)?;
  Ok(match value {
    serde_json::Value::String(message) => message,
    serde_json::Value::Object(ref map) => match map.get("message") {
      Some(serde_json::Value::String(message)) => message.clone(),
      _ => value.to_string(),
    },
    other => other.to_string(),
  })
}

/// `worker.heartbeat`: fleet telemetry from a worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerHeartbeatEvent {
  pub worker_name: String,
  pub at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub queues: Option<Vec<String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub connected: Option<bool>,
  /// Remaining telemetry fields, kept for display.
  #[serde(flatten)]
  pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageInfo {
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,
}

/// `worker.package`: the set of packages a worker has loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPackageEvent {
  pub worker_name: String,
  #[serde(default)]
  pub packages: Vec<PackageInfo>,
  #[serde(flatten)]
  pub extra: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_pointer_delta_unwraps_value() {
    let event: NodeResultDeltaEvent = serde_json::from_value(json!({
      "runId": "r1",
      "nodeId": "n1",
      "operation": "replace",
      "path": "/a/b",
      "payload": { "value": 5 }
    }))
    .unwrap();

    assert_eq!(
      event.delta,
      ResultDelta::Pointer {
        operation: DeltaOperation::Replace,
        path: "/a/b".to_string(),
        value: Some(json!(5)),
      }
    );
  }

  #[test]
  fn test_object_payload_with_other_keys_is_kept_whole() {
    let event: NodeResultDeltaEvent = serde_json::from_value(json!({
      "runId": "r1",
      "nodeId": "n1",
      "operation": "append",
      "path": "/rows",
      "payload": { "value": 5, "unit": "ms" }
    }))
    .unwrap();

    let ResultDelta::Pointer { value, .. } = event.delta else {
      panic!("expected a pointer delta");
    };
    assert_eq!(value, Some(json!({ "value": 5, "unit": "ms" })));
  }

  #[test]
  fn test_patch_delta_requires_patches() {
    let err = serde_json::from_value::<NodeResultDeltaEvent>(json!({
      "runId": "r1",
      "nodeId": "n1",
      "operation": "patch"
    }))
    .unwrap_err();
    assert!(err.to_string().contains("patches"));

    let ok: NodeResultDeltaEvent = serde_json::from_value(json!({
      "runId": "r1",
      "nodeId": "n1",
      "operation": "patch",
      "patches": [{ "op": "add", "path": "/x", "value": 1 }, { "op": "remove", "path": "/y" }]
    }))
    .unwrap();
    match ok.delta {
      ResultDelta::Patch { patches } => {
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[1].op, PatchKind::Remove);
        assert_eq!(patches[1].value, None);
      }
      other => panic!("expected patch delta, got {:?}", other),
    }
  }

  #[test]
  fn test_unknown_delta_operation() {
    let err = serde_json::from_value::<NodeResultDeltaEvent>(json!({
      "runId": "r1",
      "nodeId": "n1",
      "operation": "merge",
      "path": "/a"
    }))
    .unwrap_err();
    assert!(err.to_string().contains("merge"));
  }

  #[test]
  fn test_node_error_accepts_object() {
    let event: NodeErrorEvent = serde_json::from_value(json!({
      "runId": "r1",
      "nodeId": "n1",
      "error": { "message": "boom", "code": 7 }
    }))
    .unwrap();
    assert_eq!(event.error, "boom");

    let event: NodeErrorEvent = serde_json::from_value(json!({
      "runId": "r1",
      "nodeId": "n1",
      "error": "plain"
    }))
    .unwrap();
    assert_eq!(event.error, "plain");
  }

  #[test]
  fn test_snapshot_nodes_override_run_nodes() {
    let snapshot: RunSnapshotEvent = serde_json::from_value(json!({
      "run": { "runId": "r1", "status": "running", "nodes": [{ "nodeId": "old" }] },
      "nodes": [{ "nodeId": "new" }]
    }))
    .unwrap();

    let record = snapshot.into_record();
    assert_eq!(record.nodes.len(), 1);
    assert_eq!(record.nodes[0].node_id, "new");
  }

  #[test]
  fn test_heartbeat_keeps_extra_fields() {
    let event: WorkerHeartbeatEvent = serde_json::from_value(json!({
      "workerName": "w1",
      "at": "2026-01-01T00:00:00Z",
      "queues": ["default"],
      "connected": true,
      "load": 0.25
    }))
    .unwrap();

    assert_eq!(event.worker_name, "w1");
    assert_eq!(event.extra.get("load"), Some(&json!(0.25)));
  }
}
