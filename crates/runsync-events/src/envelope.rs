use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EnvelopeError;
use crate::payload::{
  NodeErrorEvent, NodeResultDeltaEvent, NodeResultSnapshotEvent, NodeStateEvent, RunSnapshotEvent,
  RunStatusEvent, WorkerHeartbeatEvent, WorkerPackageEvent,
};

/// Every event kind the stream may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
  RunStatus,
  RunSnapshot,
  NodeState,
  NodeResultDelta,
  NodeResultSnapshot,
  NodeError,
  WorkerHeartbeat,
  WorkerPackage,
}

impl EventKind {
  pub const ALL: [EventKind; 8] = [
    EventKind::RunStatus,
    EventKind::RunSnapshot,
    EventKind::NodeState,
    EventKind::NodeResultDelta,
    EventKind::NodeResultSnapshot,
    EventKind::NodeError,
    EventKind::WorkerHeartbeat,
    EventKind::WorkerPackage,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::RunStatus => "run.status",
      Self::RunSnapshot => "run.snapshot",
      Self::NodeState => "node.state",
      Self::NodeResultDelta => "node.result.delta",
      Self::NodeResultSnapshot => "node.result.snapshot",
      Self::NodeError => "node.error",
      Self::WorkerHeartbeat => "worker.heartbeat",
      Self::WorkerPackage => "worker.package",
    }
  }
}

impl FromStr for EventKind {
  type Err = EnvelopeError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::ALL
      .into_iter()
      .find(|kind| kind.as_str() == s)
      .ok_or_else(|| EnvelopeError::UnknownKind(s.to_string()))
  }
}

impl fmt::Display for EventKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub run_id: Option<String>,
}

/// Decoded payload, one variant per [`EventKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
  RunStatus(RunStatusEvent),
  RunSnapshot(RunSnapshotEvent),
  NodeState(NodeStateEvent),
  NodeResultDelta(NodeResultDeltaEvent),
  NodeResultSnapshot(NodeResultSnapshotEvent),
  NodeError(NodeErrorEvent),
  WorkerHeartbeat(WorkerHeartbeatEvent),
  WorkerPackage(WorkerPackageEvent),
}

impl EventPayload {
  pub fn kind(&self) -> EventKind {
    match self {
      Self::RunStatus(_) => EventKind::RunStatus,
      Self::RunSnapshot(_) => EventKind::RunSnapshot,
      Self::NodeState(_) => EventKind::NodeState,
      Self::NodeResultDelta(_) => EventKind::NodeResultDelta,
      Self::NodeResultSnapshot(_) => EventKind::NodeResultSnapshot,
      Self::NodeError(_) => EventKind::NodeError,
      Self::WorkerHeartbeat(_) => EventKind::WorkerHeartbeat,
      Self::WorkerPackage(_) => EventKind::WorkerPackage,
    }
  }

  fn decode(kind: EventKind, data: serde_json::Value) -> Result<Self, EnvelopeError> {
    fn parse<T: serde::de::DeserializeOwned>(
      kind: EventKind,
      data: serde_json::Value,
    ) -> Result<T, EnvelopeError> {
      serde_json::from_value(data).map_err(|source| EnvelopeError::InvalidPayload {
        kind: kind.as_str(),
        source,
      })
    }

    Ok(match kind {
      EventKind::RunStatus => Self::RunStatus(parse(kind, data)?),
      EventKind::RunSnapshot => Self::RunSnapshot(parse(kind, data)?),
      EventKind::NodeState => Self::NodeState(parse(kind, data)?),
      EventKind::NodeResultDelta => Self::NodeResultDelta(parse(kind, data)?),
      EventKind::NodeResultSnapshot => Self::NodeResultSnapshot(parse(kind, data)?),
      EventKind::NodeError => Self::NodeError(parse(kind, data)?),
      EventKind::WorkerHeartbeat => Self::WorkerHeartbeat(parse(kind, data)?),
      EventKind::WorkerPackage => Self::WorkerPackage(parse(kind, data)?),
    })
  }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
  #[serde(rename = "type", default)]
  kind: Option<String>,
  occurred_at: DateTime<Utc>,
  #[serde(default)]
  scope: Scope,
  #[serde(default)]
  data: serde_json::Value,
}

/// A decoded stream event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
  pub occurred_at: DateTime<Utc>,
  pub scope: Scope,
  pub payload: EventPayload,
}

impl EventEnvelope {
  /// Decode a frame body.
  ///
  /// `label` is the frame's `event:` field. It takes precedence over the body's
  /// `type` unless it is absent or the generic `message`.
  pub fn decode(label: Option<&str>, body: &str) -> Result<Self, EnvelopeError> {
    let raw: RawEnvelope = serde_json::from_str(body)?;

    let kind_text = match label {
      Some(label) if !label.is_empty() && label != "message" => label,
      _ => raw.kind.as_deref().ok_or(EnvelopeError::MissingKind)?,
    };
    let kind = kind_text.parse::<EventKind>()?;
    let payload = EventPayload::decode(kind, raw.data)?;

    Ok(Self {
      occurred_at: raw.occurred_at,
      scope: raw.scope,
      payload,
    })
  }

  pub fn kind(&self) -> EventKind {
    self.payload.kind()
  }

  /// Run the event is about, from the payload or else the envelope scope.
  pub fn run_id(&self) -> Option<&str> {
    let from_payload = match &self.payload {
      EventPayload::RunStatus(e) => Some(e.run_id.as_str()),
      EventPayload::RunSnapshot(e) => Some(e.run.run_id.as_str()),
      EventPayload::NodeState(e) => Some(e.run_id.as_str()),
      EventPayload::NodeResultDelta(e) => Some(e.run_id.as_str()),
      EventPayload::NodeResultSnapshot(e) => Some(e.run_id.as_str()),
      EventPayload::NodeError(e) => Some(e.run_id.as_str()),
      EventPayload::WorkerHeartbeat(_) | EventPayload::WorkerPackage(_) => None,
    };
    from_payload.or(self.scope.run_id.as_deref())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{NodeStage, RunStatus};
  use serde_json::json;

  fn body(kind: &str, data: serde_json::Value) -> String {
    json!({
      "type": kind,
      "occurredAt": "2026-03-01T12:00:00Z",
      "scope": { "runId": "r1" },
      "data": data,
    })
    .to_string()
  }

  #[test]
  fn test_kind_round_trips_through_text() {
    for kind in EventKind::ALL {
      assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
    }
  }

  #[test]
  fn test_decode_run_status() {
    let envelope = EventEnvelope::decode(
      None,
      &body("run.status", json!({ "runId": "r1", "status": "running" })),
    )
    .unwrap();

    assert_eq!(envelope.kind(), EventKind::RunStatus);
    assert_eq!(envelope.run_id(), Some("r1"));
    match envelope.payload {
      EventPayload::RunStatus(event) => assert_eq!(event.status, RunStatus::Running),
      other => panic!("unexpected payload {:?}", other),
    }
  }

  #[test]
  fn test_label_takes_precedence_over_body_type() {
    let envelope = EventEnvelope::decode(
      Some("node.state"),
      &body(
        "something.else",
        json!({ "runId": "r1", "nodeId": "n1", "state": { "stage": "running" } }),
      ),
    )
    .unwrap();

    match envelope.payload {
      EventPayload::NodeState(event) => assert_eq!(event.state.stage, NodeStage::Running),
      other => panic!("unexpected payload {:?}", other),
    }
  }

  #[test]
  fn test_generic_message_label_falls_back_to_body() {
    let envelope = EventEnvelope::decode(
      Some("message"),
      &body("node.error", json!({ "runId": "r1", "nodeId": "n1", "error": "x" })),
    )
    .unwrap();
    assert_eq!(envelope.kind(), EventKind::NodeError);
  }

  #[test]
  fn test_unknown_kind_rejected() {
    let err = EventEnvelope::decode(None, &body("run.deleted", json!({}))).unwrap_err();
    assert!(matches!(err, EnvelopeError::UnknownKind(kind) if kind == "run.deleted"));
  }

  #[test]
  fn test_missing_kind_rejected() {
    let err = EventEnvelope::decode(None, r#"{"occurredAt":"2026-03-01T12:00:00Z","data":{}}"#)
      .unwrap_err();
    assert!(matches!(err, EnvelopeError::MissingKind));
  }

  #[test]
  fn test_malformed_json_rejected() {
    let err = EventEnvelope::decode(Some("run.status"), "{not json").unwrap_err();
    assert!(matches!(err, EnvelopeError::Json(_)));
  }

  #[test]
  fn test_invalid_payload_names_kind() {
    let err = EventEnvelope::decode(None, &body("run.status", json!({ "runId": "r1" })))
      .unwrap_err();
    assert!(matches!(
      err,
      EnvelopeError::InvalidPayload {
        kind: "run.status",
        ..
      }
    ));
  }

  #[test]
  fn test_worker_events_fall_back_to_scope_run() {
    let envelope = EventEnvelope::decode(
      None,
      &body(
        "worker.heartbeat",
        json!({ "workerName": "w1", "at": "2026-03-01T12:00:00Z" }),
      ),
    )
    .unwrap();
    assert_eq!(envelope.run_id(), Some("r1"));
  }
}
