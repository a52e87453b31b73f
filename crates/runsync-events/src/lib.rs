//! Runsync Events
//!
//! Wire types for the run-state event stream. Each frame body is a JSON
//! envelope:
//!
//! ```json
//! {
//!   "type": "node.state",
//!   "occurredAt": "2026-01-01T00:00:00Z",
//!   "scope": { "runId": "r1" },
//!   "data": { "runId": "r1", "nodeId": "n1", "state": { "stage": "running" } }
//! }
//! ```
//!
//! Decoding produces an [`EventEnvelope`] whose payload is the closed
//! [`EventPayload`] sum type, one variant per [`EventKind`]. Consumers match on
//! it exhaustively so that adding a kind is a compile-time change.

mod envelope;
mod error;
mod payload;
mod types;

pub use envelope::{EventEnvelope, EventKind, EventPayload, Scope};
pub use error::EnvelopeError;
pub use payload::{
  DeltaOperation, NodeErrorEvent, NodeResultDeltaEvent, NodeResultSnapshotEvent, NodeStateEvent,
  PackageInfo, PatchKind, PatchOp, ResultDelta, RunSnapshotEvent, RunStatusEvent,
  WorkerHeartbeatEvent, WorkerPackageEvent,
};
pub use types::{NodeResult, NodeRuntimeState, NodeStage, RunNodeRecord, RunRecord, RunStatus};
