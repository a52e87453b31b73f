//! End-to-end tests of the event pipeline on a detached engine: raw frames in,
//! run cache and editor store out.

use std::sync::Arc;

use runsync_engine::{
  ChannelNotifier, ProjectionChange, ProjectionUpdate, ProjectionWriter, SyncEngine,
};
use runsync_events::{NodeStage, RunRecord, RunStatus};
use runsync_store::{RunCache, StoreError};
use runsync_transport::SseFrame;
use runsync_workflow::{Node, Workflow};
use serde_json::{Value, json};
use tokio::sync::mpsc;

const T0: &str = "2026-03-01T10:00:00Z";
const T1: &str = "2026-03-01T10:00:01Z";
const T2: &str = "2026-03-01T10:00:02Z";
const T3: &str = "2026-03-01T10:00:03Z";
const T4: &str = "2026-03-01T10:00:04Z";
const T5: &str = "2026-03-01T10:00:05Z";

fn frame(kind: &str, occurred_at: &str, data: Value) -> SseFrame {
  SseFrame {
    event: Some(kind.to_string()),
    data: json!({
      "type": kind,
      "occurredAt": occurred_at,
      "scope": { "runId": data.get("runId").cloned().unwrap_or(Value::Null) },
      "data": data,
    })
    .to_string(),
    id: None,
  }
}

fn run_status(occurred_at: &str, status: &str) -> SseFrame {
  frame(
    "run.status",
    occurred_at,
    json!({ "runId": "r1", "status": status }),
  )
}

fn node_state(occurred_at: &str, node_id: &str, stage: &str, progress: f64) -> SseFrame {
  frame(
    "node.state",
    occurred_at,
    json!({
      "runId": "r1",
      "nodeId": node_id,
      "state": { "stage": stage, "progress": progress, "lastUpdatedAt": occurred_at }
    }),
  )
}

fn delta(occurred_at: &str, node_id: &str, operation: &str, path: &str, value: Value) -> SseFrame {
  frame(
    "node.result.delta",
    occurred_at,
    json!({
      "runId": "r1",
      "nodeId": node_id,
      "operation": operation,
      "path": path,
      "payload": { "value": value }
    }),
  )
}

fn started_engine() -> Arc<SyncEngine> {
  let engine = SyncEngine::builder().build();
  engine.start().unwrap();
  engine
}

fn workflow() -> Workflow {
  Workflow {
    workflow_id: "wf-nightly".to_string(),
    name: "Nightly ETL".to_string(),
    nodes: vec![
      Node::task("n1"),
      Node::task("host").with_middleware(vec![Node::task("auth")]),
      Node::subgraph("batch", vec![Node::task("transform")]),
    ],
    edges: vec![],
  }
}

#[test]
fn test_in_order_run_lifecycle() {
  let engine = started_engine();

  for frame in [
    run_status(T0, "running"),
    node_state(T1, "n1", "running", 0.5),
    delta(T2, "n1", "replace", "/count", json!(3)),
    node_state(T3, "n1", "succeeded", 1.0),
    run_status(T4, "succeeded"),
  ] {
    engine.ingest_frame(&frame);
  }

  let run = engine.runs().get("r1").unwrap();
  assert_eq!(run.status, RunStatus::Succeeded);

  let node = run.node("n1").unwrap();
  let state = node.state.as_ref().unwrap();
  assert_eq!(state.stage, NodeStage::Succeeded);
  assert_eq!(state.progress, Some(1.0));
  assert_eq!(node.result.as_ref().unwrap().content, json!({ "count": 3 }));
}

#[test]
fn test_duplicate_node_state_is_reference_stable() {
  let engine = started_engine();
  engine.ingest_frame(&node_state(T1, "n1", "running", 0.5));
  engine.ingest_frame(&node_state(T3, "n1", "succeeded", 1.0));

  let before = engine.runs().get("r1").unwrap();
  let revision = engine.runs().revision();

  engine.ingest_frame(&node_state(T3, "n1", "succeeded", 1.0));

  let after = engine.runs().get("r1").unwrap();
  assert!(Arc::ptr_eq(&before, &after));
  assert_eq!(engine.runs().revision(), revision);
}

#[test]
fn test_stale_events_do_not_regress() {
  let engine = started_engine();
  engine.ingest_frame(&run_status(T2, "running"));
  engine.ingest_frame(&node_state(T3, "n1", "succeeded", 1.0));

  // Both arrive late.
  engine.ingest_frame(&run_status(T1, "queued"));
  engine.ingest_frame(&node_state(T1, "n1", "running", 0.2));

  let run = engine.runs().get("r1").unwrap();
  assert_eq!(run.status, RunStatus::Running);
  assert_eq!(
    run.node("n1").unwrap().state.as_ref().unwrap().stage,
    NodeStage::Succeeded
  );
  assert_eq!(engine.watermark("r1"), Some(T2.parse().unwrap()));
}

#[test]
fn test_newer_node_state_overrides_terminal_stage() {
  let engine = started_engine();
  engine.ingest_frame(&node_state(T3, "n1", "succeeded", 1.0));
  engine.ingest_frame(&node_state(T4, "n1", "running", 0.1));

  let state = engine.node_state("r1", "n1").unwrap();
  assert_eq!(state.stage, NodeStage::Running);
}

#[test]
fn test_run_restart_needs_newer_queued_event() {
  let engine = started_engine();
  engine.ingest_frame(&run_status(T1, "running"));
  engine.ingest_frame(&run_status(T2, "failed"));

  engine.ingest_frame(&run_status(T3, "running"));
  assert_eq!(engine.runs().get("r1").unwrap().status, RunStatus::Failed);

  engine.ingest_frame(&run_status(T4, "queued"));
  engine.ingest_frame(&run_status(T5, "running"));
  assert_eq!(engine.runs().get("r1").unwrap().status, RunStatus::Running);
}

#[test]
fn test_restart_drops_previous_attempt() {
  let engine = started_engine();
  engine
    .open_workflow(workflow(), Some("r1".to_string()))
    .unwrap();
  engine.ingest_frame(&run_status(T1, "running"));
  engine.ingest_frame(&node_state(T2, "n1", "running", 0.5));
  engine.ingest_frame(&frame(
    "run.status",
    T3,
    json!({ "runId": "r1", "status": "failed", "finishedAt": T3, "reason": "worker lost" }),
  ));
  assert_eq!(
    engine.runs().get("r1").unwrap().error.as_deref(),
    Some("worker lost")
  );

  engine.ingest_frame(&run_status(T4, "queued"));

  let run = engine.runs().get("r1").unwrap();
  assert_eq!(run.status, RunStatus::Queued);
  assert_eq!(run.error, None);
  assert_eq!(run.finished_at, None);
  assert!(run.nodes.is_empty());
  assert!(engine.node_state("r1", "n1").is_none());
  assert_eq!(engine.editor().node("n1").unwrap().runtime.stage, None);

  // A late node event from the failed attempt stays out.
  engine.ingest_frame(&node_state(T3, "n1", "succeeded", 1.0));
  assert!(engine.runs().get("r1").unwrap().nodes.is_empty());

  engine.ingest_frame(&node_state(T5, "n1", "running", 0.1));
  assert_eq!(
    engine.node_state("r1", "n1").unwrap().stage,
    NodeStage::Running
  );
}

#[test]
fn test_older_snapshot_keeps_newer_node_states() {
  let engine = started_engine();
  engine
    .open_workflow(workflow(), Some("r1".to_string()))
    .unwrap();
  engine.ingest_frame(&run_status(T1, "running"));
  engine.ingest_frame(&node_state(T5, "n1", "succeeded", 1.0));
  engine.ingest_frame(&node_state(T5, "transform", "running", 0.3));

  // Newer than the run watermark, older than both node states.
  engine.ingest_frame(&frame(
    "run.snapshot",
    T2,
    json!({
      "run": {
        "runId": "r1",
        "status": "running",
        "nodes": [
          { "nodeId": "n1", "state": { "stage": "running", "progress": 0.2, "lastUpdatedAt": T2 } },
          { "nodeId": "host", "state": { "stage": "queued" } }
        ]
      }
    }),
  ));

  let run = engine.runs().get("r1").unwrap();
  let n1 = run.node("n1").unwrap().state.clone().unwrap();
  assert_eq!(n1.stage, NodeStage::Succeeded);
  assert_eq!(n1.progress, Some(1.0));
  assert_eq!(
    run.node("transform").unwrap().state.as_ref().unwrap().stage,
    NodeStage::Running
  );
  assert_eq!(
    run.node("host").unwrap().state.as_ref().unwrap().stage,
    NodeStage::Queued
  );
  assert_eq!(
    engine.node_state("r1", "n1").unwrap().stage,
    NodeStage::Succeeded
  );
  assert_eq!(
    engine.editor().node("n1").unwrap().runtime.stage,
    Some(NodeStage::Succeeded)
  );

  // A later snapshot wins as usual.
  engine.ingest_frame(&frame(
    "run.snapshot",
    "2026-03-01T10:00:09Z",
    json!({
      "run": {
        "runId": "r1",
        "status": "running",
        "nodes": [{ "nodeId": "n1", "state": { "stage": "running", "progress": 0.0 } }]
      }
    }),
  ));
  assert_eq!(
    engine.node_state("r1", "n1").unwrap().stage,
    NodeStage::Running
  );
  assert!(engine.runs().get("r1").unwrap().node("transform").is_none());
}

#[test]
fn test_middleware_delta_leaves_host_untouched() {
  let engine = started_engine();
  engine.open_workflow(workflow(), None).unwrap();
  engine.ingest_frame(&frame(
    "run.snapshot",
    T0,
    json!({
      "run": {
        "runId": "r1",
        "status": "running",
        "nodes": [{
          "nodeId": "host",
          "result": { "content": { "rows": 10 } },
          "middleware": [{ "nodeId": "auth" }]
        }]
      }
    }),
  ));

  engine.ingest_frame(&delta(T1, "auth", "replace", "/token", json!("refreshed")));

  let run = engine.runs().get("r1").unwrap();
  let host = run.node("host").unwrap();
  assert_eq!(host.result.as_ref().unwrap().content, json!({ "rows": 10 }));
  assert_eq!(
    host.middleware[0].result.as_ref().unwrap().content,
    json!({ "token": "refreshed" })
  );

  let editor_host = engine.editor().node("host").unwrap();
  let editor_auth = engine.editor().node("auth").unwrap();
  assert_eq!(editor_host.runtime.result, Some(json!({ "rows": 10 })));
  assert_eq!(editor_auth.runtime.result, Some(json!({ "token": "refreshed" })));
}

#[test]
fn test_node_error_overrides_stage() {
  let engine = started_engine();
  engine.ingest_frame(&node_state(T3, "n1", "succeeded", 1.0));

  // Older than the current state, but errors are never filtered.
  engine.ingest_frame(&frame(
    "node.error",
    T1,
    json!({ "runId": "r1", "nodeId": "n1", "error": { "message": "disk full" } }),
  ));

  let run = engine.runs().get("r1").unwrap();
  let state = run.node("n1").unwrap().state.clone().unwrap();
  assert_eq!(state.stage, NodeStage::Failed);
  assert_eq!(state.error.as_deref(), Some("disk full"));
  assert_eq!(state.progress, Some(1.0));
}

#[test]
fn test_replayed_state_does_not_clear_reported_failure() {
  let engine = started_engine();
  engine.ingest_frame(&node_state(T3, "n1", "succeeded", 1.0));
  engine.ingest_frame(&frame(
    "node.error",
    T1,
    json!({ "runId": "r1", "nodeId": "n1", "error": { "message": "disk full" } }),
  ));

  // Same timestamp as the failed state, different stage.
  engine.ingest_frame(&node_state(T3, "n1", "succeeded", 1.0));

  let state = engine.node_state("r1", "n1").unwrap();
  assert_eq!(state.stage, NodeStage::Failed);
  assert_eq!(state.error.as_deref(), Some("disk full"));
  let cached = engine.runs().get("r1").unwrap();
  assert_eq!(
    cached.node("n1").unwrap().state.as_ref().unwrap().stage,
    NodeStage::Failed
  );

  engine.ingest_frame(&node_state(T4, "n1", "running", 0.1));
  assert_eq!(
    engine.node_state("r1", "n1").unwrap().stage,
    NodeStage::Running
  );
}

#[test]
fn test_result_snapshot_is_idempotent() {
  let engine = started_engine();
  let snapshot = frame(
    "node.result.snapshot",
    T1,
    json!({
      "runId": "r1",
      "nodeId": "n1",
      "content": { "rows": [1, 2] },
      "summary": "2 rows"
    }),
  );

  engine.ingest_frame(&snapshot);
  let revision = engine.runs().revision();
  engine.ingest_frame(&snapshot);

  assert_eq!(engine.runs().revision(), revision);
  let result = engine.node_result("r1", "n1").unwrap();
  assert_eq!(result.content, json!({ "rows": [1, 2] }));
  assert_eq!(result.summary.as_deref(), Some("2 rows"));
}

#[test]
fn test_delta_after_snapshot_keeps_summary() {
  let engine = started_engine();
  engine.ingest_frame(&frame(
    "node.result.snapshot",
    T1,
    json!({ "runId": "r1", "nodeId": "n1", "content": { "items": [1] }, "summary": "one" }),
  ));
  engine.ingest_frame(&delta(T2, "n1", "append", "/items", json!(2)));

  let result = engine.node_result("r1", "n1").unwrap();
  assert_eq!(result.content, json!({ "items": [1, 2] }));
  assert_eq!(result.summary.as_deref(), Some("one"));
}

#[test]
fn test_patch_delta_through_pipeline() {
  let engine = started_engine();
  engine.ingest_frame(&delta(T1, "n1", "replace", "/y", json!(0)));
  engine.ingest_frame(&frame(
    "node.result.delta",
    T2,
    json!({
      "runId": "r1",
      "nodeId": "n1",
      "operation": "patch",
      "patches": [
        { "op": "add", "path": "/x", "value": 1 },
        { "op": "remove", "path": "/y" }
      ]
    }),
  ));

  assert_eq!(
    engine.node_result("r1", "n1").unwrap().content,
    json!({ "x": 1 })
  );
}

#[test]
fn test_editor_updates_reach_subgraph_nodes() {
  let engine = started_engine();
  engine
    .open_workflow(workflow(), Some("r1".to_string()))
    .unwrap();

  engine.ingest_frame(&node_state(T1, "transform", "running", 0.4));
  engine.ingest_frame(&node_state(T1, "missing", "running", 0.4));

  let node = engine.editor().node("transform").unwrap();
  assert_eq!(node.runtime.stage, Some(NodeStage::Running));
  assert_eq!(node.runtime.progress, Some(0.4));
  // The run cache still records nodes the editor does not know.
  assert!(engine.runs().get("r1").unwrap().node("missing").is_some());
}

#[test]
fn test_editor_bound_to_other_run_is_untouched() {
  let engine = started_engine();
  engine
    .open_workflow(workflow(), Some("r2".to_string()))
    .unwrap();

  engine.ingest_frame(&node_state(T1, "n1", "running", 0.4));

  assert_eq!(engine.editor().node("n1").unwrap().runtime.stage, None);
  assert!(engine.runs().get("r1").is_some());
}

#[test]
fn test_open_workflow_hydrates_bound_run() {
  let engine = started_engine();
  engine.ingest_frame(&node_state(T1, "n1", "running", 0.7));
  engine.ingest_frame(&delta(T2, "n1", "replace", "/done", json!(7)));

  engine
    .open_workflow(workflow(), Some("r1".to_string()))
    .unwrap();

  let runtime = engine.editor().node("n1").unwrap().runtime;
  assert_eq!(runtime.stage, Some(NodeStage::Running));
  assert_eq!(runtime.result, Some(json!({ "done": 7 })));
}

#[test]
fn test_malformed_frames_do_not_stop_the_stream() {
  let engine = started_engine();
  engine.ingest_frame(&SseFrame {
    event: Some("node.state".to_string()),
    data: "{ truncated".to_string(),
    id: None,
  });
  engine.ingest_frame(&frame("run.archived", T0, json!({ "runId": "r1" })));
  engine.ingest_frame(&run_status(T1, "running"));

  assert_eq!(engine.runs().get("r1").unwrap().status, RunStatus::Running);
}

#[test]
fn test_frames_before_start_are_ignored() {
  let engine = SyncEngine::builder().build();
  engine.ingest_frame(&run_status(T1, "running"));
  assert!(engine.runs().get("r1").is_none());

  engine.start().unwrap();
  engine.ingest_frame(&run_status(T1, "running"));
  assert!(engine.runs().get("r1").is_some());

  engine.stop();
  engine.ingest_frame(&run_status(T2, "succeeded"));
  assert_eq!(engine.runs().get("r1").unwrap().status, RunStatus::Running);
}

#[test]
fn test_reset_clears_watermarks() {
  let engine = started_engine();
  engine.ingest_frame(&run_status(T3, "running"));
  engine.reset().unwrap();

  engine.ingest_frame(&run_status(T1, "queued"));
  assert_eq!(engine.runs().get("r1").unwrap().status, RunStatus::Queued);
  assert_eq!(engine.watermark("r1"), Some(T1.parse().unwrap()));
}

#[test]
fn test_listing_seeds_terminal_guard() {
  let engine = started_engine();
  let listing: Vec<RunRecord> = serde_json::from_value(json!([
    { "runId": "r1", "status": "succeeded", "startedAt": T0 }
  ]))
  .unwrap();
  engine.load_listing(listing).unwrap();

  engine.ingest_frame(&run_status(T1, "running"));

  let run = engine.runs().get("r1").unwrap();
  assert_eq!(run.status, RunStatus::Succeeded);
  assert_eq!(run.started_at, Some(T0.parse().unwrap()));
}

#[test]
fn test_worker_events_update_fleet() {
  let (tx, mut rx) = mpsc::unbounded_channel();
  let engine = SyncEngine::builder()
    .notifier(Arc::new(ChannelNotifier::new(tx)))
    .build();
  engine.start().unwrap();

  engine.ingest_frame(&frame(
    "worker.heartbeat",
    T1,
    json!({ "workerName": "w-1", "at": T1, "queues": ["etl"], "connected": true }),
  ));
  engine.ingest_frame(&frame(
    "worker.package",
    T1,
    json!({ "workerName": "w-1", "packages": [{ "name": "etl-pack", "version": "2.0.0" }] }),
  ));

  let worker = engine.fleet().get("w-1").unwrap();
  assert_eq!(worker.queues, vec!["etl".to_string()]);
  assert_eq!(worker.packages[0].name, "etl-pack");

  let expected = ProjectionChange::Worker {
    worker_name: "w-1".to_string(),
  };
  assert_eq!(rx.try_recv().unwrap(), expected);
  assert_eq!(rx.try_recv().unwrap(), expected);
  assert!(rx.try_recv().is_err());
}

#[test]
fn test_repeated_heartbeat_notifies_once() {
  let (tx, mut rx) = mpsc::unbounded_channel();
  let engine = SyncEngine::builder()
    .notifier(Arc::new(ChannelNotifier::new(tx)))
    .build();
  engine.start().unwrap();

  let heartbeat = frame(
    "worker.heartbeat",
    T1,
    json!({ "workerName": "w-1", "at": T1, "queues": ["etl"], "connected": true, "load": 0.5 }),
  );
  engine.ingest_frame(&heartbeat);
  engine.ingest_frame(&heartbeat);

  assert_eq!(
    rx.try_recv().unwrap(),
    ProjectionChange::Worker {
      worker_name: "w-1".to_string()
    }
  );
  assert!(rx.try_recv().is_err());
}

#[test]
fn test_notifier_reports_only_real_changes() {
  let (tx, mut rx) = mpsc::unbounded_channel();
  let engine = SyncEngine::builder()
    .notifier(Arc::new(ChannelNotifier::new(tx)))
    .build();
  engine.start().unwrap();

  engine.ingest_frame(&run_status(T1, "running"));
  engine.ingest_frame(&node_state(T2, "n1", "running", 0.5));
  engine.ingest_frame(&node_state(T2, "n1", "running", 0.5));

  assert_eq!(
    rx.try_recv().unwrap(),
    ProjectionChange::Run {
      run_id: "r1".to_string()
    }
  );
  assert_eq!(
    rx.try_recv().unwrap(),
    ProjectionChange::Node {
      run_id: "r1".to_string(),
      node_id: "n1".to_string()
    }
  );
  assert!(rx.try_recv().is_err());
}

struct BrokenWriter;

impl ProjectionWriter for BrokenWriter {
  fn name(&self) -> &'static str {
    "broken"
  }

  fn apply(&self, _update: &ProjectionUpdate) -> Result<bool, StoreError> {
    panic!("writer bug");
  }
}

#[test]
fn test_failing_writer_does_not_block_others() {
  let runs = RunCache::new();
  let engine = SyncEngine::builder()
    .run_cache(runs.clone())
    .writer(Arc::new(BrokenWriter))
    .build();
  engine.start().unwrap();

  engine.ingest_frame(&run_status(T1, "running"));
  engine.ingest_frame(&run_status(T2, "succeeded"));

  assert_eq!(runs.get("r1").unwrap().status, RunStatus::Succeeded);
}
