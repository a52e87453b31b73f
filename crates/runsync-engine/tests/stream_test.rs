//! Engine wired to a live StreamClient over a scripted connector.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use runsync_config::TransportConfig;
use runsync_engine::SyncEngine;
use runsync_events::{NodeStage, RunStatus};
use runsync_transport::{
  ByteStream, ClientSession, ConnectionStatus, StreamClient, StreamConnector, TransportError,
};

/// Serves each scripted body once, then hangs on every later connection.
struct ScriptedConnector {
  bodies: Mutex<VecDeque<Vec<String>>>,
  opened: Mutex<usize>,
}

impl ScriptedConnector {
  fn new(bodies: Vec<Vec<String>>) -> Arc<Self> {
    Arc::new(Self {
      bodies: Mutex::new(bodies.into()),
      opened: Mutex::new(0),
    })
  }

  fn opened(&self) -> usize {
    *self.opened.lock().unwrap()
  }
}

#[async_trait]
impl StreamConnector for ScriptedConnector {
  async fn open(&self, _client_id: &str) -> Result<ByteStream, TransportError> {
    *self.opened.lock().unwrap() += 1;
    match self.bodies.lock().unwrap().pop_front() {
      Some(chunks) => Ok(
        futures::stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c))))
          .chain(futures::stream::pending())
          .boxed(),
      ),
      None => Ok(futures::stream::pending().boxed()),
    }
  }
}

fn sse(kind: &str, occurred_at: &str, data: serde_json::Value) -> String {
  let body = serde_json::json!({
    "type": kind,
    "occurredAt": occurred_at,
    "data": data,
  });
  format!("event: {}\ndata: {}\n\n", kind, body)
}

fn transport(keep_alive: bool) -> TransportConfig {
  TransportConfig {
    reconnect_base_ms: 2_000,
    reconnect_max_ms: 60_000,
    heartbeat_timeout_ms: 120_000,
    keep_alive,
  }
}

fn engine_with(connector: Arc<ScriptedConnector>, keep_alive: bool) -> Arc<SyncEngine> {
  let config = transport(keep_alive);
  let client = StreamClient::new(connector, ClientSession::new("console-1"), &config);
  SyncEngine::builder()
    .client(client)
    .keep_alive(config.keep_alive)
    .build()
}

#[tokio::test(start_paused = true)]
async fn test_stream_frames_reach_projections() {
  let status = sse(
    "run.status",
    "2026-03-01T10:00:00Z",
    serde_json::json!({ "runId": "r1", "status": "running" }),
  );
  let node = sse(
    "node.state",
    "2026-03-01T10:00:01Z",
    serde_json::json!({ "runId": "r1", "nodeId": "n1", "state": { "stage": "running" } }),
  );
  // Split mid-frame to exercise the decoder across chunks.
  let (head, tail) = node.split_at(20);
  let connector = ScriptedConnector::new(vec![vec![status, head.to_string(), tail.to_string()]]);

  let engine = engine_with(connector.clone(), false);
  assert_eq!(engine.status(), ConnectionStatus::Idle);

  engine.start().unwrap();
  tokio::time::sleep(Duration::from_millis(10)).await;

  assert_eq!(engine.status(), ConnectionStatus::Open);
  assert_eq!(connector.opened(), 1);

  let run = engine.runs().get("r1").unwrap();
  assert_eq!(run.status, RunStatus::Running);
  assert_eq!(
    run.node("n1").unwrap().state.as_ref().unwrap().stage,
    NodeStage::Running
  );
}

#[tokio::test(start_paused = true)]
async fn test_stop_tears_down_stream() {
  let connector = ScriptedConnector::new(vec![]);
  let engine = engine_with(connector.clone(), false);

  engine.start().unwrap();
  tokio::time::sleep(Duration::from_millis(10)).await;
  assert_eq!(engine.status(), ConnectionStatus::Open);

  engine.stop();
  assert_eq!(engine.status(), ConnectionStatus::Idle);

  tokio::time::sleep(Duration::from_secs(600)).await;
  assert_eq!(connector.opened(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_keep_alive_opens_once_and_stop_releases_it() {
  let connector = ScriptedConnector::new(vec![]);
  let engine = engine_with(connector.clone(), true);

  engine.start().unwrap();
  // Starting twice does not register twice.
  engine.start().unwrap();
  tokio::time::sleep(Duration::from_millis(10)).await;

  let client = engine.client().unwrap();
  assert!(client.keep_alive());
  assert_eq!(client.listener_count(), 1);
  assert_eq!(connector.opened(), 1);

  engine.stop();
  assert!(!client.keep_alive());
  assert_eq!(engine.status(), ConnectionStatus::Idle);
}
