//! The sync engine: stream, ordering filter, merge engine and projection
//! writers wired together.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use runsync_config::SyncConfig;
use runsync_events::{
  EventEnvelope, EventKind, EventPayload, NodeErrorEvent, NodeResult, NodeResultDeltaEvent,
  NodeResultSnapshotEvent, NodeRuntimeState, NodeStage, NodeStateEvent, RunNodeRecord, RunRecord,
  RunSnapshotEvent, RunStatus, RunStatusEvent,
};
use runsync_store::{EditorStore, FleetRegistry, RunCache};
use runsync_transport::{
  ClientSession, ConnectionStatus, HttpConnector, SseFrame, StreamClient,
};
use runsync_workflow::Workflow;
use tracing::{debug, error, info, instrument, warn};

use crate::dispatcher::{Dispatcher, EventHandler, Registration};
use crate::error::{EngineError, HandlerError};
use crate::filter::{OrderingFilter, admit_node_update};
use crate::merge::apply_delta;
use crate::notifier::{ChangeNotifier, NoopNotifier, ProjectionChange};
use crate::writers::{
  EditorWriter, ProjectionUpdate, ProjectionWriter, RunCacheWriter, apply_result, apply_state,
};

type NodeKey = (String, String);

fn node_key(run_id: &str, node_id: &str) -> NodeKey {
  (run_id.to_string(), node_id.to_string())
}

/// Canonical view of everything admitted so far.
///
/// Holds the current state and result of every (run, node) pair seen, which
/// serve as the "current" side for the staleness filter and the merge engine.
#[derive(Debug, Default)]
struct SyncState {
  filter: OrderingFilter,
  node_states: HashMap<NodeKey, NodeRuntimeState>,
  node_results: HashMap<NodeKey, NodeResult>,
  /// When each restarted run was queued again. Node events from before
  /// that belong to the previous attempt.
  attempts: HashMap<String, DateTime<Utc>>,
}

impl SyncState {
  /// Admit and merge one run or node event into the next update to project.
  /// `None` means the event is stale or changes nothing.
  fn reconcile(&mut self, envelope: &EventEnvelope) -> Option<ProjectionUpdate> {
    let at = envelope.occurred_at;
    match &envelope.payload {
      EventPayload::RunStatus(event) => self.run_status(event, at),
      EventPayload::RunSnapshot(event) => self.run_snapshot(event, at),
      EventPayload::NodeState(event) => self.node_state(event, at),
      EventPayload::NodeResultDelta(event) => self.node_result_delta(event, at),
      EventPayload::NodeResultSnapshot(event) => self.node_result_snapshot(event, at),
      EventPayload::NodeError(event) => self.node_error(event, at),
      EventPayload::WorkerHeartbeat(_) | EventPayload::WorkerPackage(_) => None,
    }
  }

  fn run_status(&mut self, event: &RunStatusEvent, at: DateTime<Utc>) -> Option<ProjectionUpdate> {
    let restart = event.status == RunStatus::Queued
      && self
        .filter
        .status(&event.run_id)
        .is_some_and(RunStatus::is_terminal);
    if !self.filter.admit_run_transition(&event.run_id, event.status, at) {
      debug!(
        run_id = %event.run_id,
        status = %event.status,
        occurred_at = %at,
        "run_status_rejected"
      );
      return None;
    }

    if restart {
      info!(run_id = %event.run_id, occurred_at = %at, "run_restarted");
      self.forget_nodes(&event.run_id);
      self.attempts.insert(event.run_id.clone(), at);
    }

    Some(ProjectionUpdate::RunStatus {
      run_id: event.run_id.clone(),
      status: event.status,
      started_at: event.started_at,
      finished_at: event.finished_at,
      error: event
        .reason
        .clone()
        .filter(|_| event.status == RunStatus::Failed),
      restart,
    })
  }

  fn run_snapshot(
    &mut self,
    event: &RunSnapshotEvent,
    at: DateTime<Utc>,
  ) -> Option<ProjectionUpdate> {
    let mut record = event.clone().into_record();
    if !self
      .filter
      .admit_run_snapshot(&record.run_id, record.status, at)
    {
      debug!(run_id = %record.run_id, occurred_at = %at, "run_snapshot_rejected");
      return None;
    }

    // Node events do not move the run watermark, so a snapshot can still be
    // older than individual node states already admitted.
    let (mut states, mut results) = self.forget_nodes(&record.run_id);
    keep_newer_nodes(&mut record.nodes, &mut states, &mut results, at);

    let mut newer: Vec<(String, NodeRuntimeState)> = states
      .into_iter()
      .filter(|(_, state)| state.last_updated_at.is_some_and(|t| t > at))
      .collect();
    newer.sort_by(|a, b| a.0.cmp(&b.0));
    for (node_id, state) in newer {
      debug!(run_id = %record.run_id, node_id = %node_id, "snapshot_node_kept");
      record.nodes.push(RunNodeRecord {
        result: results.remove(&node_id),
        node_id,
        state: Some(state),
        middleware: Vec::new(),
      });
    }

    self.index_nodes(&record.run_id, &record.nodes);
    Some(ProjectionUpdate::RunSnapshot(record))
  }

  fn node_state(&mut self, event: &NodeStateEvent, at: DateTime<Utc>) -> Option<ProjectionUpdate> {
    if self.before_attempt(&event.run_id, at) {
      debug!(run_id = %event.run_id, node_id = %event.node_id, "node_state_from_previous_attempt");
      return None;
    }

    let mut next = event.state.clone().normalized();
    if next.last_updated_at.is_none() {
      next.last_updated_at = Some(at);
    }

    let key = node_key(&event.run_id, &event.node_id);
    let current = self.node_states.get(&key);
    if !admit_node_update(&next, current) {
      debug!(
        run_id = %event.run_id,
        node_id = %event.node_id,
        stage = %next.stage,
        "node_state_rejected"
      );
      return None;
    }
    if current == Some(&next) {
      return None;
    }

    self.node_states.insert(key, next.clone());
    Some(ProjectionUpdate::NodeState {
      run_id: event.run_id.clone(),
      node_id: event.node_id.clone(),
      state: next,
    })
  }

  fn node_result_delta(
    &mut self,
    event: &NodeResultDeltaEvent,
    at: DateTime<Utc>,
  ) -> Option<ProjectionUpdate> {
    if self.before_attempt(&event.run_id, at) {
      return None;
    }

    let key = node_key(&event.run_id, &event.node_id);
    let current = self.node_results.get(&key);
    let merged = apply_delta(current.map(|r| &r.content), &event.delta);
    if !merged.changed {
      return None;
    }

    let mut result = current
      .cloned()
      .unwrap_or_else(|| NodeResult::from_content(serde_json::Value::Null));
    result.content = merged.document;
    self.node_results.insert(key, result.clone());
    Some(ProjectionUpdate::NodeResult {
      run_id: event.run_id.clone(),
      node_id: event.node_id.clone(),
      result,
    })
  }

  fn node_result_snapshot(
    &mut self,
    event: &NodeResultSnapshotEvent,
    at: DateTime<Utc>,
  ) -> Option<ProjectionUpdate> {
    if self.before_attempt(&event.run_id, at) {
      return None;
    }

    let key = node_key(&event.run_id, &event.node_id);
    let next = NodeResult {
      content: event.content.clone(),
      artifacts: event.artifacts.clone(),
      summary: event.summary.clone(),
    };
    if self.node_results.get(&key) == Some(&next) {
      return None;
    }

    self.node_results.insert(key, next.clone());
    Some(ProjectionUpdate::NodeResult {
      run_id: event.run_id.clone(),
      node_id: event.node_id.clone(),
      result: next,
    })
  }

  /// Errors bypass the staleness filter: failed outranks any stage.
  fn node_error(&mut self, event: &NodeErrorEvent, at: DateTime<Utc>) -> Option<ProjectionUpdate> {
    if self.before_attempt(&event.run_id, at) {
      debug!(run_id = %event.run_id, node_id = %event.node_id, "node_error_from_previous_attempt");
      return None;
    }

    let key = node_key(&event.run_id, &event.node_id);
    let current = self.node_states.get(&key);

    let mut next = current
      .cloned()
      .unwrap_or_else(|| NodeRuntimeState::new(NodeStage::Failed));
    next.stage = NodeStage::Failed;
    next.error = Some(event.error.clone());
    next.last_updated_at = next.last_updated_at.max(Some(at));
    if current == Some(&next) {
      return None;
    }

    warn!(
      run_id = %event.run_id,
      node_id = %event.node_id,
      error = %event.error,
      "node_failed"
    );
    self.node_states.insert(key, next.clone());
    Some(ProjectionUpdate::NodeState {
      run_id: event.run_id.clone(),
      node_id: event.node_id.clone(),
      state: next,
    })
  }

  fn before_attempt(&self, run_id: &str, at: DateTime<Utc>) -> bool {
    self.attempts.get(run_id).is_some_and(|started| at < *started)
  }

  /// Drop every indexed state and result of a run, returning them by node id.
  fn forget_nodes(
    &mut self,
    run_id: &str,
  ) -> (HashMap<String, NodeRuntimeState>, HashMap<String, NodeResult>) {
    let mut states = HashMap::new();
    self.node_states.retain(|(run, node_id), state| {
      if run != run_id {
        return true;
      }
      states.insert(node_id.clone(), state.clone());
      false
    });

    let mut results = HashMap::new();
    self.node_results.retain(|(run, node_id), result| {
      if run != run_id {
        return true;
      }
      results.insert(node_id.clone(), result.clone());
      false
    });
    (states, results)
  }

  /// Seed the index from run records without overwriting anything already
  /// known.
  fn index_nodes(&mut self, run_id: &str, nodes: &[RunNodeRecord]) {
    for node in nodes {
      let key = node_key(run_id, &node.node_id);
      if let Some(state) = &node.state {
        self
          .node_states
          .entry(key.clone())
          .or_insert_with(|| state.clone().normalized());
      }
      if let Some(result) = &node.result {
        self
          .node_results
          .entry(key)
          .or_insert_with(|| result.clone());
      }
      self.index_nodes(run_id, &node.middleware);
    }
  }
}

/// Reconcile snapshot nodes against the states already known for the run.
///
/// A snapshot node whose state would not pass the staleness filter keeps the
/// known state and result instead. Known entries are removed from the maps as
/// they are matched.
fn keep_newer_nodes(
  nodes: &mut [RunNodeRecord],
  states: &mut HashMap<String, NodeRuntimeState>,
  results: &mut HashMap<String, NodeResult>,
  at: DateTime<Utc>,
) {
  for node in nodes {
    let known_state = states.remove(&node.node_id);
    let known_result = results.remove(&node.node_id);

    if let Some(state) = node.state.take() {
      let mut state = state.normalized();
      state.last_updated_at = state.last_updated_at.or(Some(at));
      node.state = Some(state);
    }

    let stale = match (&node.state, &known_state) {
      (Some(next), Some(current)) => !admit_node_update(next, Some(current)),
      (None, Some(_)) => true,
      _ => false,
    };
    if stale {
      node.state = known_state;
      if known_result.is_some() {
        node.result = known_result;
      }
    } else if node.result.is_none() {
      node.result = known_result;
    }

    keep_newer_nodes(&mut node.middleware, states, results, at);
  }
}

/// Real-time run-state sync engine.
///
/// Every event goes through the same pipeline: decode, dispatch, ordering
/// filter, merge, then each projection writer in turn. The pipeline runs
/// under one lock so projections always see updates in admission order.
pub struct SyncEngine {
  state: Mutex<SyncState>,
  runs: RunCache,
  editor: EditorStore,
  fleet: FleetRegistry,
  writers: Vec<Arc<dyn ProjectionWriter>>,
  notifier: Arc<dyn ChangeNotifier>,
  dispatcher: Arc<Dispatcher>,
  keep_alive: bool,
  registrations: Mutex<Vec<Registration>>,
}

impl SyncEngine {
  pub fn builder() -> SyncEngineBuilder {
    SyncEngineBuilder::default()
  }

  pub fn runs(&self) -> &RunCache {
    &self.runs
  }

  pub fn editor(&self) -> &EditorStore {
    &self.editor
  }

  pub fn fleet(&self) -> &FleetRegistry {
    &self.fleet
  }

  pub fn client(&self) -> Option<&Arc<StreamClient>> {
    self.dispatcher.client()
  }

  pub fn status(&self) -> ConnectionStatus {
    self
      .client()
      .map_or(ConnectionStatus::Idle, |client| client.status())
  }

  /// Register handlers for every event kind. With a stream client this
  /// opens the stream; with keep-alive configured it also stays open when
  /// handlers are later dropped.
  pub fn start(self: &Arc<Self>) -> Result<(), EngineError> {
    {
      let mut registrations = self.lock_registrations();
      if !registrations.is_empty() {
        return Ok(());
      }
      for kind in EventKind::ALL {
        let engine = Arc::downgrade(self);
        let handler: Arc<dyn EventHandler> =
          Arc::new(move |envelope: &EventEnvelope| -> Result<(), HandlerError> {
            if let Some(engine) = engine.upgrade() {
              engine.ingest_envelope(envelope)?;
            }
            Ok(())
          });
        registrations.push(self.dispatcher.register(kind, handler));
      }
    }

    if self.keep_alive
      && let Some(client) = self.client()
    {
      client.enable_keep_alive()?;
    }

    info!(
      kinds = EventKind::ALL.len(),
      keep_alive = self.keep_alive,
      "sync_engine_started"
    );
    Ok(())
  }

  /// Unregister all handlers and release the stream.
  pub fn stop(&self) {
    let registrations = std::mem::take(&mut *self.lock_registrations());
    drop(registrations);
    if let Some(client) = self.client() {
      client.disable_keep_alive();
    }
    info!("sync_engine_stopped");
  }

  /// Feed a raw frame as if it came off the stream. Only reaches the
  /// pipeline after [`SyncEngine::start`].
  pub fn ingest_frame(&self, frame: &SseFrame) {
    self.dispatcher.dispatch_frame(frame);
  }

  /// Run one decoded event through the pipeline. Returns whether any
  /// projection changed.
  #[instrument(skip(self, envelope), fields(kind = %envelope.kind()))]
  pub fn ingest_envelope(&self, envelope: &EventEnvelope) -> Result<bool, EngineError> {
    match &envelope.payload {
      EventPayload::WorkerHeartbeat(event) => {
        let changed = self.fleet.record_heartbeat(event)?;
        Ok(self.worker_changed(changed, &event.worker_name))
      }
      EventPayload::WorkerPackage(event) => {
        let changed = self.fleet.record_packages(event)?;
        Ok(self.worker_changed(changed, &event.worker_name))
      }
      _ => {
        let mut state = self.lock_state()?;
        match state.reconcile(envelope) {
          Some(update) => Ok(self.project(&update)),
          None => Ok(false),
        }
      }
    }
  }

  /// Hand an update to every writer. A writer that fails or panics is
  /// logged and skipped; the others still run.
  fn project(&self, update: &ProjectionUpdate) -> bool {
    let mut changed = false;
    for writer in &self.writers {
      match catch_unwind(AssertUnwindSafe(|| writer.apply(update))) {
        Ok(Ok(wrote)) => changed |= wrote,
        Ok(Err(e)) => {
          error!(
            writer = writer.name(),
            run_id = %update.run_id(),
            error = %e,
            "projection_write_failed"
          );
        }
        Err(_) => {
          error!(
            writer = writer.name(),
            run_id = %update.run_id(),
            "projection_writer_panicked"
          );
        }
      }
    }

    if changed {
      let run_id = update.run_id().to_string();
      self.notifier.notify(match update.node_id() {
        Some(node_id) => ProjectionChange::Node {
          run_id,
          node_id: node_id.to_string(),
        },
        None => ProjectionChange::Run { run_id },
      });
    }
    changed
  }

  fn worker_changed(&self, changed: bool, worker_name: &str) -> bool {
    if changed {
      self.notifier.notify(ProjectionChange::Worker {
        worker_name: worker_name.to_string(),
      });
    }
    changed
  }

  /// Seed the run cache from a run listing. Statuses feed the terminal
  /// guard; node states and results fill gaps in the canonical index.
  pub fn load_listing(&self, records: Vec<RunRecord>) -> Result<(), EngineError> {
    let mut state = self.lock_state()?;
    for record in &records {
      state
        .filter
        .observe_run_status(&record.run_id, record.status);
      state.index_nodes(&record.run_id, &record.nodes);
    }
    self.runs.load_listing(records)?;
    Ok(())
  }

  /// Open a workflow in the editor, optionally bound to one run. A bound
  /// run's known node states and results are written onto it immediately.
  pub fn open_workflow(&self, workflow: Workflow, run_id: Option<String>) -> Result<(), EngineError> {
    let state = self.lock_state()?;
    self.editor.load_workflow(workflow)?;
    self.editor.bind_run(run_id.clone())?;

    let Some(run_id) = run_id else {
      return Ok(());
    };
    for ((run, node_id), runtime) in &state.node_states {
      if *run == run_id {
        self
          .editor
          .update_runtime(node_id, |rt| apply_state(rt, runtime))?;
      }
    }
    for ((run, node_id), result) in &state.node_results {
      if *run == run_id {
        self
          .editor
          .update_runtime(node_id, |rt| apply_result(rt, result))?;
      }
    }
    Ok(())
  }

  /// Forget every watermark and indexed node. The caches are left as they
  /// are; callers reload them after a reset.
  pub fn reset(&self) -> Result<(), EngineError> {
    *self.lock_state()? = SyncState::default();
    info!("sync_state_reset");
    Ok(())
  }

  pub fn node_state(&self, run_id: &str, node_id: &str) -> Option<NodeRuntimeState> {
    let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    state.node_states.get(&node_key(run_id, node_id)).cloned()
  }

  pub fn node_result(&self, run_id: &str, node_id: &str) -> Option<NodeResult> {
    let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    state.node_results.get(&node_key(run_id, node_id)).cloned()
  }

  pub fn watermark(&self, run_id: &str) -> Option<DateTime<Utc>> {
    let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    state.filter.watermark(run_id)
  }

  fn lock_state(&self) -> Result<MutexGuard<'_, SyncState>, EngineError> {
    self.state.lock().map_err(|_| EngineError::Poisoned)
  }

  fn lock_registrations(&self) -> MutexGuard<'_, Vec<Registration>> {
    self
      .registrations
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }
}

/// Assembles a [`SyncEngine`].
///
/// Without a stream client the engine is detached and fed with
/// [`SyncEngine::ingest_frame`] or [`SyncEngine::ingest_envelope`].
#[derive(Default)]
pub struct SyncEngineBuilder {
  runs: RunCache,
  editor: EditorStore,
  fleet: FleetRegistry,
  client: Option<Arc<StreamClient>>,
  keep_alive: bool,
  notifier: Option<Arc<dyn ChangeNotifier>>,
  extra_writers: Vec<Arc<dyn ProjectionWriter>>,
}

impl SyncEngineBuilder {
  pub fn run_cache(mut self, runs: RunCache) -> Self {
    self.runs = runs;
    self
  }

  pub fn editor(mut self, editor: EditorStore) -> Self {
    self.editor = editor;
    self
  }

  pub fn fleet(mut self, fleet: FleetRegistry) -> Self {
    self.fleet = fleet;
    self
  }

  pub fn client(mut self, client: Arc<StreamClient>) -> Self {
    self.client = Some(client);
    self
  }

  pub fn keep_alive(mut self, keep_alive: bool) -> Self {
    self.keep_alive = keep_alive;
    self
  }

  pub fn notifier(mut self, notifier: Arc<dyn ChangeNotifier>) -> Self {
    self.notifier = Some(notifier);
    self
  }

  /// Add a writer that runs after the run cache and editor writers.
  pub fn writer(mut self, writer: Arc<dyn ProjectionWriter>) -> Self {
    self.extra_writers.push(writer);
    self
  }

  /// Connect to the configured endpoint over HTTP, persisting the
  /// client-session id in the configured session file.
  pub fn with_config(mut self, config: &SyncConfig) -> Result<Self, EngineError> {
    config.validate()?;
    let connector = HttpConnector::new(config.endpoint()?.clone(), config.client_id_param.clone())?;
    let session = ClientSession::load_or_create(&config.session_file()?)?;
    debug!(client_id = %session.id(), "client_session_loaded");

    self.client = Some(StreamClient::new(
      Arc::new(connector),
      session,
      &config.transport,
    ));
    self.keep_alive = config.transport.keep_alive;
    Ok(self)
  }

  pub fn build(self) -> Arc<SyncEngine> {
    let mut writers: Vec<Arc<dyn ProjectionWriter>> = vec![
      Arc::new(RunCacheWriter::new(self.runs.clone())),
      Arc::new(EditorWriter::new(self.editor.clone())),
    ];
    writers.extend(self.extra_writers);

    let dispatcher = match self.client {
      Some(client) => Dispatcher::new(client),
      None => Dispatcher::detached(),
    };

    Arc::new(SyncEngine {
      state: Mutex::new(SyncState::default()),
      runs: self.runs,
      editor: self.editor,
      fleet: self.fleet,
      writers,
      notifier: self.notifier.unwrap_or_else(|| Arc::new(NoopNotifier)),
      dispatcher,
      keep_alive: self.keep_alive,
      registrations: Mutex::new(Vec::new()),
    })
  }
}
