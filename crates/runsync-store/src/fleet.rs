//! Worker fleet registry fed by heartbeat and package events.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use runsync_events::{PackageInfo, WorkerHeartbeatEvent, WorkerPackageEvent};
use serde::Serialize;

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
  pub worker_name: String,
  pub last_heartbeat: Option<DateTime<Utc>>,
  pub queues: Vec<String>,
  pub connected: bool,
  pub packages: Vec<PackageInfo>,
  /// Extra telemetry from the latest heartbeat.
  pub telemetry: serde_json::Map<String, serde_json::Value>,
}

impl WorkerStatus {
  fn new(worker_name: &str) -> Self {
    Self {
      worker_name: worker_name.to_string(),
      last_heartbeat: None,
      queues: Vec::new(),
      connected: false,
      packages: Vec::new(),
      telemetry: serde_json::Map::new(),
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct FleetRegistry {
  workers: Arc<RwLock<HashMap<String, WorkerStatus>>>,
}

impl FleetRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Record a heartbeat. Heartbeats older than the last one seen for the
  /// same worker are ignored. Returns whether the registry changed.
  pub fn record_heartbeat(&self, event: &WorkerHeartbeatEvent) -> Result<bool, StoreError> {
    let mut workers = self
      .workers
      .write()
      .map_err(|_| StoreError::poisoned("fleet registry"))?;
    let worker = workers
      .entry(event.worker_name.clone())
      .or_insert_with(|| WorkerStatus::new(&event.worker_name));

    if worker.last_heartbeat.is_some_and(|last| event.at < last) {
      return Ok(false);
    }

    let next = WorkerStatus {
      last_heartbeat: Some(event.at),
      queues: event.queues.clone().unwrap_or_else(|| worker.queues.clone()),
      connected: event.connected.unwrap_or(true),
      telemetry: event.extra.clone(),
      ..worker.clone()
    };
    if *worker == next {
      return Ok(false);
    }
    *worker = next;
    Ok(true)
  }

  pub fn record_packages(&self, event: &WorkerPackageEvent) -> Result<bool, StoreError> {
    let mut workers = self
      .workers
      .write()
      .map_err(|_| StoreError::poisoned("fleet registry"))?;
    let worker = workers
      .entry(event.worker_name.clone())
      .or_insert_with(|| WorkerStatus::new(&event.worker_name));

    if worker.packages == event.packages {
      return Ok(false);
    }
    worker.packages = event.packages.clone();
    Ok(true)
  }

  pub fn get(&self, worker_name: &str) -> Option<WorkerStatus> {
    self
      .workers
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .get(worker_name)
      .cloned()
  }

  /// All workers, ordered by name.
  pub fn list(&self) -> Vec<WorkerStatus> {
    let workers = self.workers.read().unwrap_or_else(PoisonError::into_inner);
    let mut list: Vec<_> = workers.values().cloned().collect();
    list.sort_by(|a, b| a.worker_name.cmp(&b.worker_name));
    list
  }
}
