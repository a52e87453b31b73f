//! Ordering and staleness rules.
//!
//! Runs are ordered by a per-run watermark: the latest `occurredAt` accepted
//! for that run. Nodes are ordered by their own `lastUpdatedAt` first and by
//! stage priority when timestamps cannot decide.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use runsync_events::{NodeRuntimeState, NodeStage, RunStatus};

#[derive(Debug, Default)]
pub struct OrderingFilter {
  watermarks: HashMap<String, DateTime<Utc>>,
  statuses: HashMap<String, RunStatus>,
}

impl OrderingFilter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn watermark(&self, run_id: &str) -> Option<DateTime<Utc>> {
    self.watermarks.get(run_id).copied()
  }

  /// Last status admitted or observed for a run.
  pub fn status(&self, run_id: &str) -> Option<RunStatus> {
    self.statuses.get(run_id).copied()
  }

  /// Admit iff there is no watermark or `occurred_at >= watermark`. An
  /// admitted event advances the watermark.
  pub fn admit_run_status(&mut self, run_id: &str, occurred_at: DateTime<Utc>) -> bool {
    match self.watermarks.get_mut(run_id) {
      Some(watermark) if occurred_at < *watermark => false,
      Some(watermark) => {
        *watermark = occurred_at;
        true
      }
      None => {
        self.watermarks.insert(run_id.to_string(), occurred_at);
        true
      }
    }
  }

  /// Watermark check plus the terminal-state guard.
  ///
  /// Once a run is terminal it may not move to a different terminal status,
  /// and may only leave the terminal state through a `queued` event strictly
  /// newer than the watermark (a restart).
  pub fn admit_run_transition(
    &mut self,
    run_id: &str,
    status: RunStatus,
    occurred_at: DateTime<Utc>,
  ) -> bool {
    if let Some(current) = self.status(run_id)
      && current.is_terminal()
      && current != status
    {
      let restart = status == RunStatus::Queued
        && self.watermark(run_id).is_none_or(|w| occurred_at > w);
      if !restart {
        return false;
      }
    }

    if !self.admit_run_status(run_id, occurred_at) {
      return false;
    }
    self.statuses.insert(run_id.to_string(), status);
    true
  }

  /// Snapshots replace the whole run, so only the watermark applies.
  pub fn admit_run_snapshot(
    &mut self,
    run_id: &str,
    status: RunStatus,
    occurred_at: DateTime<Utc>,
  ) -> bool {
    if !self.admit_run_status(run_id, occurred_at) {
      return false;
    }
    self.statuses.insert(run_id.to_string(), status);
    true
  }

  /// Record a status seen outside the stream (a run listing). Does not touch
  /// the watermark.
  pub fn observe_run_status(&mut self, run_id: &str, status: RunStatus) {
    self.statuses.insert(run_id.to_string(), status);
  }

  pub fn reset(&mut self) {
    self.watermarks.clear();
    self.statuses.clear();
  }
}

/// Whether an incoming node state may overwrite the current one.
///
/// - no current state: admit
/// - both timestamped: strictly newer admits, strictly older rejects
/// - a timestamped update whose stage differs from the current one admits
///   (lateral moves such as a retry back to `queued`)
/// - otherwise admit iff the stage priority does not go down
pub fn admit_node_state(
  next_stage: &NodeStage,
  next_timestamp: Option<DateTime<Utc>>,
  current: Option<(&NodeStage, Option<DateTime<Utc>>)>,
) -> bool {
  let Some((current_stage, current_timestamp)) = current else {
    return true;
  };

  if let (Some(next), Some(current)) = (next_timestamp, current_timestamp) {
    if next > current {
      return true;
    }
    if next < current {
      return false;
    }
  }

  if next_timestamp.is_some() && next_stage != current_stage {
    return true;
  }

  next_stage.priority() >= current_stage.priority()
}

/// [`admit_node_state`] over whole runtime states.
///
/// A reported failure (stage `failed` with an error) has no lateral escape:
/// only a strictly newer timestamped update replaces it.
pub fn admit_node_update(next: &NodeRuntimeState, current: Option<&NodeRuntimeState>) -> bool {
  if let Some(current) = current
    && current.stage == NodeStage::Failed
    && current.error.is_some()
  {
    return next
      .last_updated_at
      .is_some_and(|next| current.last_updated_at.is_none_or(|current| next > current));
  }

  admit_node_state(
    &next.stage,
    next.last_updated_at,
    current.map(|c| (&c.stage, c.last_updated_at)),
  )
}
