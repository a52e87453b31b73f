//! Runsync Store
//!
//! The caches the console renders from. Each is a cheaply clonable handle
//! over shared state, so the sync engine writes through one clone while UI
//! code reads through others.
//!
//! - [`RunCache`]: run list and run detail. Runs and their nodes are held in
//!   `Arc`s and replaced copy-on-write, so an unchanged node keeps its
//!   pointer identity across updates and renderers can skip it.
//! - [`EditorStore`]: the workflow open in the editor, with live runtime
//!   fields on every node (root, middleware, nested subgraph).
//! - [`FleetRegistry`]: last known status of each worker process.

mod editor;
mod error;
mod fleet;
mod run_cache;

pub use editor::EditorStore;
pub use error::StoreError;
pub use fleet::{FleetRegistry, WorkerStatus};
pub use run_cache::{CachedNode, CachedRun, NodeReplace, RunCache};
