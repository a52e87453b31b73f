//! Runsync Engine
//!
//! Reconciles the live run-state event stream into the run cache and the
//! editor store without ever letting a duplicated, reordered or stale event
//! regress what is shown.
//!
//! ```text
//! StreamClient ─► Dispatcher ─► OrderingFilter ─► apply_delta ─► RunCacheWriter
//!                                                              └► EditorWriter
//! ```
//!
//! [`SyncEngine`] owns the pipeline state (watermarks, the current state and
//! result of each node) so independent engines never share it.

mod dispatcher;
mod engine;
mod error;
mod filter;
mod merge;
mod notifier;
mod writers;

pub use dispatcher::{Dispatcher, EventHandler, Registration};
pub use engine::{SyncEngine, SyncEngineBuilder};
pub use error::{EngineError, HandlerError};
pub use filter::{OrderingFilter, admit_node_state, admit_node_update};
pub use merge::{Merged, apply_delta};
pub use notifier::{ChangeNotifier, ChannelNotifier, NoopNotifier, ProjectionChange};
pub use writers::{EditorWriter, ProjectionUpdate, ProjectionWriter, RunCacheWriter};
