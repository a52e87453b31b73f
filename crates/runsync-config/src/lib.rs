//! Runsync Config
//!
//! This crate contains the serializable configuration for the run-state
//! synchronization engine. Configuration is a JSON document:
//!
//! ```json
//! {
//!   "endpoint": "https://console.example.com/api/events",
//!   "transport": {
//!     "reconnect_base_ms": 2000,
//!     "reconnect_max_ms": 60000,
//!     "heartbeat_timeout_ms": 120000,
//!     "keep_alive": false
//!   }
//! }
//! ```
//!
//! Every field has a default, so an empty object is a valid (if endpoint-less)
//! configuration. The endpoint is usually supplied on the command line.

mod error;
mod sync;
mod transport;

pub use error::ConfigError;
pub use sync::{DEFAULT_CLIENT_ID_PARAM, SyncConfig};
pub use transport::TransportConfig;
