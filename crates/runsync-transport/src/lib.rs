//! Runsync Transport
//!
//! One long-lived server-sent event stream per [`StreamClient`], shared by
//! every subscriber.
//!
//! ```text
//!        subscribe / keep-alive
//!               │
//!   ┌───────────▼───────────┐   open ok    ┌──────┐
//!   │ Idle ──► Connecting ──┼─────────────►│ Open │
//!   └───────────▲───────────┘              └──┬───┘
//!               │ backoff elapsed             │ error / EOF / heartbeat timeout
//!         ┌─────┴────────┐                    │
//!         │ Reconnecting │◄───────────────────┘
//!         └──────────────┘
//! ```
//!
//! The stream is opened lazily when the first listener subscribes (or eagerly
//! when keep-alive is enabled) and torn down when the last listener leaves.
//! Reconnect delays start at the configured base, double per consecutive
//! failure up to the ceiling, and reset after a successful open.
//!
//! Frames are decoded by [`SseDecoder`] and handed to listeners in order on
//! the connection task, so a frame is fully handled before the next is read.

mod backoff;
mod client;
mod connector;
mod error;
mod session;
mod sse;

pub use backoff::Backoff;
pub use client::{ConnectionStatus, FrameListener, StreamClient, Subscription};
pub use connector::{ByteStream, HttpConnector, StreamConnector};
pub use error::TransportError;
pub use session::ClientSession;
pub use sse::{SseDecoder, SseFrame};
