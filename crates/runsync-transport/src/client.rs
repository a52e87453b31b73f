//! Shared event stream connection with explicit state machine.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::StreamExt;
use runsync_config::TransportConfig;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::connector::{ByteStream, StreamConnector};
use crate::error::TransportError;
use crate::session::ClientSession;
use crate::sse::{SseDecoder, SseFrame};

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
  Idle,
  Connecting,
  Open,
  Reconnecting,
}

/// Receives every decoded frame, in stream order.
pub trait FrameListener: Send + Sync {
  fn on_frame(&self, frame: &SseFrame);
}

impl<F> FrameListener for F
where
  F: Fn(&SseFrame) + Send + Sync,
{
  fn on_frame(&self, frame: &SseFrame) {
    self(frame)
  }
}

struct ClientInner {
  listeners: BTreeMap<u64, Arc<dyn FrameListener>>,
  next_listener_id: u64,
  keep_alive: bool,
  /// Token of the running connection task. `None` while idle.
  connection: Option<CancellationToken>,
}

/// A single shared event stream connection.
///
/// At most one connection task runs at a time; it owns the only in-flight
/// connection attempt and the only pending reconnect timer. Tearing down
/// cancels the task's token, which aborts both.
pub struct StreamClient {
  connector: Arc<dyn StreamConnector>,
  session: ClientSession,
  reconnect_base: Duration,
  reconnect_max: Duration,
  heartbeat_timeout: Duration,
  inner: Mutex<ClientInner>,
  status: watch::Sender<ConnectionStatus>,
}

impl StreamClient {
  pub fn new(
    connector: Arc<dyn StreamConnector>,
    session: ClientSession,
    config: &TransportConfig,
  ) -> Arc<Self> {
    let (status, _) = watch::channel(ConnectionStatus::Idle);
    Arc::new(Self {
      connector,
      session,
      reconnect_base: config.reconnect_base(),
      reconnect_max: config.reconnect_max(),
      heartbeat_timeout: config.heartbeat_timeout(),
      inner: Mutex::new(ClientInner {
        listeners: BTreeMap::new(),
        next_listener_id: 0,
        keep_alive: false,
        connection: None,
      }),
      status,
    })
  }

  pub fn client_id(&self) -> &str {
    self.session.id()
  }

  pub fn status(&self) -> ConnectionStatus {
    *self.status.borrow()
  }

  pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
    self.status.subscribe()
  }

  pub fn listener_count(&self) -> usize {
    self.lock().listeners.len()
  }

  pub fn keep_alive(&self) -> bool {
    self.lock().keep_alive
  }

  /// Start the connection task if it is not already running.
  ///
  /// Must be called from within a tokio runtime.
  pub fn connect(self: &Arc<Self>) -> Result<(), TransportError> {
    let mut inner = self.lock();
    if inner.connection.is_some() {
      return Ok(());
    }
    let handle = Handle::try_current().map_err(|_| TransportError::NoRuntime)?;

    let token = CancellationToken::new();
    inner.connection = Some(token.clone());
    self.status.send_replace(ConnectionStatus::Connecting);
    handle.spawn(run_connection(Arc::downgrade(self), token));
    Ok(())
  }

  /// Register a listener, opening the stream if needed.
  ///
  /// The listener stays registered until the returned [`Subscription`] is
  /// dropped. Failing to start the stream is logged, never returned.
  pub fn subscribe(self: &Arc<Self>, listener: Arc<dyn FrameListener>) -> Subscription {
    let id = {
      let mut inner = self.lock();
      let id = inner.next_listener_id;
      inner.next_listener_id += 1;
      inner.listeners.insert(id, listener);
      id
    };

    if let Err(e) = self.connect() {
      error!(error = %e, "failed to start event stream");
    }

    Subscription {
      id,
      client: Arc::downgrade(self),
    }
  }

  fn unsubscribe(&self, id: u64) {
    let mut inner = self.lock();
    if inner.listeners.remove(&id).is_none() {
      return;
    }
    if inner.listeners.is_empty() && !inner.keep_alive {
      self.teardown(&mut inner);
    }
  }

  /// Keep the stream open even with no listeners, and open it now.
  pub fn enable_keep_alive(self: &Arc<Self>) -> Result<(), TransportError> {
    self.lock().keep_alive = true;
    self.connect()
  }

  /// Stop keeping the stream open; closes it if nobody is listening.
  pub fn disable_keep_alive(&self) {
    let mut inner = self.lock();
    inner.keep_alive = false;
    if inner.listeners.is_empty() {
      self.teardown(&mut inner);
    }
  }

  /// Close the stream and cancel any pending reconnect, regardless of
  /// listeners. A later `subscribe` or `connect` starts it again.
  pub fn shutdown(&self) {
    let mut inner = self.lock();
    self.teardown(&mut inner);
  }

  fn teardown(&self, inner: &mut ClientInner) {
    if let Some(token) = inner.connection.take() {
      token.cancel();
      info!(client_id = %self.session.id(), "event_stream_closed");
    }
    self.status.send_replace(ConnectionStatus::Idle);
  }

  fn lock(&self) -> MutexGuard<'_, ClientInner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Publish a status from the connection task. Ignored once the task's
  /// token has been cancelled, so a torn-down task cannot overwrite `Idle`.
  fn transition(&self, token: &CancellationToken, status: ConnectionStatus) -> bool {
    let _inner = self.lock();
    if token.is_cancelled() {
      return false;
    }
    self.status.send_replace(status);
    true
  }

  fn deliver(&self, token: &CancellationToken, frame: &SseFrame) {
    let listeners: Vec<Arc<dyn FrameListener>> = {
      let inner = self.lock();
      if token.is_cancelled() {
        return;
      }
      inner.listeners.values().cloned().collect()
    };

    for listener in listeners {
      if catch_unwind(AssertUnwindSafe(|| listener.on_frame(frame))).is_err() {
        error!("frame_listener_panicked");
      }
    }
  }
}

impl Drop for StreamClient {
  fn drop(&mut self) {
    let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
    if let Some(token) = inner.connection.take() {
      token.cancel();
    }
  }
}

/// Keeps a listener registered. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
  id: u64,
  client: Weak<StreamClient>,
}

impl Subscription {
  pub fn unsubscribe(self) {
    drop(self)
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(client) = self.client.upgrade() {
      client.unsubscribe(self.id);
    }
  }
}

fn transition(client: &Weak<StreamClient>, token: &CancellationToken, status: ConnectionStatus) -> bool {
  client
    .upgrade()
    .is_some_and(|c| c.transition(token, status))
}

async fn run_connection(client: Weak<StreamClient>, token: CancellationToken) {
  let Some((connector, client_id, mut backoff, heartbeat)) = client.upgrade().map(|c| {
    (
      c.connector.clone(),
      c.session.id().to_string(),
      Backoff::new(c.reconnect_base, c.reconnect_max),
      c.heartbeat_timeout,
    )
  }) else {
    return;
  };

  let mut failures: u32 = 0;
  loop {
    if !transition(&client, &token, ConnectionStatus::Connecting) {
      break;
    }

    let opened = tokio::select! {
      biased;
      _ = token.cancelled() => break,
      opened = connector.open(&client_id) => opened,
    };

    let error = match opened {
      Ok(stream) => {
        backoff.reset();
        failures = 0;
        if !transition(&client, &token, ConnectionStatus::Open) {
          break;
        }
        info!(client_id = %client_id, "event_stream_open");

        match read_frames(&client, &token, stream, heartbeat).await {
          Some(error) => error,
          None => break,
        }
      }
      Err(error) => error,
    };

    failures += 1;
    let delay = backoff.next_delay();
    if !transition(&client, &token, ConnectionStatus::Reconnecting) {
      break;
    }
    warn!(
      error = %error,
      failures,
      delay_ms = delay.as_millis() as u64,
      "event_stream_reconnecting"
    );

    tokio::select! {
      biased;
      _ = token.cancelled() => break,
      _ = tokio::time::sleep(delay) => {}
    }
  }

  debug!(client_id = %client_id, "event stream task exited");
}

/// Pump frames until the stream fails. Returns `None` when cancelled or when
/// the client has been dropped.
async fn read_frames(
  client: &Weak<StreamClient>,
  token: &CancellationToken,
  mut stream: ByteStream,
  heartbeat: Duration,
) -> Option<TransportError> {
  let mut decoder = SseDecoder::new();
  loop {
    let next = tokio::select! {
      biased;
      _ = token.cancelled() => return None,
      next = tokio::time::timeout(heartbeat, stream.next()) => next,
    };

    let chunk = match next {
      Err(_) => return Some(TransportError::HeartbeatTimeout(heartbeat)),
      Ok(None) => return Some(TransportError::Closed),
      Ok(Some(Err(error))) => return Some(error),
      Ok(Some(Ok(chunk))) => chunk,
    };

    let frames = decoder.feed(&chunk);
    if frames.is_empty() {
      continue;
    }
    let client = client.upgrade()?;
    for frame in &frames {
      client.deliver(token, frame);
    }
  }
}
