//! Routes decoded stream events to handlers registered per event kind.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use runsync_events::{EnvelopeError, EventEnvelope, EventKind};
use runsync_transport::{FrameListener, SseFrame, StreamClient, Subscription};
use tracing::{debug, error, warn};

use crate::error::HandlerError;

/// Handles every event of the kinds it is registered for.
pub trait EventHandler: Send + Sync {
  fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError>;
}

impl<F> EventHandler for F
where
  F: Fn(&EventEnvelope) -> Result<(), HandlerError> + Send + Sync,
{
  fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
    self(envelope)
  }
}

#[derive(Default)]
struct Registry {
  handlers: BTreeMap<EventKind, BTreeMap<u64, Arc<dyn EventHandler>>>,
  next_id: u64,
  subscription: Option<Subscription>,
}

impl Registry {
  fn is_empty(&self) -> bool {
    self.handlers.values().all(BTreeMap::is_empty)
  }
}

/// Kind-keyed handler registry fed by a [`StreamClient`].
///
/// The dispatcher subscribes to the stream when the first handler of any kind
/// registers and drops its subscription when the last one leaves, which lets
/// the client tear the connection down (unless keep-alive is on). A detached
/// dispatcher has no client and is fed through [`Dispatcher::dispatch_frame`].
pub struct Dispatcher {
  client: Option<Arc<StreamClient>>,
  registry: Mutex<Registry>,
}

impl Dispatcher {
  pub fn new(client: Arc<StreamClient>) -> Arc<Self> {
    Arc::new(Self {
      client: Some(client),
      registry: Mutex::new(Registry::default()),
    })
  }

  pub fn detached() -> Arc<Self> {
    Arc::new(Self {
      client: None,
      registry: Mutex::new(Registry::default()),
    })
  }

  pub fn client(&self) -> Option<&Arc<StreamClient>> {
    self.client.as_ref()
  }

  pub fn handler_count(&self) -> usize {
    self.lock().handlers.values().map(BTreeMap::len).sum()
  }

  /// Register `handler` for `kind`. It stays registered until the returned
  /// [`Registration`] is dropped.
  pub fn register(
    self: &Arc<Self>,
    kind: EventKind,
    handler: Arc<dyn EventHandler>,
  ) -> Registration {
    let mut registry = self.lock();
    let id = registry.next_id;
    registry.next_id += 1;
    registry.handlers.entry(kind).or_default().insert(id, handler);

    if registry.subscription.is_none()
      && let Some(client) = &self.client
    {
      let listener: Arc<dyn FrameListener> = Arc::new(DispatchListener {
        dispatcher: Arc::downgrade(self),
      });
      registry.subscription = Some(client.subscribe(listener));
    }

    debug!(kind = %kind, handler_id = id, "handler_registered");
    Registration {
      kind,
      id,
      dispatcher: Arc::downgrade(self),
    }
  }

  fn unregister(&self, kind: EventKind, id: u64) {
    let released = {
      let mut registry = self.lock();
      let Some(handlers) = registry.handlers.get_mut(&kind) else {
        return;
      };
      if handlers.remove(&id).is_none() {
        return;
      }
      if handlers.is_empty() {
        registry.handlers.remove(&kind);
      }
      if registry.is_empty() {
        registry.subscription.take()
      } else {
        None
      }
    };

    // Dropped outside the registry lock; this may tear the stream down.
    if released.is_some() {
      debug!("last handler unregistered; releasing event stream");
    }
    drop(released);
  }

  /// Decode a raw frame and dispatch it. Frames that fail to decode are
  /// logged and dropped.
  pub fn dispatch_frame(&self, frame: &SseFrame) {
    match EventEnvelope::decode(frame.event.as_deref(), &frame.data) {
      Ok(envelope) => self.dispatch(&envelope),
      Err(EnvelopeError::UnknownKind(kind)) => {
        debug!(kind = %kind, "frame_dropped_unknown_kind");
      }
      Err(e) => {
        warn!(error = %e, label = ?frame.event, "frame_dropped");
      }
    }
  }

  /// Deliver an envelope to every handler registered for its kind.
  ///
  /// Handlers run in registration order. An error or panic in one is logged
  /// and does not stop delivery to the rest.
  pub fn dispatch(&self, envelope: &EventEnvelope) {
    let kind = envelope.kind();
    let handlers: Vec<(u64, Arc<dyn EventHandler>)> = match self.lock().handlers.get(&kind) {
      Some(handlers) => handlers.iter().map(|(id, h)| (*id, h.clone())).collect(),
      None => return,
    };

    for (id, handler) in handlers {
      match catch_unwind(AssertUnwindSafe(|| handler.handle(envelope))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
          error!(kind = %kind, handler_id = id, error = %e, "event_handler_failed");
        }
        Err(_) => {
          error!(kind = %kind, handler_id = id, "event_handler_panicked");
        }
      }
    }
  }

  fn lock(&self) -> MutexGuard<'_, Registry> {
    self.registry.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

struct DispatchListener {
  dispatcher: Weak<Dispatcher>,
}

impl FrameListener for DispatchListener {
  fn on_frame(&self, frame: &SseFrame) {
    if let Some(dispatcher) = self.dispatcher.upgrade() {
      dispatcher.dispatch_frame(frame);
    }
  }
}

/// Keeps a handler registered. Dropping it unregisters.
#[must_use = "dropping a Registration unregisters the handler immediately"]
pub struct Registration {
  kind: EventKind,
  id: u64,
  dispatcher: Weak<Dispatcher>,
}

impl Registration {
  pub fn kind(&self) -> EventKind {
    self.kind
  }

  pub fn unregister(self) {
    drop(self)
  }
}

impl Drop for Registration {
  fn drop(&mut self) {
    if let Some(dispatcher) = self.dispatcher.upgrade() {
      dispatcher.unregister(self.kind, self.id);
    }
  }
}
