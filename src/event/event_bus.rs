//! # Event Bus
//!
//! Process-wide fan-out of every state change in the orchestration core.
//!
//! ## Delivery paths
//!
//! Each [`EventBus::send`] reaches three kinds of consumers:
//!
//! 1. **Local handlers** registered with [`EventBus::receive`]. They are called
//!    synchronously, in registration order, before `send` returns, whatever the
//!    readiness state. The tray projector lives here. Handlers run last, after the
//!    event was handed to the surface (or queued) and to the stream, so anything a
//!    handler sends is ordered after the event that triggered it.
//! 2. **Stream subscribers** obtained from [`EventBus::subscribe`], backed by a Tokio
//!    broadcast channel for consumers that prefer to `await` events.
//! 3. **The remote surface** (the primary UI), gated by two readiness flags. Until both
//!    the backend and the surface are ready, events are appended to a FIFO queue. The
//!    first delivery after both flags are set drains the queue in insertion order,
//!    then the live event follows. Nothing is dropped and nothing overtakes an older
//!    queued event.
//!
//! ## Surfaces
//!
//! A surface is anything implementing [`RemoteSurface`]. `deliver` runs while the gate
//! lock is held so it must not block; [`ChannelSurface`] forwards into an unbounded
//! channel and is the usual choice.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace, warn};

use super::channel::Channel;
use crate::disposable::Disposable;

/// An event as seen by stream subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct BusEvent {
    pub channel: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

/// An event waiting for the remote surface to become ready.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEvent {
    pub channel: String,
    pub payload: Value,
}

/// Destination of gated events, typically the primary UI window.
pub trait RemoteSurface: Send + Sync {
    fn deliver(&self, channel: &str, payload: &Value);
}

/// Message received on the other side of a [`ChannelSurface`].
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceMessage {
    pub channel: String,
    pub payload: Value,
}

/// Surface forwarding every delivery into an unbounded channel.
pub struct ChannelSurface {
    sender: mpsc::UnboundedSender<SurfaceMessage>,
}

impl ChannelSurface {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SurfaceMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl RemoteSurface for ChannelSurface {
    fn deliver(&self, channel: &str, payload: &Value) {
        if self
            .sender
            .send(SurfaceMessage {
                channel: channel.to_string(),
                payload: payload.clone(),
            })
            .is_err()
        {
            debug!("surface receiver closed, dropping {}", channel);
        }
    }
}

type Handler = Arc<dyn Fn(&Value) + Send + Sync>;
type HandlerMap = HashMap<String, Vec<(u64, Handler)>>;

#[derive(Default)]
struct Gate {
    backend_ready: bool,
    surface_ready: bool,
    surface: Option<Arc<dyn RemoteSurface>>,
    queue: VecDeque<QueuedEvent>,
}

impl Gate {
    fn open_surface(&self) -> Option<&Arc<dyn RemoteSurface>> {
        if self.backend_ready && self.surface_ready {
            self.surface.as_ref()
        } else {
            None
        }
    }

    fn flush(&mut self) {
        let Some(surface) = self.open_surface().cloned() else {
            return;
        };
        if !self.queue.is_empty() {
            debug!("flushing {} queued events to surface", self.queue.len());
        }
        while let Some(event) = self.queue.pop_front() {
            surface.deliver(&event.channel, &event.payload);
        }
    }
}

/// Readiness-gated publish/subscribe hub.
pub struct EventBus {
    gate: Mutex<Gate>,
    handlers: Arc<RwLock<HandlerMap>>,
    next_handler_id: AtomicU64,
    event_sender: broadcast::Sender<BusEvent>,
    capacity: usize,
    /// Keeps the broadcast channel open while nobody subscribes.
    _internal_receiver: broadcast::Receiver<BusEvent>,
}

impl EventBus {
    /// Creates a bus. `capacity` bounds the broadcast stream used by [`EventBus::subscribe`];
    /// the surface queue is unbounded.
    pub fn new(capacity: usize) -> Self {
        let (event_sender, event_receiver) = broadcast::channel(capacity.max(1));
        Self {
            gate: Mutex::new(Gate::default()),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            next_handler_id: AtomicU64::new(1),
            event_sender,
            capacity,
            _internal_receiver: event_receiver,
        }
    }

    /// Publishes `payload` on `channel`.
    ///
    /// Safe to call at any time, including before any surface exists.
    pub fn send(&self, channel: &str, payload: Value) {
        debug_send(channel, &payload);

        {
            let mut gate = self.lock_gate();
            gate.flush();
            match gate.open_surface() {
                Some(surface) => surface.deliver(channel, &payload),
                None => gate.queue.push_back(QueuedEvent {
                    channel: channel.to_string(),
                    payload: payload.clone(),
                }),
            }
        }

        // The internal receiver keeps the channel open, so this only fails on shutdown.
        let _ = self.event_sender.send(BusEvent {
            channel: channel.to_string(),
            payload: payload.clone(),
            timestamp: Utc::now(),
        });

        for handler in self.handlers_for(channel) {
            handler(&payload);
        }
    }

    /// Serializes `payload` and publishes it on a known channel.
    pub fn publish<T: Serialize + ?Sized>(&self, channel: Channel, payload: &T) -> EventResult<()> {
        let value = serde_json::to_value(payload).map_err(|e| EventError::Serialization {
            channel: channel.to_string(),
            message: e.to_string(),
        })?;
        self.send(channel.as_ref(), value);
        Ok(())
    }

    /// Registers a local handler for `channel`. The handler runs synchronously inside `send`.
    pub fn receive<F>(&self, channel: &str, handler: F) -> Disposable
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = self.next_handler_id.fetch_add(1, Ordering::SeqCst);
        write_handlers(&self.handlers)
            .entry(channel.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        trace!(channel, handler_id = id, "local handler registered");

        let handlers: Weak<RwLock<HandlerMap>> = Arc::downgrade(&self.handlers);
        let channel = channel.to_string();
        Disposable::new(move || {
            if let Some(handlers) = handlers.upgrade() {
                let mut map = write_handlers(&handlers);
                if let Some(list) = map.get_mut(&channel) {
                    list.retain(|(hid, _)| *hid != id);
                    if list.is_empty() {
                        map.remove(&channel);
                    }
                }
            }
        })
    }

    /// Stream of every event sent on the bus.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver::new(self.event_sender.subscribe())
    }

    /// Marks the backend as ready (flips once at startup).
    pub fn mark_backend_ready(&self) {
        let mut gate = self.lock_gate();
        if !gate.backend_ready {
            debug!("backend marked ready");
        }
        gate.backend_ready = true;
        gate.flush();
    }

    /// Attaches the primary surface. Delivery still waits for [`EventBus::mark_surface_ready`].
    pub fn attach_surface(&self, surface: Arc<dyn RemoteSurface>) {
        let mut gate = self.lock_gate();
        gate.surface = Some(surface);
        gate.surface_ready = false;
        debug!("surface attached");
    }

    /// Records the surface's "I am ready" signal and drains the queue.
    pub fn mark_surface_ready(&self) {
        let mut gate = self.lock_gate();
        if gate.surface.is_none() {
            warn!("surface reported ready but none is attached, events stay queued");
        }
        gate.surface_ready = true;
        gate.flush();
    }

    /// Detaches the surface (window closed). Later events queue until a new surface is ready.
    pub fn detach_surface(&self) {
        let mut gate = self.lock_gate();
        gate.surface = None;
        gate.surface_ready = false;
        debug!("surface detached");
    }

    pub fn is_backend_ready(&self) -> bool {
        self.lock_gate().backend_ready
    }

    pub fn is_surface_ready(&self) -> bool {
        self.lock_gate().surface_ready
    }

    pub fn queue_size(&self) -> usize {
        self.lock_gate().queue.len()
    }

    /// Copy of the events still waiting for the surface, oldest first.
    pub fn queued_events(&self) -> Vec<QueuedEvent> {
        self.lock_gate().queue.iter().cloned().collect()
    }

    pub fn handlers_size(&self, channel: &str) -> usize {
        self.read_handlers().get(channel).map_or(0, Vec::len)
    }

    pub fn subscribers_size(&self) -> usize {
        // The internal receiver is not a subscriber.
        self.event_sender.receiver_count().saturating_sub(1)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn handlers_for(&self, channel: &str) -> Vec<Handler> {
        self.read_handlers()
            .get(channel)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    }

    fn lock_gate(&self) -> MutexGuard<'_, Gate> {
        match self.gate.lock() {
            Ok(gate) => gate,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn read_handlers(&self) -> RwLockReadGuard<'_, HandlerMap> {
        match self.handlers.read() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn write_handlers(handlers: &RwLock<HandlerMap>) -> RwLockWriteGuard<'_, HandlerMap> {
    match handlers.write() {
        Ok(map) => map,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn debug_send(channel: &str, payload: &Value) {
    let noisy = channel
        .parse::<Channel>()
        .map(|c| c.is_noisy())
        .unwrap_or(false);
    if noisy {
        trace!("Sending {}: {}", channel, payload);
    } else {
        debug!("Sending {}: {}", channel, payload);
    }
}

pub struct EventReceiver {
    pub receiver: broadcast::Receiver<BusEvent>,
}

impl EventReceiver {
    pub fn new(receiver: broadcast::Receiver<BusEvent>) -> Self {
        Self { receiver }
    }

    /// Receives the next event. On lag the receiver resubscribes and reports how many
    /// events were skipped.
    pub async fn recv(&mut self) -> EventResult<BusEvent> {
        match self.receiver.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                self.receiver = self.receiver.resubscribe();
                Err(EventError::Lagged { count: n })
            }
            Err(e) => Err(EventError::ReceiveFailed {
                message: e.to_string(),
            }),
        }
    }
}

#[derive(Error, Debug)]
pub enum EventError {
    #[error("Event payload for {channel} could not be serialized: {message}")]
    Serialization { channel: String, message: String },

    #[error("Event Receive failed: {message}")]
    ReceiveFailed { message: String },

    #[error("Event lagged: {count}")]
    Lagged { count: u64 },
}

pub type EventResult<T> = Result<T, EventError>;
