//! In-process event bus with FIFO message groups
//!
//! At-least-once topic delivery with message-group ordering: every group
//! gets its own lane, and within a lane delivery is FIFO with a single
//! message in flight — the next message is not dispatched until every
//! subscriber of the previous one has returned. Across lanes, handlers run
//! concurrently.
//!
//! Payloads are capped at [`MAX_EVENT_BYTES`]; anything bigger belongs in a
//! state-store side table with only the key on the envelope.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error};

pub mod events;

pub use events::{
    CacheType, EventPayload, ExtractionCompleted, ExtractionFailed, ExtractionRequested,
    ResultsStored, WebpageFetched,
};

/// Per-message payload size cap in bytes
pub const MAX_EVENT_BYTES: usize = 4096;

/// Bus topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    ExtractionRequested,
    WebpageFetched,
    ExtractionCompleted,
    ResultsStored,
    ExtractionFailed,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::ExtractionRequested => "extraction.requested",
            Topic::WebpageFetched => "webpage.fetched",
            Topic::ExtractionCompleted => "extraction.completed",
            Topic::ResultsStored => "results.stored",
            Topic::ExtractionFailed => "extraction.failed",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A delivered message: topic plus JSON payload
#[derive(Debug, Clone)]
pub struct Event {
    pub topic: Topic,
    pub data: Value,
}

/// Errors from emitting onto the bus
#[derive(Error, Debug)]
pub enum BusError {
    /// Payload exceeds [`MAX_EVENT_BYTES`]
    #[error("Event payload is {size} bytes, over the 4 KiB cap")]
    PayloadTooLarge { size: usize },

    /// Payload failed to serialize
    #[error("Failed to serialize event payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A subscriber: one pipeline stage handling one topic
///
/// Handlers receive the bus so they can emit follow-up events. A returned
/// error is logged, never redelivered — stages own their failure semantics
/// and publish `extraction.failed` themselves.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stage name for logs
    fn name(&self) -> &'static str;

    /// The single topic this handler consumes
    fn topic(&self) -> Topic;

    async fn handle(&self, event: Event, bus: Arc<EventBus>) -> anyhow::Result<()>;
}

/// The bus: subscriber registry plus per-group delivery lanes
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
    lanes: Mutex<HashMap<String, mpsc::UnboundedSender<Event>>>,
    emitted: AtomicU64,
    /// Handle back to the owning Arc, for lane tasks and handler dispatch
    self_ref: Weak<EventBus>,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            handlers: RwLock::new(Vec::new()),
            lanes: Mutex::new(HashMap::new()),
            emitted: AtomicU64::new(0),
            self_ref: weak.clone(),
        })
    }

    /// Register a handler. Call before the first emit.
    pub async fn subscribe(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.write().await.push(handler);
    }

    /// Total events accepted onto the bus
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Emit a typed payload onto its topic
    pub async fn publish<P: EventPayload>(&self, payload: &P, group: &str) -> Result<(), BusError> {
        let data = serde_json::to_value(payload)?;
        self.emit(P::TOPIC, data, group).await
    }

    /// Emit a raw payload onto a topic within a message group
    pub async fn emit(&self, topic: Topic, data: Value, group: &str) -> Result<(), BusError> {
        let size = serde_json::to_vec(&data)?.len();
        if size > MAX_EVENT_BYTES {
            return Err(BusError::PayloadTooLarge { size });
        }

        let event = Event { topic, data };
        debug!(topic = %topic, group, size, "Emitting event");

        let mut lanes = self.lanes.lock().await;
        let sender = lanes
            .entry(group.to_string())
            .or_insert_with(|| self.spawn_lane(group));
        if sender.send(event.clone()).is_err() {
            // Lane task died; replace it and retry once
            let sender = self.spawn_lane(group);
            let _ = sender.send(event);
            lanes.insert(group.to_string(), sender);
        }

        self.emitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Spawn the dispatch task for one message group
    fn spawn_lane(&self, group: &str) -> mpsc::UnboundedSender<Event> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let weak = self.self_ref.clone();
        let group = group.to_string();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                // Bus dropped: the lane drains and exits
                let Some(bus) = weak.upgrade() else { break };
                bus.dispatch(&group, event).await;
            }
        });

        tx
    }

    /// Deliver one event to every subscriber of its topic, sequentially
    async fn dispatch(self: Arc<Self>, group: &str, event: Event) {
        let handlers: Vec<Arc<dyn EventHandler>> = self
            .handlers
            .read()
            .await
            .iter()
            .filter(|h| h.topic() == event.topic)
            .cloned()
            .collect();

        for handler in handlers {
            if let Err(e) = handler.handle(event.clone(), Arc::clone(&self)).await {
                error!(
                    stage = handler.name(),
                    topic = %event.topic,
                    group,
                    error = %e,
                    "Event handler failed"
                );
            }
        }
    }
}
