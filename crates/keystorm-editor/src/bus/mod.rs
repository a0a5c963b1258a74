//! Topic-pattern pub/sub event bus.
//!
//! Topics are dotted paths (`buffer.content.inserted`). A subscription
//! pattern is either an exact topic or a prefix wildcard ending in `.*`
//! (`buffer.content.*` matches any extension of `buffer.content`).
//!
//! Delivery is per-subscription: a `Sync` subscription is invoked inside the
//! publisher's call, ordered by descending priority (ties broken by
//! registration order); an `Async` subscription is served from a bounded
//! queue drained by a worker task. `publish` routes both ways in one call;
//! `publish_sync` forces synchronous delivery to every matched subscription
//! and bypasses the queue.
//!
//! A panicking handler never stops delivery or kills the bus: the panic is
//! caught, counted, and recorded for the diagnostics sink. When the async
//! queue is full the oldest event for the incoming topic is dropped and the
//! drop counter increments.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use keystorm_core::events::{
    BufferChange, ConfigChange, DiagnosticsEvent, FileEvent, ModeChange,
};
use keystorm_core::{Error, Result};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::metrics;
use crate::services::panic_message;

/// Typed payload carried by a bus event.
#[derive(Debug, Clone)]
pub enum EventPayload {
    Buffer(BufferChange),
    Config(ConfigChange),
    Mode(ModeChange),
    File(FileEvent),
    Diagnostics(DiagnosticsEvent),
    Custom(serde_json::Value),
}

/// An event on the bus.
#[derive(Debug, Clone)]
pub struct Event {
    pub topic: String,
    pub payload: EventPayload,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(topic: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            topic: topic.into(),
            payload,
            source: String::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Sync,
    Async,
}

#[derive(Debug, Clone, Copy)]
pub struct SubscribeOptions {
    /// Higher priority runs first in synchronous delivery.
    pub priority: i32,
    pub mode: DeliveryMode,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            mode: DeliveryMode::Sync,
        }
    }
}

impl SubscribeOptions {
    pub fn sync(priority: i32) -> Self {
        Self {
            priority,
            mode: DeliveryMode::Sync,
        }
    }

    pub fn async_(priority: i32) -> Self {
        Self {
            priority,
            mode: DeliveryMode::Async,
        }
    }
}

/// Opaque subscription token. `unsubscribe` with a retired token is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

/// A recorded handler failure, surfaced through the diagnostics sink.
#[derive(Debug, Clone)]
pub struct HandlerFailure {
    pub topic: String,
    pub subscription: Subscription,
    pub message: String,
}

#[derive(Clone)]
struct SubEntry {
    id: u64,
    priority: i32,
    mode: DeliveryMode,
    handler: EventHandler,
}

#[derive(Default)]
struct SubTable {
    /// Exact topic -> entries.
    exact: HashMap<String, Vec<SubEntry>>,
    /// Wildcard prefix (without the trailing `.*`) -> entries.
    wildcard: HashMap<String, Vec<SubEntry>>,
}

impl SubTable {
    fn matched(&self, topic: &str) -> Vec<SubEntry> {
        let mut entries: Vec<SubEntry> = Vec::new();
        if let Some(list) = self.exact.get(topic) {
            entries.extend(list.iter().cloned());
        }
        for (prefix, list) in &self.wildcard {
            if topic_extends(topic, prefix) {
                entries.extend(list.iter().cloned());
            }
        }
        // Stable order: descending priority, then registration order.
        entries.sort_by_key(|e| (std::cmp::Reverse(e.priority), e.id));
        entries
    }

    fn remove(&mut self, id: u64) {
        for list in self.exact.values_mut() {
            list.retain(|e| e.id != id);
        }
        for list in self.wildcard.values_mut() {
            list.retain(|e| e.id != id);
        }
        self.exact.retain(|_, list| !list.is_empty());
        self.wildcard.retain(|_, list| !list.is_empty());
    }
}

/// True if `topic` is an extension of `prefix` (`prefix.anything`).
fn topic_extends(topic: &str, prefix: &str) -> bool {
    topic.len() > prefix.len() + 1
        && topic.starts_with(prefix)
        && topic.as_bytes()[prefix.len()] == b'.'
}

const STATE_IDLE: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// How many handler failures are retained for inspection before the oldest
/// is discarded.
const MAX_RECORDED_FAILURES: usize = 64;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

pub struct EventBus {
    subs: RwLock<SubTable>,
    next_id: AtomicU64,
    state: AtomicU8,
    queue: Mutex<VecDeque<Event>>,
    queue_capacity: usize,
    notify: Notify,
    worker: Mutex<Option<JoinHandle<()>>>,
    failures: Mutex<VecDeque<HandlerFailure>>,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(queue_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            subs: RwLock::new(SubTable::default()),
            next_id: AtomicU64::new(1),
            state: AtomicU8::new(STATE_IDLE),
            queue: Mutex::new(VecDeque::new()),
            queue_capacity: queue_capacity.max(1),
            notify: Notify::new(),
            worker: Mutex::new(None),
            failures: Mutex::new(VecDeque::new()),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }

    /// Start the async drain worker. Must be called on a tokio runtime.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        match self.state.compare_exchange(
            STATE_IDLE,
            STATE_RUNNING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {}
            Err(STATE_RUNNING) => return Err(Error::AlreadyRunning),
            Err(_) => return Err(Error::InvalidOperation("bus was stopped".into())),
        }

        let bus = Arc::clone(self);
        let handle = tokio::spawn(async move {
            bus.drain_loop().await;
        });
        *self.worker.lock().unwrap() = Some(handle);
        tracing::debug!("event bus started");
        Ok(())
    }

    /// Stop the bus: further publishes are rejected immediately, then the
    /// async queue is drained within `deadline`. Idempotent.
    pub async fn stop(&self, deadline: Duration) -> Result<()> {
        let prev = self.state.swap(STATE_STOPPED, Ordering::SeqCst);
        if prev == STATE_STOPPED {
            return Ok(());
        }
        self.notify.notify_waiters();

        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            match tokio::time::timeout(deadline, handle).await {
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!("event bus drain exceeded deadline, abandoning worker");
                    return Err(Error::ShutdownTimeout);
                }
            }
        }
        tracing::debug!("event bus stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_RUNNING
    }

    /// Subscribe `handler` to `pattern`. The returned token unsubscribes.
    pub fn subscribe<F>(&self, pattern: &str, opts: SubscribeOptions, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let entry = SubEntry {
            id,
            priority: opts.priority,
            mode: opts.mode,
            handler: Arc::new(handler),
        };
        let mut subs = self.subs.write().unwrap();
        if let Some(prefix) = pattern.strip_suffix(".*") {
            subs.wildcard.entry(prefix.to_string()).or_default().push(entry);
        } else {
            subs.exact.entry(pattern.to_string()).or_default().push(entry);
        }
        Subscription(id)
    }

    pub fn unsubscribe(&self, sub: Subscription) {
        self.subs.write().unwrap().remove(sub.0);
    }

    /// Publish an event: matched sync subscriptions run inline, async
    /// subscriptions are served from the queue.
    pub fn publish(&self, topic: &str, payload: EventPayload) -> Result<()> {
        self.publish_event(Event::new(topic, payload))
    }

    pub fn publish_event(&self, event: Event) -> Result<()> {
        if !self.is_running() {
            return Err(Error::NotRunning);
        }
        self.published.fetch_add(1, Ordering::Relaxed);
        metrics::inc(&metrics::global().events_published);

        self.deliver(&event, DeliveryMode::Sync);
        self.enqueue(event);
        self.notify.notify_one();
        Ok(())
    }

    /// Publish with synchronous delivery to every matched subscription,
    /// regardless of its declared mode. Bypasses the queue.
    pub fn publish_sync(&self, topic: &str, payload: EventPayload) -> Result<()> {
        if !self.is_running() {
            return Err(Error::NotRunning);
        }
        self.published.fetch_add(1, Ordering::Relaxed);
        metrics::inc(&metrics::global().events_published);

        let event = Event::new(topic, payload);
        let entries = self.subs.read().unwrap().matched(&event.topic);
        for entry in entries {
            self.invoke(&entry, &event);
        }
        Ok(())
    }

    /// Events dropped under the bounded-loss policy.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn published_events(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Drain and return recorded handler failures.
    pub fn take_handler_failures(&self) -> Vec<HandlerFailure> {
        self.failures.lock().unwrap().drain(..).collect()
    }

    fn enqueue(&self, event: Event) {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() >= self.queue_capacity {
            // Bounded loss: evict the oldest event for this topic, or the
            // oldest overall if the topic has nothing queued.
            let evict = queue
                .iter()
                .position(|e| e.topic == event.topic)
                .unwrap_or(0);
            queue.remove(evict);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::inc(&metrics::global().events_dropped);
            tracing::trace!(topic = %event.topic, "async queue full, dropped oldest event");
        }
        queue.push_back(event);
    }

    async fn drain_loop(self: Arc<Self>) {
        loop {
            let notified = self.notify.notified();
            let event = self.queue.lock().unwrap().pop_front();
            match event {
                Some(event) => {
                    self.deliver(&event, DeliveryMode::Async);
                }
                None => {
                    if self.state.load(Ordering::SeqCst) == STATE_STOPPED {
                        break;
                    }
                    notified.await;
                }
            }
        }
    }

    /// Deliver to matched subscriptions of the given mode. The subscription
    /// table is snapshotted first so handlers may subscribe or unsubscribe
    /// reentrantly without affecting in-flight delivery.
    fn deliver(&self, event: &Event, mode: DeliveryMode) {
        let entries = self.subs.read().unwrap().matched(&event.topic);
        for entry in entries.iter().filter(|e| e.mode == mode) {
            self.invoke(entry, event);
        }
    }

    fn invoke(&self, entry: &SubEntry, event: &Event) {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            (entry.handler)(event);
        }));
        match result {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(panic) => {
                let message = panic_message(&panic);
                metrics::inc(&metrics::global().handler_panics);
                tracing::error!(
                    topic = %event.topic,
                    subscription = entry.id,
                    %message,
                    "event handler panicked"
                );
                let mut failures = self.failures.lock().unwrap();
                if failures.len() >= MAX_RECORDED_FAILURES {
                    failures.pop_front();
                }
                failures.push_back(HandlerFailure {
                    topic: event.topic.clone(),
                    subscription: Subscription(entry.id),
                    message,
                });
            }
        }
    }
}
