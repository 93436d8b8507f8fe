//! Subscribable notification streams.
//!
//! [`EventStream`] fans each published event out to every current
//! subscriber over an unbounded `tokio::sync::mpsc` channel. Delivery is
//! FIFO per subscriber. A subscriber leaves by calling
//! [`EventStream::unsubscribe`] or by dropping its [`Subscription`]; closed
//! subscribers are pruned on the next publish.
//!
//! Publishing never blocks and is callable from synchronous contexts such
//! as `notify` callbacks.

use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::{info, warn};

/// Receiving end of an [`EventStream`] subscription.
#[derive(Debug)]
pub struct Subscription<T> {
    id: u64,
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    /// Subscriber identifier, used with [`EventStream::unsubscribe`].
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next event. `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

/// Multi-subscriber, FIFO notification stream.
#[derive(Debug)]
pub struct EventStream<T> {
    subscribers: Mutex<Vec<(u64, mpsc::UnboundedSender<T>)>>,
    next_id: AtomicU64,
}

impl<T> Default for EventStream<T> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<T: Clone> EventStream<T> {
    /// Create an empty stream.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber. Only events published afterwards are seen.
    pub fn subscribe(&self) -> Subscription<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, tx));
        Subscription { id, rx }
    }

    /// Remove a subscriber. Events already queued stay readable.
    pub fn unsubscribe(&self, id: u64) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(sub_id, _)| *sub_id != id);
    }

    /// Deliver `event` to every live subscriber.
    pub fn publish(&self, event: T) {
        let mut guard = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        guard.retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Severity of a [`Diagnostic`] line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticLevel {
    /// Informational progress line.
    Info,
    /// Something failed or needs operator attention.
    Warn,
}

/// One line on the warning stream shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Severity.
    pub level: DiagnosticLevel,
    /// Human-readable text.
    pub message: String,
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.level {
            DiagnosticLevel::Info => write!(f, "{}", self.message),
            DiagnosticLevel::Warn => write!(f, "warning: {}", self.message),
        }
    }
}

/// Warning stream shared by the orchestrator, watchdog, and harness.
pub type Diagnostics = EventStream<Diagnostic>;

impl EventStream<Diagnostic> {
    /// Publish an informational line and mirror it to the log.
    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!(target: "scene_sync::diagnostics", "{message}");
        self.publish(Diagnostic {
            level: DiagnosticLevel::Info,
            message,
        });
    }

    /// Publish a warning line and mirror it to the log.
    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(target: "scene_sync::diagnostics", "{message}");
        self.publish(Diagnostic {
            level: DiagnosticLevel::Warn,
            message,
        });
    }
}
