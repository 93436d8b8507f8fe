//! Coarse application state derived from connection events.

use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;
use tracing::{debug, info};

use crate::events::{EventStream, Subscription};
use crate::server::ConnectionEvent;

/// Application-level connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppState {
    /// Nothing has started yet.
    #[default]
    Initializing,
    /// The control server is listening.
    ServerStarted,
    /// A rendering client is connected.
    ClientConnected,
    /// The client went away; the server is accepting again.
    ClientDisconnected,
    /// The server reported a failure.
    Error,
}

impl AppState {
    /// Stable lowercase name used in logs and operator responses.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::ServerStarted => "server_started",
            Self::ClientConnected => "client_connected",
            Self::ClientDisconnected => "client_disconnected",
            Self::Error => "error",
        }
    }
}

impl Display for AppState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pure transition function. Every event maps to a state; `Stopped` keeps
/// the current one.
#[must_use]
pub fn next_state(current: AppState, event: &ConnectionEvent) -> AppState {
    match event {
        ConnectionEvent::Started => AppState::ServerStarted,
        ConnectionEvent::Connected(_) => AppState::ClientConnected,
        ConnectionEvent::Disconnected | ConnectionEvent::SendFailed => {
            AppState::ClientDisconnected
        }
        ConnectionEvent::Failed(_) => AppState::Error,
        ConnectionEvent::Stopped => current,
    }
}

/// Classify a free-text status line the way text-only consumers expect.
///
/// Rules are checked in order and the first match wins. Matching is
/// case-insensitive. Returns `None` when no rule applies.
#[must_use]
pub fn classify_status_text(status: &str) -> Option<AppState> {
    let text = status.to_lowercase();
    if text.contains("started") || text.contains("waiting") {
        Some(AppState::ServerStarted)
    } else if text.contains("connected") && !text.contains("disconnected") {
        Some(AppState::ClientConnected)
    } else if text.contains("disconnected") || text.contains("failed") {
        Some(AppState::ClientDisconnected)
    } else if text.contains("error") || text.contains("failed") {
        Some(AppState::Error)
    } else {
        None
    }
}

/// A state change as seen by subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State before the event.
    pub from: AppState,
    /// State after the event.
    pub to: AppState,
}

impl Transition {
    /// Whether this transition enters `ClientConnected` from elsewhere.
    #[must_use]
    pub fn entered_connected(&self) -> bool {
        self.to == AppState::ClientConnected && self.from != AppState::ClientConnected
    }
}

/// Owner of [`AppState`]. The only mutation paths are [`StateMachine::apply`]
/// and [`StateMachine::force_disconnected`].
#[derive(Debug)]
pub struct StateMachine {
    tx: watch::Sender<AppState>,
    transitions: EventStream<Transition>,
    connects: AtomicU64,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Start in [`AppState::Initializing`].
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(AppState::Initializing);
        Self {
            tx,
            transitions: EventStream::new(),
            connects: AtomicU64::new(0),
        }
    }

    /// Current state.
    #[must_use]
    pub fn current(&self) -> AppState {
        *self.tx.borrow()
    }

    /// Read-only view that can be awaited for changes.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<AppState> {
        self.tx.subscribe()
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> Subscription<Transition> {
        self.transitions.subscribe()
    }

    /// Drop a transition subscription.
    pub fn unsubscribe(&self, id: u64) {
        self.transitions.unsubscribe(id);
    }

    /// How many times `ClientConnected` has been entered.
    ///
    /// Comparing two readings tells whether a connect happened in between.
    #[must_use]
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Feed one server event. Returns the transition if the state changed.
    pub fn apply(&self, event: &ConnectionEvent) -> Option<Transition> {
        debug!(%event, "connection event");
        self.transition(|from| next_state(from, event))
    }

    /// Drive a connected state to `ClientDisconnected`. No-op otherwise.
    pub fn force_disconnected(&self) -> Option<Transition> {
        let transition = self.transition(|from| {
            if from == AppState::ClientConnected {
                AppState::ClientDisconnected
            } else {
                from
            }
        });
        if transition.is_some() {
            info!("client process exited while connected; forced disconnect");
        }
        transition
    }

    /// Read, decide, and write under the channel's lock so concurrent
    /// callers see each other's results. Subscribers get transitions in the
    /// order they were made.
    fn transition(&self, decide: impl FnOnce(AppState) -> AppState) -> Option<Transition> {
        let mut made = None;
        self.tx.send_if_modified(|state| {
            let from = *state;
            let to = decide(from);
            if from == to {
                return false;
            }
            *state = to;
            if to == AppState::ClientConnected {
                self.connects.fetch_add(1, Ordering::SeqCst);
            }
            let transition = Transition { from, to };
            self.transitions.publish(transition);
            made = Some(transition);
            true
        });
        if let Some(Transition { from, to }) = made {
            info!(%from, %to, "state changed");
        }
        made
    }
}
