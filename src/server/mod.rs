//! Single-client TCP control server.
//!
//! Accepts exactly one rendering client at a time on the control port and
//! keeps the connection under liveness watch. All lifecycle changes are
//! published as [`ConnectionEvent`]s; the `Display` form of each event is the
//! status line shown to the operator.

pub mod liveness;

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::TimingConfig;
use crate::events::{EventStream, Subscription};
use crate::protocol::{Command, CommandCodec, CommandSink};
use crate::{AppError, Result};

use self::liveness::{monitor_peer, LivenessOutcome};

/// Lifecycle notification emitted by the [`ConnectionServer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Listener is up and waiting for a client.
    Started,
    /// A client connected from the given address.
    Connected(SocketAddr),
    /// The client went away; the server is accepting again.
    Disconnected,
    /// A write to the connected client failed.
    SendFailed,
    /// Accepting a client failed; the loop retries.
    Failed(String),
    /// The server was stopped.
    Stopped,
}

impl Display for ConnectionEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Started => f.write_str("Server started - waiting for connection"),
            Self::Connected(addr) => write!(f, "Client connected from {}", addr.ip()),
            Self::Disconnected => f.write_str("Client disconnected - waiting for new connection"),
            Self::SendFailed => f.write_str("Send failed - client disconnected"),
            Self::Failed(reason) => write!(f, "Connection error: {reason}"),
            Self::Stopped => f.write_str("Server stopped"),
        }
    }
}

/// The currently connected client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSession {
    /// Remote socket address of the client.
    pub peer_address: SocketAddr,
    /// When the connection was accepted.
    pub connected_at: DateTime<Utc>,
}

struct Peer {
    writer: OwnedWriteHalf,
    /// Fires when the server stops or a send gives up on this client.
    closed: CancellationToken,
}

struct Shared {
    events: EventStream<ConnectionEvent>,
    peer: tokio::sync::Mutex<Option<Peer>>,
    session: Mutex<Option<ConnectionSession>>,
    liveness_interval: Duration,
    accept_retry: Duration,
    send_timeout: Duration,
}

impl Shared {
    fn set_session(&self, session: Option<ConnectionSession>) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = session;
    }
}

#[derive(Default)]
struct Runtime {
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

/// TCP control server for the rendering client.
pub struct ConnectionServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    runtime: Mutex<Runtime>,
}

impl ConnectionServer {
    /// Create a server that will listen on `addr` once started.
    #[must_use]
    pub fn new(addr: SocketAddr, timing: &TimingConfig) -> Self {
        Self {
            addr,
            shared: Arc::new(Shared {
                events: EventStream::new(),
                peer: tokio::sync::Mutex::new(None),
                session: Mutex::new(None),
                liveness_interval: timing.liveness_interval(),
                accept_retry: timing.accept_retry(),
                send_timeout: timing.send_timeout(),
            }),
            runtime: Mutex::new(Runtime::default()),
        }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> Subscription<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    /// Drop a lifecycle subscription.
    pub fn unsubscribe(&self, id: u64) {
        self.shared.events.unsubscribe(id);
    }

    /// Bind the listener and start the accept loop in the background.
    ///
    /// Returns the bound address (useful when configured with port 0).
    /// Calling `start` on a running server returns the existing address.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Bind` if the port is unavailable.
    pub async fn start(&self) -> Result<SocketAddr> {
        if let Some(addr) = self.local_addr() {
            debug!(%addr, "control server already running");
            return Ok(addr);
        }

        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|err| AppError::Bind(format!("cannot listen on {}: {err}", self.addr)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|err| AppError::Bind(format!("cannot read bound address: {err}")))?;

        info!(%local_addr, "control server listening");
        self.shared.events.publish(ConnectionEvent::Started);

        let cancel = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let span = info_span!("control_server", addr = %local_addr);
        let task = tokio::spawn(accept_loop(listener, shared, cancel.clone()).instrument(span));

        let mut runtime = self.lock_runtime();
        runtime.cancel = Some(cancel);
        runtime.task = Some(task);
        runtime.local_addr = Some(local_addr);
        Ok(local_addr)
    }

    /// Close the client socket and the listener. Safe to call repeatedly.
    pub async fn stop(&self) {
        let (cancel, task) = {
            let mut runtime = self.lock_runtime();
            runtime.local_addr = None;
            (runtime.cancel.take(), runtime.task.take())
        };
        let Some(cancel) = cancel else {
            return;
        };

        cancel.cancel();
        if let Some(mut peer) = self.shared.peer.lock().await.take() {
            if let Err(err) = peer.writer.shutdown().await {
                debug!(%err, "client socket already closed");
            }
        }
        self.shared.set_session(None);

        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(%err, "accept loop ended abnormally");
            }
        }

        info!("control server stopped");
        self.shared.events.publish(ConnectionEvent::Stopped);
    }

    /// Write one command to the connected client.
    ///
    /// Returns `false` when nobody is connected, the command cannot be
    /// encoded, or the write fails. A write that does not finish within the
    /// send timeout counts as failed. Write failures drop the client and
    /// publish [`ConnectionEvent::SendFailed`].
    pub async fn send(&self, command: &Command) -> bool {
        let frame = match CommandCodec::encode_line(command) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%err, tag = command.tag(), "refusing to send command");
                return false;
            }
        };

        let mut guard = self.shared.peer.lock().await;
        let Some(peer) = guard.as_mut() else {
            debug!(tag = command.tag(), "no client connected; command dropped");
            return false;
        };

        let closed = peer.closed.clone();
        let deadline = self.shared.send_timeout;
        let failure = tokio::select! {
            () = closed.cancelled() => {
                debug!(tag = command.tag(), "client closing; command dropped");
                return false;
            }
            written = tokio::time::timeout(deadline, peer.writer.write_all(&frame)) => match written {
                Ok(Ok(())) => {
                    debug!(%command, "command sent");
                    return true;
                }
                Ok(Err(err)) => err.to_string(),
                Err(_) => format!("client accepted no data for {}ms", deadline.as_millis()),
            },
        };

        warn!(reason = %failure, tag = command.tag(), "send to client failed; dropping client");
        self.shared.events.publish(ConnectionEvent::SendFailed);
        // A partially written frame leaves the stream unusable.
        if let Some(peer) = guard.take() {
            peer.closed.cancel();
        }
        false
    }

    /// The connected client, if any.
    #[must_use]
    pub fn session(&self) -> Option<ConnectionSession> {
        self.shared
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Address the listener is bound to while running.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock_runtime().local_addr
    }

    fn lock_runtime(&self) -> std::sync::MutexGuard<'_, Runtime> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CommandSink for ConnectionServer {
    fn send_command<'a>(
        &'a self,
        command: &'a Command,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(self.send(command))
    }
}

/// Accept clients one at a time until cancelled.
async fn accept_loop(listener: TcpListener, shared: Arc<Shared>, cancel: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                serve_peer(stream, addr, &shared, &cancel)
                    .instrument(info_span!("client", peer = %addr))
                    .await;
                if cancel.is_cancelled() {
                    break;
                }
            }
            Err(err) => {
                if cancel.is_cancelled() {
                    break;
                }
                warn!(%err, "accept failed");
                shared.events.publish(ConnectionEvent::Failed(err.to_string()));
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(shared.accept_retry) => {}
                }
            }
        }
    }
    debug!("accept loop finished");
}

/// Hold one client until it disconnects, then clear the session.
async fn serve_peer(
    stream: TcpStream,
    addr: SocketAddr,
    shared: &Shared,
    cancel: &CancellationToken,
) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(%err, "could not disable nagle");
    }
    let (mut reader, writer) = stream.into_split();
    let closed = cancel.child_token();

    *shared.peer.lock().await = Some(Peer {
        writer,
        closed: closed.clone(),
    });
    shared.set_session(Some(ConnectionSession {
        peer_address: addr,
        connected_at: Utc::now(),
    }));
    info!("client connected");
    shared.events.publish(ConnectionEvent::Connected(addr));

    let outcome = monitor_peer(&mut reader, shared.liveness_interval, &closed).await;

    shared.peer.lock().await.take();
    shared.set_session(None);

    if cancel.is_cancelled() {
        return;
    }
    match &outcome {
        LivenessOutcome::ReadFailed(reason) => info!(reason, "client connection lost"),
        LivenessOutcome::Cancelled => info!("client dropped after a failed send"),
        other => info!(?other, "client disconnected"),
    }
    shared.events.publish(ConnectionEvent::Disconnected);
}
