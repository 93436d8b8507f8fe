//! Peer liveness detection.
//!
//! The client never sends an explicit goodbye, so the connection is watched
//! by racing a socket read against a timer. A zero-byte read means the peer
//! closed. When the timer wins, the socket is probed without blocking: a
//! readable socket with nothing to read is a closed socket. The losing
//! branch of each race is dropped; socket reads are cancel-safe, so no
//! bytes are lost.

use std::time::Duration;

use futures_util::FutureExt;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const READ_BUF_BYTES: usize = 1024;

/// Why the liveness loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivenessOutcome {
    /// A read completed with zero bytes.
    PeerClosed,
    /// The timer probe found the socket readable with nothing available.
    ProbeClosed,
    /// The socket reported an error.
    ReadFailed(String),
    /// The server is stopping.
    Cancelled,
}

impl LivenessOutcome {
    /// Whether this outcome means the peer went away (as opposed to a stop).
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

/// Watch `reader` until the peer disconnects or `cancel` fires.
///
/// Inbound bytes are not part of the protocol; they are logged and dropped.
pub async fn monitor_peer(
    reader: &mut OwnedReadHalf,
    interval: Duration,
    cancel: &CancellationToken,
) -> LivenessOutcome {
    let mut buf = vec![0_u8; READ_BUF_BYTES];

    loop {
        tokio::select! {
            () = cancel.cancelled() => return LivenessOutcome::Cancelled,
            read = reader.read(&mut buf) => match read {
                Ok(0) => return LivenessOutcome::PeerClosed,
                Ok(n) => debug!(bytes = n, "discarding inbound bytes from client"),
                Err(err) => return LivenessOutcome::ReadFailed(err.to_string()),
            },
            () = tokio::time::sleep(interval) => {
                if probe_closed(reader) {
                    return LivenessOutcome::ProbeClosed;
                }
            }
        }
    }
}

/// Non-blocking socket state check.
///
/// `peek` resolving immediately with zero bytes means the socket is readable
/// but empty, i.e. the peer sent FIN. A pending `peek` means idle-but-open.
fn probe_closed(reader: &mut OwnedReadHalf) -> bool {
    let mut probe = [0_u8; 1];
    match reader.peek(&mut probe).now_or_never() {
        Some(Ok(0) | Err(_)) => true,
        Some(Ok(_)) | None => false,
    }
}
