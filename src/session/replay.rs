//! Paced re-sending of overlay entries.

use std::time::Duration;

use tracing::{debug, info_span, warn, Instrument};

use super::model::InterfaceValue;
use crate::protocol::{Command, CommandSink};

/// Outcome of one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Commands handed to the peer.
    pub sent: usize,
    /// Commands the sink rejected.
    pub failed: usize,
}

impl ReplayReport {
    /// Total commands attempted.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.sent + self.failed
    }
}

/// Send every value as a `SYNC` command, in order, `spacing` apart.
///
/// A rejected command is counted and skipped; the batch always runs to the
/// end.
pub async fn replay(
    values: &[InterfaceValue],
    sink: &dyn CommandSink,
    spacing: Duration,
) -> ReplayReport {
    let span = info_span!("replay", count = values.len());
    async move {
        let mut report = ReplayReport::default();
        for (position, value) in values.iter().enumerate() {
            if position > 0 && !spacing.is_zero() {
                tokio::time::sleep(spacing).await;
            }
            let command = Command::sync(
                &value.id.source_file,
                &value.value_type,
                &value.id.name,
                &value.value,
            );
            if sink.send_command(&command).await {
                debug!(id = %value.id, "replayed");
                report.sent += 1;
            } else {
                warn!(id = %value.id, "replay send failed; continuing");
                report.failed += 1;
            }
        }
        report
    }
    .instrument(span)
    .await
}
