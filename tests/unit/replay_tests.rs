//! Unit tests for paced overlay replay against a recording sink.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use scene_sync::protocol::{Command, CommandSink};
use scene_sync::session::{replay, InterfaceValue};

/// Sink that records every command and rejects the ones whose name is
/// listed in `reject`.
#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<(Instant, String)>>,
    reject: Vec<&'static str>,
}

impl RecordingSink {
    fn lines(&self) -> Vec<String> {
        self.sent
            .lock()
            .expect("lock")
            .iter()
            .map(|(_, line)| line.clone())
            .collect()
    }
}

impl CommandSink for RecordingSink {
    fn send_command<'a>(
        &'a self,
        command: &'a Command,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            let line = command.encode().expect("encodable");
            let rejected = self.reject.iter().any(|name| line.contains(name));
            self.sent
                .lock()
                .expect("lock")
                .push((Instant::now(), line));
            !rejected
        })
    }
}

fn values() -> Vec<InterfaceValue> {
    vec![
        InterfaceValue::new("Screen1", "visible", "bool", "False"),
        InterfaceValue::new("Screen1", "broken", "int", "1"),
        InterfaceValue::new("Screen2", "Speed", "int", "88"),
    ]
}

#[tokio::test]
async fn replays_in_order_as_sync() {
    let sink = RecordingSink::default();

    let report = replay(&values(), &sink, Duration::ZERO).await;

    assert_eq!(report.sent, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(
        sink.lines(),
        vec![
            "SYNC::Screen1::bool::visible::false",
            "SYNC::Screen1::int::broken::1",
            "SYNC::Screen2::int::Speed::88",
        ]
    );
}

/// A rejected command is counted and the batch keeps going.
#[tokio::test]
async fn failure_does_not_abort_batch() {
    let sink = RecordingSink {
        reject: vec!["broken"],
        ..RecordingSink::default()
    };

    let report = replay(&values(), &sink, Duration::ZERO).await;

    assert_eq!(report.sent, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.attempted(), 3);
    assert_eq!(sink.lines().len(), 3, "entry after the failure was still sent");
}

/// Consecutive sends are at least `spacing` apart.
#[tokio::test]
async fn commands_are_spaced() {
    let sink = RecordingSink::default();
    let spacing = Duration::from_millis(40);

    let started = Instant::now();
    replay(&values(), &sink, spacing).await;

    let sent = sink.sent.lock().expect("lock");
    for pair in sent.windows(2) {
        assert!(
            pair[1].0.duration_since(pair[0].0) >= spacing,
            "gap shorter than spacing"
        );
    }
    assert!(
        sent[0].0.duration_since(started) < spacing,
        "first command goes out without waiting"
    );
}

#[tokio::test]
async fn empty_batch_sends_nothing() {
    let sink = RecordingSink::default();
    let report = replay(&[], &sink, Duration::from_millis(200)).await;
    assert_eq!(report.attempted(), 0);
    assert!(sink.lines().is_empty());
}
