//! Unit tests for `EventStream` subscription and delivery order.

use scene_sync::events::{Diagnostic, DiagnosticLevel, Diagnostics, EventStream};

#[test]
fn delivery_is_fifo_per_subscriber() {
    let stream: EventStream<u32> = EventStream::new();
    let mut first = stream.subscribe();
    let mut second = stream.subscribe();

    for n in 0..5 {
        stream.publish(n);
    }

    for sub in [&mut first, &mut second] {
        let seen: Vec<u32> = std::iter::from_fn(|| sub.try_recv()).collect();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }
}

#[test]
fn late_subscriber_misses_earlier_events() {
    let stream: EventStream<&str> = EventStream::new();
    stream.publish("before");
    let mut sub = stream.subscribe();
    stream.publish("after");

    assert_eq!(sub.try_recv(), Some("after"));
    assert_eq!(sub.try_recv(), None);
}

/// Unsubscribing stops delivery but keeps what was already queued.
#[test]
fn unsubscribe_keeps_queued_events() {
    let stream: EventStream<u8> = EventStream::new();
    let mut sub = stream.subscribe();
    stream.publish(1);

    stream.unsubscribe(sub.id());
    stream.publish(2);

    assert_eq!(sub.try_recv(), Some(1));
    assert_eq!(sub.try_recv(), None);
    assert_eq!(stream.subscriber_count(), 0);
}

#[test]
fn dropped_subscriptions_are_pruned_on_publish() {
    let stream: EventStream<u8> = EventStream::new();
    let sub = stream.subscribe();
    let _kept = stream.subscribe();
    assert_eq!(stream.subscriber_count(), 2);

    drop(sub);
    stream.publish(0);
    assert_eq!(stream.subscriber_count(), 1);
}

#[tokio::test]
async fn recv_waits_for_publish() {
    let stream = std::sync::Arc::new(EventStream::<String>::new());
    let mut sub = stream.subscribe();

    let publisher = std::sync::Arc::clone(&stream);
    tokio::spawn(async move {
        publisher.publish("hello".into());
    });

    let got = tokio::time::timeout(std::time::Duration::from_secs(2), sub.recv())
        .await
        .expect("event before timeout");
    assert_eq!(got.as_deref(), Some("hello"));
}

#[test]
fn diagnostics_carry_level_and_prefix() {
    let diagnostics = Diagnostics::new();
    let mut sub = diagnostics.subscribe();

    diagnostics.info("started client");
    diagnostics.warn("client crashed immediately");

    let info = sub.try_recv().expect("info line");
    let warn = sub.try_recv().expect("warn line");
    assert_eq!(info.level, DiagnosticLevel::Info);
    assert_eq!(info.to_string(), "started client");
    assert_eq!(
        warn,
        Diagnostic {
            level: DiagnosticLevel::Warn,
            message: "client crashed immediately".into()
        }
    );
    assert_eq!(warn.to_string(), "warning: client crashed immediately");
}
