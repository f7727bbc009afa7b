//! End-to-end pipeline tests: ingest routing through the registry, the
//! broadcast scheduler, and subscriber mailboxes.

use std::sync::Arc;
use std::time::Duration;
use strobe_lib::broadcast::BroadcastScheduler;
use strobe_lib::broker::SubscriptionBroker;
use strobe_lib::core::types::MetricKey;
use strobe_lib::ingest::IngestRouter;
use strobe_lib::proto::telemetry::v1 as pb;
use strobe_lib::storage::MetricRegistry;
use tokio::sync::{mpsc, watch};

fn key(service: &str, name: &str) -> MetricKey {
    MetricKey::new(service, name).unwrap()
}

fn gauge_batch(service: &str, name: &str, ts: u64, val: f64) -> pb::TelemetryBatch {
    pb::TelemetryBatch {
        service: service.to_string(),
        instance: "i-1".to_string(),
        metrics: vec![pb::Metric {
            name: name.to_string(),
            labels: Default::default(),
            samples: vec![pb::MetricSample {
                timestamp_ns: ts,
                value: Some(pb::metric_sample::Value::Gauge(val)),
            }],
        }],
    }
}

fn counter_batch(service: &str, name: &str, ts: u64, val: u64) -> pb::TelemetryBatch {
    pb::TelemetryBatch {
        service: service.to_string(),
        instance: "i-1".to_string(),
        metrics: vec![pb::Metric {
            name: name.to_string(),
            labels: Default::default(),
            samples: vec![pb::MetricSample {
                timestamp_ns: ts,
                value: Some(pb::metric_sample::Value::Counter(val)),
            }],
        }],
    }
}

/// Wait until a mailbox yields a message satisfying `pred`, or panic.
async fn expect_message<F>(rx: &mut mpsc::Receiver<String>, mut pred: F) -> serde_json::Value
where
    F: FnMut(&serde_json::Value) -> bool,
{
    let deadline = Duration::from_secs(2);
    tokio::time::timeout(deadline, async {
        loop {
            let raw = rx.recv().await.expect("mailbox closed while waiting");
            for part in raw.split('\n') {
                let value: serde_json::Value = serde_json::from_str(part).unwrap();
                if pred(&value) {
                    return value;
                }
            }
        }
    })
    .await
    .expect("no matching snapshot before deadline")
}

#[test]
fn single_gauge_reaches_latest_snapshot() {
    let registry = Arc::new(MetricRegistry::with_defaults());
    let broker = Arc::new(SubscriptionBroker::new(8, 8));
    let router = IngestRouter::new(Arc::clone(&registry), broker);

    router.route_batch(&gauge_batch("s1", "g", 1000, 3.14));

    let snapshot = registry.latest_snapshot();
    let sample = snapshot.gauges.get(&key("s1", "g")).unwrap();
    assert_eq!(sample.ts, 1000);
    assert_eq!(sample.val, 3.14);
}

#[test]
fn variant_conflict_counts_once_and_preserves_binding() {
    let registry = Arc::new(MetricRegistry::with_defaults());
    let broker = Arc::new(SubscriptionBroker::new(8, 8));
    let router = IngestRouter::new(Arc::clone(&registry), broker);

    router.route_batch(&gauge_batch("s1", "x", 1, 1.5));
    router.route_batch(&counter_batch("s1", "x", 2, 9));

    assert_eq!(router.stats().variant_conflicts(), 1);
    let snapshot = registry.latest_snapshot();
    assert_eq!(snapshot.gauges.get(&key("s1", "x")).unwrap().val, 1.5);
    assert!(snapshot.counters.get(&key("s1", "x")).is_none());
}

#[test]
fn wraparound_window_keeps_most_recent() {
    let registry = Arc::new(MetricRegistry::new(4, 4));
    let broker = Arc::new(SubscriptionBroker::new(8, 8));
    let router = IngestRouter::new(Arc::clone(&registry), broker);

    for i in 1..=6u64 {
        router.route_batch(&gauge_batch("s1", "g", i, i as f64));
    }

    let ring = registry.gauge_ring(&key("s1", "g")).unwrap();
    assert_eq!(ring.count(), 6);
    assert_eq!(ring.len(), 4);
    let window = ring.snapshot_window(10);
    assert_eq!(
        window.iter().map(|s| s.ts).collect::<Vec<_>>(),
        vec![3, 4, 5, 6]
    );
}

#[tokio::test]
async fn filtered_broadcast_delivers_matching_entries_only() {
    let registry = Arc::new(MetricRegistry::with_defaults());
    let broker = Arc::new(SubscriptionBroker::new(64, 8));
    let router = IngestRouter::new(Arc::clone(&registry), Arc::clone(&broker));

    router.route_batch(&gauge_batch("s1", "a", 1, 1.0));
    router.route_batch(&gauge_batch("s1", "b", 2, 2.0));

    let (subscriber, mut rx) = broker.register();
    broker.set_subscription(subscriber.id(), vec![key("s1", "a")]);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = BroadcastScheduler::new(
        Arc::clone(&registry),
        Arc::clone(&broker),
        Duration::from_millis(5),
        shutdown_rx,
    );
    let handle = tokio::spawn(scheduler.run());

    let message = expect_message(&mut rx, |value| {
        value["gauges"].as_object().is_some_and(|g| !g.is_empty())
    })
    .await;

    assert_eq!(message["type"], "snapshot");
    assert_eq!(message["gauges"]["s1/a"]["val"], 1.0);
    assert!(message["gauges"].as_object().unwrap().get("s1/b").is_none());

    shutdown_tx.send(true).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
}

#[tokio::test]
async fn empty_filter_receives_full_snapshot_every_tick() {
    let registry = Arc::new(MetricRegistry::with_defaults());
    let broker = Arc::new(SubscriptionBroker::new(64, 8));
    let router = IngestRouter::new(Arc::clone(&registry), Arc::clone(&broker));

    router.route_batch(&gauge_batch("s1", "a", 1, 1.0));
    router.route_batch(&counter_batch("s1", "hits", 2, 5));

    let (_subscriber, mut rx) = broker.register();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = BroadcastScheduler::new(
        Arc::clone(&registry),
        Arc::clone(&broker),
        Duration::from_millis(5),
        shutdown_rx,
    );
    let handle = tokio::spawn(scheduler.run());

    let message = expect_message(&mut rx, |value| {
        value["gauges"].as_object().is_some_and(|g| !g.is_empty())
            && value["counters"].as_object().is_some_and(|c| !c.is_empty())
    })
    .await;

    assert_eq!(message["gauges"]["s1/a"]["val"], 1.0);
    assert_eq!(message["counters"]["s1/hits"]["val"], 5.0);

    shutdown_tx.send(true).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
}

#[tokio::test]
async fn saturated_mailbox_drops_without_disconnecting() {
    let registry = Arc::new(MetricRegistry::with_defaults());
    let broker = Arc::new(SubscriptionBroker::new(2, 8));
    let router = IngestRouter::new(Arc::clone(&registry), Arc::clone(&broker));

    router.route_batch(&gauge_batch("s1", "g", 1, 1.0));

    // Register a subscriber that never consumes its mailbox.
    let (subscriber, mut rx) = broker.register();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = BroadcastScheduler::new(
        Arc::clone(&registry),
        Arc::clone(&broker),
        Duration::from_millis(1),
        shutdown_rx,
    );
    let handle = tokio::spawn(scheduler.run());

    // Let plenty of ticks fire against the capacity-2 mailbox.
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown_tx.send(true).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;

    assert!(subscriber.is_connected());
    assert!(subscriber.dropped() >= 3);

    // At most the mailbox capacity is queued.
    let mut queued = 0;
    while rx.try_recv().is_ok() {
        queued += 1;
    }
    assert!(queued <= 2);
    assert!(queued >= 1);
}

#[tokio::test]
async fn later_ticks_supersede_earlier_ones() {
    let registry = Arc::new(MetricRegistry::with_defaults());
    let broker = Arc::new(SubscriptionBroker::new(256, 8));
    let router = IngestRouter::new(Arc::clone(&registry), Arc::clone(&broker));

    let (_subscriber, mut rx) = broker.register();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = BroadcastScheduler::new(
        Arc::clone(&registry),
        Arc::clone(&broker),
        Duration::from_millis(2),
        shutdown_rx,
    );
    let handle = tokio::spawn(scheduler.run());

    for i in 1..=20u64 {
        router.route_batch(&gauge_batch("s1", "g", i, i as f64));
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    // Wait until a tick reflecting the final value arrives.
    expect_message(&mut rx, |value| {
        value["gauges"]
            .as_object()
            .and_then(|g| g.get("s1/g"))
            .and_then(|s| s["val"].as_f64())
            == Some(20.0)
    })
    .await;

    shutdown_tx.send(true).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;

    // Per-subscriber tick timestamps never go backwards.
    let mut last_ts = i64::MIN;
    while let Ok(raw) = rx.try_recv() {
        for part in raw.split('\n') {
            let value: serde_json::Value = serde_json::from_str(part).unwrap();
            let ts = value["timestamp"].as_i64().unwrap();
            assert!(ts >= last_ts);
            last_ts = ts;
        }
    }
}
