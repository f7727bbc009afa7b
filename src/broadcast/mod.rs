//! Fixed-cadence snapshot fan-out.
//!
//! One scheduler task harvests the latest value of every metric once per
//! tick, builds a filtered view per subscriber, and offers it to each
//! mailbox without blocking. Messages to one subscriber arrive in tick
//! order; a tick skipped because a mailbox was full is superseded by the
//! next one, so dropping is safe for live-dashboard purposes.

use crate::broker::{Subscriber, SubscriptionBroker};
use crate::core::error::Result;
use crate::core::types::{LatestSnapshot, MetricKey};
use crate::storage::MetricRegistry;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

/// One scalar entry of an outbound snapshot.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ScalarPoint {
    pub ts: i64,
    pub val: f64,
}

/// One histogram entry of an outbound snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct HistogramPoint {
    pub ts: i64,
    pub bounds: Vec<f64>,
    pub counts: Vec<u64>,
}

/// Outbound snapshot message. Keys use the canonical `service/metric` form.
#[derive(Debug, Serialize)]
pub struct SnapshotMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub timestamp: i64,
    pub gauges: HashMap<String, ScalarPoint>,
    pub counters: HashMap<String, ScalarPoint>,
    pub histograms: HashMap<String, HistogramPoint>,
}

impl SnapshotMessage {
    /// Build the per-subscriber view of one tick's snapshot. An empty filter
    /// includes every entry.
    pub fn build(snapshot: &LatestSnapshot, filter: &[MetricKey], timestamp: i64) -> Self {
        let mut message = SnapshotMessage {
            kind: "snapshot",
            timestamp,
            gauges: HashMap::new(),
            counters: HashMap::new(),
            histograms: HashMap::new(),
        };

        if filter.is_empty() {
            for (key, sample) in &snapshot.gauges {
                message
                    .gauges
                    .insert(key.canonical(), ScalarPoint { ts: sample.ts, val: sample.val });
            }
            for (key, sample) in &snapshot.counters {
                message
                    .counters
                    .insert(key.canonical(), ScalarPoint { ts: sample.ts, val: sample.val });
            }
            for (key, sample) in &snapshot.histograms {
                message.histograms.insert(
                    key.canonical(),
                    HistogramPoint {
                        ts: sample.ts,
                        bounds: sample.bounds.clone(),
                        counts: sample.counts.clone(),
                    },
                );
            }
            return message;
        }

        for key in filter {
            if let Some(sample) = snapshot.gauges.get(key) {
                message
                    .gauges
                    .insert(key.canonical(), ScalarPoint { ts: sample.ts, val: sample.val });
            }
            if let Some(sample) = snapshot.counters.get(key) {
                message
                    .counters
                    .insert(key.canonical(), ScalarPoint { ts: sample.ts, val: sample.val });
            }
            if let Some(sample) = snapshot.histograms.get(key) {
                message.histograms.insert(
                    key.canonical(),
                    HistogramPoint {
                        ts: sample.ts,
                        bounds: sample.bounds.clone(),
                        counts: sample.counts.clone(),
                    },
                );
            }
        }

        message
    }

    /// Encode to the wire JSON form
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Into::into)
    }
}

/// Produces live snapshots at a fixed visual cadence.
pub struct BroadcastScheduler {
    registry: Arc<MetricRegistry>,
    broker: Arc<SubscriptionBroker>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl BroadcastScheduler {
    pub fn new(
        registry: Arc<MetricRegistry>,
        broker: Arc<SubscriptionBroker>,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        BroadcastScheduler {
            registry,
            broker,
            interval,
            shutdown,
        }
    }

    /// Run until the shutdown signal flips. Fixed-rate semantics: a tick that
    /// overruns delays the next one; missed ticks are not replayed.
    pub async fn run(self) {
        let BroadcastScheduler {
            registry,
            broker,
            interval,
            mut shutdown,
        } = self;

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut updates = broker.take_update_receiver();

        tracing::info!(interval = ?interval, "broadcast scheduler started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(rx) = updates.as_mut() {
                        drain_hints(rx);
                    }
                    run_tick(&registry, &broker);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("broadcast scheduler stopping");
                        return;
                    }
                }
            }
        }
    }
}

/// One tick: a single registry snapshot shared across subscribers, the
/// empty-filter encoding computed at most once.
fn run_tick(registry: &MetricRegistry, broker: &SubscriptionBroker) {
    let snapshot = registry.latest_snapshot();
    let timestamp = unix_nanos();

    let mut full: Option<String> = None;
    broker.broadcast(|subscriber: &Subscriber| {
        let filter = subscriber.filter();
        if filter.is_empty() {
            if full.is_none() {
                full = encode_or_log(&SnapshotMessage::build(&snapshot, &[], timestamp));
            }
            full.clone()
        } else {
            encode_or_log(&SnapshotMessage::build(&snapshot, &filter, timestamp))
        }
    });
}

/// Ingest hints are drained and ignored for now; the channel exists so a
/// later revision can accelerate a tick for the named service.
fn drain_hints(updates: &mut mpsc::Receiver<String>) {
    while updates.try_recv().is_ok() {}
}

fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

fn encode_or_log(message: &SnapshotMessage) -> Option<String> {
    match message.encode() {
        Ok(encoded) => Some(encoded),
        Err(err) => {
            tracing::error!(error = %err, "failed to encode snapshot message");
            None
        },
    }
}
