//! Pull-based scrape surface.
//!
//! Renders the registry's latest snapshot in Prometheus text exposition
//! format (v0.0.4) together with the aggregator's own operational counters,
//! served on a dedicated HTTP port.

use crate::broker::SubscriptionBroker;
use crate::core::error::{Result, StrobeError};
use crate::core::types::{HistogramSample, MetricKey, Sample};
use crate::ingest::IngestStats;
use crate::storage::MetricRegistry;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

/// Everything the scrape endpoint reads from.
#[derive(Clone)]
pub struct ExportState {
    pub registry: Arc<MetricRegistry>,
    pub broker: Arc<SubscriptionBroker>,
    pub stats: Arc<IngestStats>,
}

/// Router exposing `/metrics` and a liveness probe.
pub fn router(state: ExportState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(|| async { "OK" }))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state)
}

/// Serve the scrape endpoint until the shutdown signal flips.
pub async fn serve(addr: SocketAddr, state: ExportState, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "scrape endpoint listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .map_err(StrobeError::Io)?;
    Ok(())
}

async fn metrics_handler(State(state): State<ExportState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        render(&state),
    )
}

/// Render the full exposition document.
pub fn render(state: &ExportState) -> String {
    let snapshot = state.registry.latest_snapshot();
    let mut out = String::with_capacity(8192);

    write_scalar_family(
        &mut out,
        "telemetry_gauge",
        "Latest gauge sample per metric",
        "gauge",
        &snapshot.gauges,
    );
    write_scalar_family(
        &mut out,
        "telemetry_counter",
        "Latest counter total per metric",
        "gauge",
        &snapshot.counters,
    );
    write_histograms(&mut out, &snapshot.histograms);
    write_self_metrics(&mut out, state);

    out
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn write_scalar_family(
    out: &mut String,
    name: &str,
    help: &str,
    typ: &str,
    entries: &HashMap<MetricKey, Sample>,
) {
    if entries.is_empty() {
        return;
    }
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {typ}");
    for (key, sample) in entries {
        let _ = writeln!(
            out,
            "{name}{{service=\"{}\",metric=\"{}\"}} {}",
            escape_label(key.service()),
            escape_label(key.name()),
            sample.val
        );
    }
}

fn write_histograms(out: &mut String, entries: &HashMap<MetricKey, HistogramSample>) {
    if entries.is_empty() {
        return;
    }
    let _ = writeln!(out, "# HELP telemetry_histogram Latest histogram sample per metric");
    let _ = writeln!(out, "# TYPE telemetry_histogram histogram");
    for (key, sample) in entries {
        let service = escape_label(key.service());
        let metric = escape_label(key.name());
        let mut cumulative = 0u64;
        // The final bucket is the overflow slot, rendered as +Inf.
        for (i, count) in sample.counts.iter().enumerate() {
            cumulative += count;
            if i + 1 == sample.counts.len() {
                let _ = writeln!(
                    out,
                    "telemetry_histogram_bucket{{service=\"{service}\",metric=\"{metric}\",le=\"+Inf\"}} {cumulative}"
                );
            } else {
                let _ = writeln!(
                    out,
                    "telemetry_histogram_bucket{{service=\"{service}\",metric=\"{metric}\",le=\"{}\"}} {cumulative}",
                    sample.bounds[i]
                );
            }
        }
        let _ = writeln!(
            out,
            "telemetry_histogram_count{{service=\"{service}\",metric=\"{metric}\"}} {}",
            sample.total_count()
        );
    }
}

fn write_counter(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} counter");
    let _ = writeln!(out, "{name} {value}");
}

fn write_gauge(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
    let _ = writeln!(out, "{name} {value}");
}

fn write_self_metrics(out: &mut String, state: &ExportState) {
    write_gauge(
        out,
        "aggregator_active_subscribers",
        "Number of connected snapshot subscribers",
        state.broker.subscriber_count() as u64,
    );
    write_gauge(
        out,
        "aggregator_known_metrics",
        "Number of metrics in the registry",
        state.registry.metric_count() as u64,
    );
    write_counter(
        out,
        "aggregator_snapshots_dropped_total",
        "Snapshot messages dropped due to full mailboxes",
        state.broker.total_drops(),
    );
    write_counter(
        out,
        "aggregator_ingest_batches_total",
        "Telemetry batches processed",
        state.stats.batches(),
    );
    write_counter(
        out,
        "aggregator_ingest_samples_total",
        "Telemetry samples seen",
        state.stats.samples(),
    );
    write_counter(
        out,
        "aggregator_variant_conflicts_total",
        "Samples dropped due to metric variant conflicts",
        state.stats.variant_conflicts(),
    );
    write_counter(
        out,
        "aggregator_malformed_histograms_total",
        "Histogram samples dropped for shape or bounds violations",
        state.stats.malformed_histograms(),
    );
}
