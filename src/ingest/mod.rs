//! Ingest adapter: routes deserialized telemetry batches into the registry.
//!
//! The router consumes batches through the [`BatchStream`] seam so the core
//! never touches wire framing; the gRPC transport plugs in through the
//! vendored service bindings. Recoverable problems (variant conflicts,
//! malformed histograms, invalid keys) drop the offending sample, bump a
//! counter, and never abort the batch.

pub mod auth;

use crate::broker::SubscriptionBroker;
use crate::core::error::{Result, StrobeError};
use crate::core::types::{HistogramSample, MetricKey, Sample};
use crate::proto::telemetry::v1 as pb;
use crate::storage::MetricRegistry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tonic::{Request, Response, Status, Streaming};

/// Counters for recoverable ingest problems.
#[derive(Debug, Default)]
pub struct IngestStats {
    batches: AtomicU64,
    samples: AtomicU64,
    variant_conflicts: AtomicU64,
    malformed_histograms: AtomicU64,
    invalid_keys: AtomicU64,
}

impl IngestStats {
    /// Batches processed
    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    /// Samples seen across all batches
    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    /// Samples dropped because their variant differed from the bound one
    pub fn variant_conflicts(&self) -> u64 {
        self.variant_conflicts.load(Ordering::Relaxed)
    }

    /// Histogram samples dropped for shape or bounds violations
    pub fn malformed_histograms(&self) -> u64 {
        self.malformed_histograms.load(Ordering::Relaxed)
    }

    /// Samples dropped because service or metric name was empty
    pub fn invalid_keys(&self) -> u64 {
        self.invalid_keys.load(Ordering::Relaxed)
    }
}

/// Routes authenticated batches into per-metric histories and hints the
/// broadcast side that fresh data arrived.
pub struct IngestRouter {
    registry: Arc<MetricRegistry>,
    broker: Arc<SubscriptionBroker>,
    stats: Arc<IngestStats>,
}

impl IngestRouter {
    pub fn new(registry: Arc<MetricRegistry>, broker: Arc<SubscriptionBroker>) -> Self {
        IngestRouter {
            registry,
            broker,
            stats: Arc::new(IngestStats::default()),
        }
    }

    /// Shared handle to the ingest counters
    pub fn stats(&self) -> Arc<IngestStats> {
        Arc::clone(&self.stats)
    }

    /// Route one batch. Bad samples are dropped and counted; the batch as a
    /// whole always succeeds.
    pub fn route_batch(&self, batch: &pb::TelemetryBatch) {
        for metric in &batch.metrics {
            self.route_metric(&batch.service, metric);
        }
        self.stats.batches.fetch_add(1, Ordering::Relaxed);
        // Hint the scheduler that this service has fresh data; dropped when
        // the channel is full.
        self.broker.notify_update(&batch.service);
    }

    fn route_metric(&self, service: &str, metric: &pb::Metric) {
        self.stats
            .samples
            .fetch_add(metric.samples.len() as u64, Ordering::Relaxed);

        let key = match MetricKey::new(service, &metric.name) {
            Ok(key) => key,
            Err(err) => {
                self.stats
                    .invalid_keys
                    .fetch_add(metric.samples.len() as u64, Ordering::Relaxed);
                tracing::debug!(service, metric = %metric.name, error = %err, "dropping samples with invalid key");
                return;
            },
        };

        for sample in &metric.samples {
            let Some(value) = &sample.value else { continue };
            let ts = sample.timestamp_ns as i64;
            match value {
                pb::metric_sample::Value::Gauge(v) => match self.registry.gauge_ring(&key) {
                    Ok(ring) => ring.push(Sample::new(ts, *v)),
                    Err(err) => self.record_conflict(&key, err),
                },
                pb::metric_sample::Value::Counter(v) => match self.registry.counter_ring(&key) {
                    // Counters are widened to f64 so both scalar variants
                    // share one storage representation.
                    Ok(ring) => ring.push(Sample::new(ts, *v as f64)),
                    Err(err) => self.record_conflict(&key, err),
                },
                pb::metric_sample::Value::Histogram(h) => self.push_histogram(&key, ts, h),
            }
        }
    }

    fn push_histogram(&self, key: &MetricKey, ts: i64, histogram: &pb::Histogram) {
        let sample = HistogramSample::new(ts, histogram.bounds.clone(), histogram.counts.clone());
        if !sample.shape_ok() {
            self.stats
                .malformed_histograms
                .fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                key = %key,
                bounds = sample.bounds.len(),
                counts = sample.counts.len(),
                "dropping malformed histogram sample"
            );
            return;
        }

        match self.registry.histogram_ring(key) {
            Ok(ring) => {
                if !ring.push(sample) {
                    self.stats
                        .malformed_histograms
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(key = %key, "dropping histogram whose bounds changed after first push");
                }
            },
            Err(err) => self.record_conflict(key, err),
        }
    }

    fn record_conflict(&self, key: &MetricKey, err: StrobeError) {
        self.stats.variant_conflicts.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(key = %key, error = %err, "dropping sample with variant conflict");
    }

    /// Drain one ingest stream. A clean close is acknowledged positively;
    /// transport failures terminate the stream without an Ack.
    pub async fn serve_stream<S: BatchStream>(&self, mut stream: S) -> Result<pb::Ack> {
        loop {
            match stream.next_batch().await {
                Ok(Some(batch)) => {
                    tracing::debug!(
                        service = %batch.service,
                        instance = %batch.instance,
                        metrics = batch.metrics.len(),
                        "received batch"
                    );
                    self.route_batch(&batch);
                },
                Ok(None) => return Ok(pb::Ack { ok: true }),
                Err(err) => {
                    tracing::warn!(error = %err, "ingest stream failed");
                    return Err(err);
                },
            }
        }
    }
}

/// Transport seam: anything that can yield deserialized batches.
#[tonic::async_trait]
pub trait BatchStream: Send {
    /// Next batch; `Ok(None)` is a clean end of stream.
    async fn next_batch(&mut self) -> Result<Option<pb::TelemetryBatch>>;
}

#[tonic::async_trait]
impl BatchStream for Streaming<pb::TelemetryBatch> {
    async fn next_batch(&mut self) -> Result<Option<pb::TelemetryBatch>> {
        self.message().await.map_err(StrobeError::from)
    }
}

/// gRPC surface for the ingest contract.
pub struct IngestService {
    router: Arc<IngestRouter>,
}

impl IngestService {
    pub fn new(router: Arc<IngestRouter>) -> Self {
        IngestService { router }
    }
}

#[tonic::async_trait]
impl pb::telemetry_ingestor_server::TelemetryIngestor for IngestService {
    async fn stream_telemetry(
        &self,
        request: Request<Streaming<pb::TelemetryBatch>>,
    ) -> std::result::Result<Response<pb::Ack>, Status> {
        let stream = request.into_inner();
        match self.router.serve_stream(stream).await {
            Ok(ack) => Ok(Response::new(ack)),
            Err(StrobeError::Grpc(status)) => Err(status),
            Err(err) => Err(Status::internal(err.to_string())),
        }
    }
}
