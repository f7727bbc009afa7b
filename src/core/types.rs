use crate::core::error::{Result, StrobeError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identity of a metric: the (service, name) pair.
///
/// Both components are non-empty. The canonical string form is
/// `"<service>/<name>"` and is what appears as the key in outbound snapshot
/// messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricKey {
    service: String,
    name: String,
}

impl MetricKey {
    /// Creates a new MetricKey after validation
    pub fn new(service: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let service = service.into();
        let name = name.into();
        if service.is_empty() {
            return Err(StrobeError::InvalidKey("service cannot be empty".to_string()));
        }
        if name.is_empty() {
            return Err(StrobeError::InvalidKey("metric name cannot be empty".to_string()));
        }
        Ok(MetricKey { service, name })
    }

    /// Returns the service component
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Returns the metric name component
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the canonical `service/name` composite form
    pub fn canonical(&self) -> String {
        format!("{}/{}", self.service, self.name)
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.name)
    }
}

/// The kind of a metric. A key is bound to exactly one variant by its first
/// accepted sample; later samples of a different variant are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricVariant {
    Gauge,
    Counter,
    Histogram,
}

impl fmt::Display for MetricVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MetricVariant::Gauge => "gauge",
            MetricVariant::Counter => "counter",
            MetricVariant::Histogram => "histogram",
        };
        write!(f, "{}", s)
    }
}

/// One timestamped scalar observation. 16 bytes, `Copy`; counters are widened
/// to f64 before storage so gauges and counters share this representation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Nanoseconds since the Unix epoch
    pub ts: i64,
    /// Observed value
    pub val: f64,
}

impl Sample {
    pub fn new(ts: i64, val: f64) -> Self {
        Sample { ts, val }
    }
}

/// One timestamped bucketed distribution observation.
///
/// Convention fixed at ingest: `counts.len() == bounds.len()`, bounds strictly
/// ascending, and the last bound acts as the overflow edge (observations above
/// the second-to-last bound land in the final bucket).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramSample {
    /// Nanoseconds since the Unix epoch
    pub ts: i64,
    /// Ascending bucket upper bounds
    pub bounds: Vec<f64>,
    /// Per-bucket observation counts, one per bound
    pub counts: Vec<u64>,
}

impl HistogramSample {
    pub fn new(ts: i64, bounds: Vec<f64>, counts: Vec<u64>) -> Self {
        HistogramSample { ts, bounds, counts }
    }

    /// Whether the sample satisfies the fixed shape convention
    pub fn shape_ok(&self) -> bool {
        if self.bounds.is_empty() || self.counts.len() != self.bounds.len() {
            return false;
        }
        self.bounds.windows(2).all(|w| w[0] < w[1])
    }

    /// Total observations across all buckets
    pub fn total_count(&self) -> u64 {
        self.counts.iter().sum()
    }
}

/// Point-in-time view of the most recent sample of every known metric.
///
/// Each entry was the latest value of its metric at some instant during the
/// snapshot call; entries are not synchronized relative to each other and
/// their ordering is not observable.
#[derive(Debug, Clone, Default)]
pub struct LatestSnapshot {
    pub gauges: HashMap<MetricKey, Sample>,
    pub counters: HashMap<MetricKey, Sample>,
    pub histograms: HashMap<MetricKey, HistogramSample>,
}

impl LatestSnapshot {
    /// Total number of metrics across all variants
    pub fn len(&self) -> usize {
        self.gauges.len() + self.counters.len() + self.histograms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-metric recent windows, up to a caller-chosen number of samples each,
/// oldest first.
#[derive(Debug, Clone, Default)]
pub struct WindowSnapshot {
    pub gauges: HashMap<MetricKey, Vec<Sample>>,
    pub counters: HashMap<MetricKey, Vec<Sample>>,
    pub histograms: HashMap<MetricKey, Vec<HistogramSample>>,
}
