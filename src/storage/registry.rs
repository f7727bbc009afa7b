//! Metric directory: lazy, thread-safe mapping from metric identity to its
//! bounded history.
//!
//! Three maps (one per variant) sit behind a single readers-writer lock.
//! Lookups take the read side; creation takes the write side after a
//! double-checked read, so concurrent creators of the same metric all receive
//! the same ring. A key is bound to the variant of its first accepted sample;
//! requesting it under a different variant yields a typed error and leaves
//! the maps untouched.

use crate::core::error::{Result, StrobeError};
use crate::core::types::{LatestSnapshot, MetricKey, MetricVariant, WindowSnapshot};
use crate::storage::histogram::HistogramRing;
use crate::storage::ring::SampleRing;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Default)]
struct Maps {
    gauges: HashMap<MetricKey, Arc<SampleRing>>,
    counters: HashMap<MetricKey, Arc<SampleRing>>,
    histograms: HashMap<MetricKey, Arc<HistogramRing>>,
}

impl Maps {
    fn bound_variant(&self, key: &MetricKey) -> Option<MetricVariant> {
        if self.gauges.contains_key(key) {
            Some(MetricVariant::Gauge)
        } else if self.counters.contains_key(key) {
            Some(MetricVariant::Counter)
        } else if self.histograms.contains_key(key) {
            Some(MetricVariant::Histogram)
        } else {
            None
        }
    }
}

/// Directory of every known metric and its history.
pub struct MetricRegistry {
    maps: RwLock<Maps>,
    scalar_capacity: usize,
    histogram_capacity: usize,
}

impl MetricRegistry {
    /// Create a registry whose rings use the given capacities.
    pub fn new(scalar_capacity: usize, histogram_capacity: usize) -> Self {
        MetricRegistry {
            maps: RwLock::new(Maps::default()),
            scalar_capacity,
            histogram_capacity,
        }
    }

    /// Registry with the default capacities (1000 scalar, 500 histogram).
    pub fn with_defaults() -> Self {
        Self::new(1000, 500)
    }

    fn conflict(key: &MetricKey, bound: MetricVariant, requested: MetricVariant) -> StrobeError {
        StrobeError::VariantConflict {
            key: key.clone(),
            bound,
            requested,
        }
    }

    /// History for a gauge metric, created on first use.
    pub fn gauge_ring(&self, key: &MetricKey) -> Result<Arc<SampleRing>> {
        {
            let maps = self.maps.read();
            if let Some(ring) = maps.gauges.get(key) {
                return Ok(Arc::clone(ring));
            }
            if let Some(bound) = maps.bound_variant(key) {
                return Err(Self::conflict(key, bound, MetricVariant::Gauge));
            }
        }

        let mut maps = self.maps.write();
        // Double-check after acquiring the write lock.
        if let Some(ring) = maps.gauges.get(key) {
            return Ok(Arc::clone(ring));
        }
        if let Some(bound) = maps.bound_variant(key) {
            return Err(Self::conflict(key, bound, MetricVariant::Gauge));
        }
        let ring = Arc::new(SampleRing::new(self.scalar_capacity));
        maps.gauges.insert(key.clone(), Arc::clone(&ring));
        Ok(ring)
    }

    /// History for a counter metric, created on first use.
    pub fn counter_ring(&self, key: &MetricKey) -> Result<Arc<SampleRing>> {
        {
            let maps = self.maps.read();
            if let Some(ring) = maps.counters.get(key) {
                return Ok(Arc::clone(ring));
            }
            if let Some(bound) = maps.bound_variant(key) {
                return Err(Self::conflict(key, bound, MetricVariant::Counter));
            }
        }

        let mut maps = self.maps.write();
        if let Some(ring) = maps.counters.get(key) {
            return Ok(Arc::clone(ring));
        }
        if let Some(bound) = maps.bound_variant(key) {
            return Err(Self::conflict(key, bound, MetricVariant::Counter));
        }
        let ring = Arc::new(SampleRing::new(self.scalar_capacity));
        maps.counters.insert(key.clone(), Arc::clone(&ring));
        Ok(ring)
    }

    /// History for a histogram metric, created on first use.
    pub fn histogram_ring(&self, key: &MetricKey) -> Result<Arc<HistogramRing>> {
        {
            let maps = self.maps.read();
            if let Some(ring) = maps.histograms.get(key) {
                return Ok(Arc::clone(ring));
            }
            if let Some(bound) = maps.bound_variant(key) {
                return Err(Self::conflict(key, bound, MetricVariant::Histogram));
            }
        }

        let mut maps = self.maps.write();
        if let Some(ring) = maps.histograms.get(key) {
            return Ok(Arc::clone(ring));
        }
        if let Some(bound) = maps.bound_variant(key) {
            return Err(Self::conflict(key, bound, MetricVariant::Histogram));
        }
        let ring = Arc::new(HistogramRing::new(self.histogram_capacity));
        maps.histograms.insert(key.clone(), Arc::clone(&ring));
        Ok(ring)
    }

    /// The variant a key is bound to, if it has one.
    pub fn bound_variant(&self, key: &MetricKey) -> Option<MetricVariant> {
        self.maps.read().bound_variant(key)
    }

    /// Most recent value of every currently known metric. Per-metric
    /// atomic-at-read; metrics are not synchronized relative to each other.
    pub fn latest_snapshot(&self) -> LatestSnapshot {
        let maps = self.maps.read();
        let mut snapshot = LatestSnapshot::default();

        for (key, ring) in &maps.gauges {
            if let Some(sample) = ring.latest() {
                snapshot.gauges.insert(key.clone(), sample);
            }
        }
        for (key, ring) in &maps.counters {
            if let Some(sample) = ring.latest() {
                snapshot.counters.insert(key.clone(), sample);
            }
        }
        for (key, ring) in &maps.histograms {
            if let Some(sample) = ring.latest() {
                snapshot.histograms.insert(key.clone(), sample);
            }
        }

        snapshot
    }

    /// Up to `n_per_metric` most recent samples of every known metric, oldest
    /// first per metric.
    pub fn bounded_snapshot(&self, n_per_metric: usize) -> WindowSnapshot {
        let maps = self.maps.read();
        let mut snapshot = WindowSnapshot::default();

        for (key, ring) in &maps.gauges {
            let window = ring.snapshot_window(n_per_metric);
            if !window.is_empty() {
                snapshot.gauges.insert(key.clone(), window);
            }
        }
        for (key, ring) in &maps.counters {
            let window = ring.snapshot_window(n_per_metric);
            if !window.is_empty() {
                snapshot.counters.insert(key.clone(), window);
            }
        }
        for (key, ring) in &maps.histograms {
            let window = ring.snapshot_window(n_per_metric);
            if !window.is_empty() {
                snapshot.histograms.insert(key.clone(), window);
            }
        }

        snapshot
    }

    /// All known service names. Ordering unspecified.
    pub fn list_services(&self) -> Vec<String> {
        let maps = self.maps.read();
        let mut services = HashSet::new();
        for key in maps
            .gauges
            .keys()
            .chain(maps.counters.keys())
            .chain(maps.histograms.keys())
        {
            services.insert(key.service().to_string());
        }
        services.into_iter().collect()
    }

    /// All known metric names for one service. Ordering unspecified.
    pub fn list_metrics(&self, service: &str) -> Vec<String> {
        let maps = self.maps.read();
        let mut metrics = HashSet::new();
        for key in maps
            .gauges
            .keys()
            .chain(maps.counters.keys())
            .chain(maps.histograms.keys())
        {
            if key.service() == service {
                metrics.insert(key.name().to_string());
            }
        }
        metrics.into_iter().collect()
    }

    /// Total number of known metrics across all variants
    pub fn metric_count(&self) -> usize {
        let maps = self.maps.read();
        maps.gauges.len() + maps.counters.len() + maps.histograms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{HistogramSample, Sample};

    fn key(service: &str, name: &str) -> MetricKey {
        MetricKey::new(service, name).unwrap()
    }

    #[test]
    fn test_creation_is_idempotent() {
        let registry = MetricRegistry::with_defaults();
        let k = key("s1", "g");

        let a = registry.gauge_ring(&k).unwrap();
        let b = registry.gauge_ring(&k).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.metric_count(), 1);
    }

    #[test]
    fn test_variant_conflict_is_typed_and_nonmutating() {
        let registry = MetricRegistry::with_defaults();
        let k = key("s1", "x");

        let gauge = registry.gauge_ring(&k).unwrap();
        gauge.push(Sample::new(1, 1.0));

        let err = registry.counter_ring(&k).unwrap_err();
        match err {
            StrobeError::VariantConflict {
                bound, requested, ..
            } => {
                assert_eq!(bound, MetricVariant::Gauge);
                assert_eq!(requested, MetricVariant::Counter);
            },
            other => panic!("expected variant conflict, got {other}"),
        }

        // The gauge binding and its history are untouched.
        assert_eq!(registry.bound_variant(&k), Some(MetricVariant::Gauge));
        assert_eq!(registry.metric_count(), 1);
        let snapshot = registry.latest_snapshot();
        assert!(snapshot.counters.get(&k).is_none());
        assert_eq!(snapshot.gauges.get(&k).unwrap().val, 1.0);
    }

    #[test]
    fn test_histogram_conflicts_with_scalar() {
        let registry = MetricRegistry::with_defaults();
        let k = key("s1", "latency");

        registry.histogram_ring(&k).unwrap();
        assert!(registry.gauge_ring(&k).is_err());
        assert!(registry.counter_ring(&k).is_err());
        assert_eq!(registry.bound_variant(&k), Some(MetricVariant::Histogram));
    }

    #[test]
    fn test_latest_snapshot_reflects_pushes() {
        let registry = MetricRegistry::with_defaults();

        registry
            .gauge_ring(&key("s1", "g"))
            .unwrap()
            .push(Sample::new(1000, 3.14));
        registry
            .counter_ring(&key("s1", "c"))
            .unwrap()
            .push(Sample::new(1001, 42.0));
        registry
            .histogram_ring(&key("s1", "h"))
            .unwrap()
            .push(HistogramSample::new(1002, vec![1.0, 2.0], vec![5, 3]));

        let snapshot = registry.latest_snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.gauges.get(&key("s1", "g")).unwrap().val, 3.14);
        assert_eq!(snapshot.counters.get(&key("s1", "c")).unwrap().val, 42.0);
        assert_eq!(
            snapshot.histograms.get(&key("s1", "h")).unwrap().counts,
            vec![5, 3]
        );
    }

    #[test]
    fn test_empty_rings_absent_from_snapshot() {
        let registry = MetricRegistry::with_defaults();
        registry.gauge_ring(&key("s1", "g")).unwrap();

        let snapshot = registry.latest_snapshot();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_bounded_snapshot_windows() {
        let registry = MetricRegistry::new(4, 4);
        let ring = registry.gauge_ring(&key("s1", "g")).unwrap();
        for i in 1..=6i64 {
            ring.push(Sample::new(i, i as f64));
        }

        let snapshot = registry.bounded_snapshot(3);
        let window = snapshot.gauges.get(&key("s1", "g")).unwrap();
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].ts, 4);
        assert_eq!(window[2].ts, 6);
    }

    #[test]
    fn test_enumeration() {
        let registry = MetricRegistry::with_defaults();
        registry.gauge_ring(&key("api", "rps")).unwrap();
        registry.counter_ring(&key("api", "errors")).unwrap();
        registry.gauge_ring(&key("db", "connections")).unwrap();

        let mut services = registry.list_services();
        services.sort();
        assert_eq!(services, vec!["api", "db"]);

        let mut metrics = registry.list_metrics("api");
        metrics.sort();
        assert_eq!(metrics, vec!["errors", "rps"]);
        assert!(registry.list_metrics("unknown").is_empty());
    }

    #[test]
    fn test_concurrent_creation_yields_one_ring() {
        use std::thread;

        let registry = Arc::new(MetricRegistry::with_defaults());
        let k = key("s1", "shared");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let k = k.clone();
                thread::spawn(move || registry.gauge_ring(&k).unwrap())
            })
            .collect();

        let rings: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for ring in &rings[1..] {
            assert!(Arc::ptr_eq(&rings[0], ring));
        }
        assert_eq!(registry.metric_count(), 1);
    }
}
