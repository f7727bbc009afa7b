//! In-memory metric storage.
//!
//! This module provides the bounded per-metric histories and the registry
//! that owns them:
//! - `ring`: lock-free scalar history (gauges, counters)
//! - `histogram`: mutex-guarded histogram history
//! - `registry`: lazy directory from metric identity to history

pub mod histogram;
pub mod registry;
pub mod ring;

pub use histogram::HistogramRing;
pub use registry::MetricRegistry;
pub use ring::SampleRing;
