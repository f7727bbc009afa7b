//! Core domain models for strobe.
//!
//! This module contains the fundamental types shared by every stage of the
//! telemetry pipeline: metric identity, sample shapes, snapshots, errors, and
//! configuration.

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{Config, ConfigBuilder};
pub use error::{Result, StrobeError};
pub use types::{
    HistogramSample, LatestSnapshot, MetricKey, MetricVariant, Sample, WindowSnapshot,
};
