//! Strobe - real-time telemetry aggregator.
//!
//! Strobe ingests metric batches streamed from many service instances, keeps
//! a short bounded history per metric in memory, and fans out point-in-time
//! snapshots to live dashboard clients at a fixed visual tick rate while also
//! exposing the data in a pull-based scrape format.
//!
//! # Features
//!
//! - **Streaming ingest**: client-streaming gRPC with API-key authentication
//! - **Bounded memory**: lock-free per-metric ring buffers, silent overwrite
//! - **Live fan-out**: ~60Hz filtered snapshots over WebSocket with
//!   drop-on-full backpressure
//! - **Scrape surface**: Prometheus text exposition of the latest values
//!
//! # Architecture
//!
//! The pipeline is composed leaves-first:
//! - `storage`: per-metric bounded histories and the metric registry
//! - `ingest`: batch router, transport seam, and authentication
//! - `broker`: subscriber lifecycle and bounded mailboxes
//! - `broadcast`: the fixed-rate snapshot scheduler
//! - `ws` / `export`: subscriber and scrape transports
//! - `core`: shared types, errors, and configuration
//!
//! # Example
//!
//! ```
//! use strobe_lib::core::{MetricKey, Sample};
//! use strobe_lib::storage::MetricRegistry;
//!
//! let registry = MetricRegistry::with_defaults();
//! let key = MetricKey::new("checkout", "latency_ms").unwrap();
//! registry.gauge_ring(&key).unwrap().push(Sample::new(1_000, 12.5));
//! assert_eq!(registry.latest_snapshot().gauges[&key].val, 12.5);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod broadcast;
pub mod broker;
pub mod cli;
pub mod core;
pub mod export;
pub mod ingest;
pub mod proto;
pub mod storage;
pub mod ws;

pub use crate::broadcast::BroadcastScheduler;
pub use crate::broker::SubscriptionBroker;
pub use crate::core::{Config, Result, StrobeError};
pub use crate::ingest::{IngestRouter, IngestService};
pub use crate::storage::MetricRegistry;
