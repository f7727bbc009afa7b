use crate::core::types::{MetricKey, MetricVariant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StrobeError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid metric key: {0}")]
    InvalidKey(String),

    #[error("variant conflict for {key}: bound as {bound}, sample is {requested}")]
    VariantConflict {
        key: MetricKey,
        bound: MetricVariant,
        requested: MetricVariant,
    },

    #[error("malformed histogram for {key}: {bounds} bounds, {counts} counts")]
    HistogramShape {
        key: MetricKey,
        bounds: usize,
        counts: usize,
    },

    #[error("histogram bounds for {key} changed after first push")]
    BoundsMismatch { key: MetricKey },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("GRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("async task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("channel closed")]
    ChannelClosed,

    #[error("timeout: operation took longer than {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Result type alias for strobe operations
pub type Result<T> = std::result::Result<T, StrobeError>;

impl StrobeError {
    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new transport error
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::Transport(msg.into())
    }

    /// Creates a new authentication error
    pub fn auth<S: Into<String>>(msg: S) -> Self {
        Self::Auth(msg.into())
    }

    /// Returns true if this error is handled locally by dropping or counting
    /// rather than terminating a stream
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::VariantConflict { .. } | Self::HistogramShape { .. } | Self::BoundsMismatch { .. } => true,
            Self::Timeout { .. } => true,
            Self::Grpc(status) => {
                matches!(status.code(), tonic::Code::Unavailable | tonic::Code::DeadlineExceeded)
            },
            _ => false,
        }
    }

    /// Returns the error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::InvalidKey(_) => "validation",
            Self::VariantConflict { .. } => "variant_conflict",
            Self::HistogramShape { .. } | Self::BoundsMismatch { .. } => "histogram",
            Self::Transport(_) => "transport",
            Self::Auth(_) => "auth",
            Self::Grpc(_) => "grpc",
            Self::Serialization(_) => "serialization",
            Self::Io(_) => "io",
            Self::Join(_) => "async",
            Self::ChannelClosed => "channel",
            Self::Timeout { .. } => "timeout",
        }
    }
}
