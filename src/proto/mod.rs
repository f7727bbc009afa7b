//! Vendored protobuf/gRPC bindings for the telemetry ingest contract.
//!
//! The source of truth is `proto/telemetry.proto` at the repository root; the
//! generated bindings are checked in so builds do not depend on `protoc`.

#[allow(missing_docs, clippy::all)]
pub mod telemetry {
    pub mod v1 {
        include!("telemetry.v1.rs");
    }
}
