//! Wire types for the worker session protocol.
//!
//! The session itself is an opaque streaming exchange; these messages
//! only cover the handshake and the periodic usage reports the master
//! consumes. Derived with prost directly, no codegen step.

/// Handshake sent when the master opens a control session.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SessionRequest {
    /// Identity the master advertises to the worker.
    #[prost(string, tag = "1")]
    pub master_id: String,
}

/// One event on the control stream. Payload semantics are opaque to the
/// fleet manager; the stream ending is the only signal it acts on.
#[derive(Clone, PartialEq, prost::Message)]
pub struct SessionEvent {
    #[prost(int32, tag = "1")]
    pub kind: i32,
    #[prost(string, tag = "2")]
    pub detail: String,
}

/// Opens the telemetry feed.
#[derive(Clone, PartialEq, prost::Message)]
pub struct UsageRequest {}

/// Periodic resource-usage report streamed by a worker.
#[derive(Clone, PartialEq, prost::Message)]
pub struct UsageReport {
    #[prost(int32, tag = "1")]
    pub cpu_percent: i32,
    #[prost(int32, tag = "2")]
    pub mem_percent: i32,
    #[prost(int64, tag = "3")]
    pub recorded_at_ms: i64,
}
