//! Worker session transport.
//!
//! A transport turns a [`WorkerEndpoint`] into a live connection: a
//! control handle that runs until the underlying session ends, plus the
//! telemetry feed. The gRPC implementation opens both as server-streaming
//! calls over one tonic channel; tests substitute channel-backed fakes
//! through the same trait.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use thiserror::Error;
use tonic::{
    client::Grpc,
    codec::ProstCodec,
    codegen::http::uri::PathAndQuery,
    transport::{Channel, Endpoint},
    Request, Status,
};
use tracing::trace;

use crate::{
    config::ConnectOptions,
    endpoint::WorkerEndpoint,
    messages::{SessionEvent, SessionRequest, UsageReport, UsageRequest},
};

const SESSION_PATH: &str = "/buildfleet.Worker/Session";
const USAGE_PATH: &str = "/buildfleet.Worker/Usage";

/// Transient, per-session failures. None of these affect other sessions
/// or the membership watch.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to dial worker at {addr}")]
    Dial {
        addr: String,
        #[source]
        source: tonic::transport::Error,
    },
    #[error("worker channel failure: {0}")]
    Channel(#[from] tonic::transport::Error),
    #[error("worker stream failure: {0}")]
    Stream(#[from] Status),
}

/// One point-in-time resource-usage record from a worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UsageSample {
    pub cpu_percent: i32,
    pub mem_percent: i32,
    pub recorded_at_ms: i64,
}

impl From<UsageReport> for UsageSample {
    fn from(report: UsageReport) -> Self {
        Self {
            cpu_percent: report.cpu_percent,
            mem_percent: report.mem_percent,
            recorded_at_ms: report.recorded_at_ms,
        }
    }
}

/// Per-session telemetry feed. FIFO within the session; ends with `None`
/// on a clean close and with an error item on a mid-stream failure.
pub type UsageFeed = Pin<Box<dyn Stream<Item = Result<UsageSample, SessionError>> + Send>>;

/// Control half of a worker session.
#[async_trait]
pub trait SessionControl: Send {
    /// Drive the session until the underlying connection ends.
    async fn run(self: Box<Self>) -> Result<(), SessionError>;
}

/// A freshly established connection to one worker.
pub struct WorkerConnection {
    pub control: Box<dyn SessionControl>,
    pub usage: UsageFeed,
}

/// Dials worker endpoints and opens sessions.
#[async_trait]
pub trait WorkerTransport: Send + Sync + 'static {
    async fn connect(&self, endpoint: &WorkerEndpoint) -> Result<WorkerConnection, SessionError>;
}

/// gRPC transport over a tonic channel.
pub struct GrpcTransport {
    options: ConnectOptions,
    master_id: String,
}

impl GrpcTransport {
    pub fn new(options: ConnectOptions, master_id: impl Into<String>) -> Self {
        Self {
            options,
            master_id: master_id.into(),
        }
    }
}

#[async_trait]
impl WorkerTransport for GrpcTransport {
    async fn connect(&self, endpoint: &WorkerEndpoint) -> Result<WorkerConnection, SessionError> {
        let channel = Endpoint::from_shared(endpoint.uri(self.options.tls))
            .map_err(|source| SessionError::Dial {
                addr: endpoint.addr.clone(),
                source,
            })?
            .connect_timeout(self.options.connect_timeout)
            .connect()
            .await
            .map_err(|source| SessionError::Dial {
                addr: endpoint.addr.clone(),
                source,
            })?;

        // Open the telemetry feed up front so a worker that rejects the
        // call fails the whole connect attempt.
        let mut grpc = Grpc::new(channel.clone());
        grpc.ready().await?;
        let codec: ProstCodec<UsageRequest, UsageReport> = ProstCodec::default();
        let usage = grpc
            .server_streaming(
                Request::new(UsageRequest::default()),
                PathAndQuery::from_static(USAGE_PATH),
                codec,
            )
            .await?
            .into_inner();
        let usage: UsageFeed =
            Box::pin(usage.map(|item| item.map(UsageSample::from).map_err(SessionError::from)));

        Ok(WorkerConnection {
            control: Box::new(GrpcControl {
                channel,
                master_id: self.master_id.clone(),
            }),
            usage,
        })
    }
}

struct GrpcControl {
    channel: Channel,
    master_id: String,
}

#[async_trait]
impl SessionControl for GrpcControl {
    async fn run(self: Box<Self>) -> Result<(), SessionError> {
        let mut grpc = Grpc::new(self.channel);
        grpc.ready().await?;
        let codec: ProstCodec<SessionRequest, SessionEvent> = ProstCodec::default();
        let request = Request::new(SessionRequest {
            master_id: self.master_id,
        });
        let mut events = grpc
            .server_streaming(request, PathAndQuery::from_static(SESSION_PATH), codec)
            .await?
            .into_inner();

        while let Some(event) = events.message().await? {
            trace!(kind = event.kind, detail = %event.detail, "session event");
        }
        Ok(())
    }
}
