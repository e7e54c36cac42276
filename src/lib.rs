//! Buildfleet - worker fleet membership and connection-lifecycle
//! management for a distributed build master.
//!
//! The master discovers workers through a prefix watch on the
//! coordination store, keeps the authoritative registry of live worker
//! sessions, and supervises one session-run task plus one telemetry
//! drain task per worker. Membership events are applied strictly in
//! delivery order by a single task; only the resulting session tasks run
//! concurrently.

pub mod config;
pub mod endpoint;
pub mod manager;
pub mod messages;
pub mod session;
pub mod sink;
mod supervisor;
pub mod transport;
pub mod watch;

pub use config::{Config, ConnectOptions};
pub use endpoint::{EndpointError, WorkerEndpoint};
pub use manager::{spawn_status_reporter, FleetError, FleetHandle, FleetManager, WorkerInfo};
pub use session::{SessionState, WorkerSession};
pub use sink::{ChannelSink, LogSink, UsageSink};
pub use transport::{
    GrpcTransport, SessionControl, SessionError, UsageFeed, UsageSample, WorkerConnection,
    WorkerTransport,
};
pub use watch::{EtcdWatch, FleetWatch, WatchError, WatchEvent, WorkerId};
