//! Worker session lifecycle.
//!
//! Each session runs as two independent background tasks under one stop
//! scope: the run loop dials the worker and drives the control stream
//! until it ends, and the drain loop forwards telemetry samples to the
//! sink. Neither task may block the membership watch; the dial therefore
//! happens inside the run task, and the usage feed is handed to the
//! drain task over a oneshot channel once the connection is up.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{oneshot, watch};
use tracing::debug;

use crate::{
    endpoint::WorkerEndpoint,
    sink::UsageSink,
    transport::{SessionError, UsageFeed, WorkerConnection, WorkerTransport},
    watch::WorkerId,
};

/// Lifecycle of one worker session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, dial not yet completed.
    Connecting,
    /// Connection established, control stream live.
    Active,
    /// Session ended (error, graceful stop, or scope cancellation).
    Closed,
}

/// Registry-side view of one live or live-attempting worker connection.
/// Owned exclusively by the fleet registry.
pub struct WorkerSession {
    id: WorkerId,
    endpoint: WorkerEndpoint,
    state: watch::Receiver<SessionState>,
}

impl WorkerSession {
    pub(crate) fn new(id: WorkerId, endpoint: WorkerEndpoint) -> (Self, SessionRuntime) {
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let session = Self {
            id: id.clone(),
            endpoint: endpoint.clone(),
            state: state_rx,
        };
        let runtime = SessionRuntime {
            id,
            endpoint,
            state: state_tx,
        };
        (session, runtime)
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    pub fn endpoint(&self) -> &WorkerEndpoint {
        &self.endpoint
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }
}

/// Task-side half of a session, consumed by the run loop.
pub(crate) struct SessionRuntime {
    id: WorkerId,
    endpoint: WorkerEndpoint,
    state: watch::Sender<SessionState>,
}

impl SessionRuntime {
    pub(crate) fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Dial the worker and drive the control stream until it ends.
    ///
    /// Publishes `Active` once connected and hands the usage feed to the
    /// drain task; publishes `Closed` on every exit path. A stop signal
    /// from the session's scope ends the run without an error.
    pub(crate) async fn run(
        self,
        transport: Arc<dyn WorkerTransport>,
        feed_tx: oneshot::Sender<UsageFeed>,
        mut stop: watch::Receiver<bool>,
    ) -> Result<(), SessionError> {
        let connected = tokio::select! {
            connected = transport.connect(&self.endpoint) => connected,
            _ = stop.changed() => {
                self.state.send_replace(SessionState::Closed);
                return Ok(());
            }
        };
        let WorkerConnection { control, usage } = match connected {
            Ok(connection) => connection,
            Err(err) => {
                self.state.send_replace(SessionState::Closed);
                return Err(err);
            }
        };

        self.state.send_replace(SessionState::Active);
        debug!(worker = %self.id, addr = %self.endpoint.addr, "worker session active");

        // The drain task may already be gone if the scope was stopped.
        let _ = feed_tx.send(usage);

        let result = tokio::select! {
            result = control.run() => result,
            _ = stop.changed() => Ok(()),
        };
        self.state.send_replace(SessionState::Closed);
        result
    }
}

/// Forward telemetry samples to the sink until the feed closes.
///
/// A clean end-of-stream is the expected termination and returns `Ok`;
/// a mid-stream transport failure is returned as the error it is. If the
/// session never reaches the connected state the feed handoff is dropped
/// and the drain ends cleanly.
pub(crate) async fn drain_usage(
    id: WorkerId,
    feed_rx: oneshot::Receiver<UsageFeed>,
    sink: Arc<dyn UsageSink>,
    mut stop: watch::Receiver<bool>,
) -> Result<(), SessionError> {
    let mut feed = tokio::select! {
        feed = feed_rx => match feed {
            Ok(feed) => feed,
            Err(_) => return Ok(()),
        },
        _ = stop.changed() => return Ok(()),
    };

    loop {
        tokio::select! {
            sample = feed.next() => match sample {
                Some(Ok(sample)) => {
                    metrics::counter!("fleet_usage_samples_total").increment(1);
                    sink.record(&id, sample).await;
                }
                Some(Err(err)) => return Err(err),
                None => return Ok(()),
            },
            _ = stop.changed() => return Ok(()),
        }
    }
}
