//! Fleet membership manager.
//!
//! The manager is the single consumer of the coordination store's watch
//! stream and the sole writer of the fleet registry. Snapshot readers go
//! through [`FleetHandle`], a message-passing query answered by the
//! watch-processing task itself, so no shared mutable map exists.
//!
//! A malformed registration value is skipped with an error log rather
//! than taking the manager down; only losing the watch subscription
//! itself is fatal, and that error must be treated as fatal by the
//! owning process (no internal reconnect).

use std::{collections::HashMap, sync::Arc, time::Duration};

use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, error, info};

use crate::{
    endpoint::WorkerEndpoint,
    session::{SessionState, WorkerSession},
    sink::UsageSink,
    supervisor::SessionSupervisor,
    transport::WorkerTransport,
    watch::{FleetWatch, WatchError, WatchEvent, WorkerId},
};

const QUERY_BUFFER: usize = 16;

/// Fatal manager failures, surfaced to the owning process for its
/// restart/shutdown decision.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("worker watch stream failed")]
    Watch(#[from] WatchError),
    #[error("fleet manager terminated")]
    Terminated,
}

/// Point-in-time view of one registry entry.
#[derive(Clone, Debug)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub addr: String,
    pub state: SessionState,
}

enum FleetQuery {
    Workers {
        resp: oneshot::Sender<Vec<WorkerInfo>>,
    },
}

/// Query handle into the watch-processing task.
#[derive(Clone)]
pub struct FleetHandle {
    queries: mpsc::Sender<FleetQuery>,
}

impl FleetHandle {
    /// Snapshot of the current registry, sorted by identity.
    pub async fn workers(&self) -> Result<Vec<WorkerInfo>, FleetError> {
        let (tx, rx) = oneshot::channel();
        self.queries
            .send(FleetQuery::Workers { resp: tx })
            .await
            .map_err(|_| FleetError::Terminated)?;
        rx.await.map_err(|_| FleetError::Terminated)
    }
}

/// Authoritative owner of the worker registry.
pub struct FleetManager {
    registry: HashMap<WorkerId, WorkerSession>,
    supervisor: SessionSupervisor,
    queries: mpsc::Receiver<FleetQuery>,
}

impl FleetManager {
    pub fn new(
        transport: Arc<dyn WorkerTransport>,
        sink: Arc<dyn UsageSink>,
    ) -> (Self, FleetHandle) {
        let (query_tx, query_rx) = mpsc::channel(QUERY_BUFFER);
        let manager = Self {
            registry: HashMap::new(),
            supervisor: SessionSupervisor::spawn(transport, sink),
            queries: query_rx,
        };
        (manager, FleetHandle { queries: query_tx })
    }

    /// Consume the membership watch stream until it fails.
    ///
    /// Events within a batch are applied in delivery order, one at a
    /// time; only the resulting session tasks run concurrently. Returns
    /// only on unrecoverable watch failure.
    pub async fn watch_fleet<W: FleetWatch>(mut self, mut watch: W) -> Result<(), FleetError> {
        loop {
            tokio::select! {
                batch = watch.next_batch() => {
                    for event in batch? {
                        self.apply_event(event).await;
                    }
                }
                Some(query) = self.queries.recv() => self.answer(query),
            }
        }
    }

    async fn apply_event(&mut self, event: WatchEvent) {
        metrics::counter!("fleet_watch_events_total").increment(1);
        match event {
            WatchEvent::Put { key, value } => {
                let endpoint = match WorkerEndpoint::parse(&value) {
                    Ok(endpoint) => endpoint,
                    Err(err) => {
                        metrics::counter!("fleet_bad_registrations_total").increment(1);
                        error!(
                            worker = %key,
                            error = %err,
                            "ignoring malformed worker registration"
                        );
                        return;
                    }
                };
                info!(worker = %key.instance(), addr = %endpoint.addr, "worker joined fleet");

                let (session, runtime) = WorkerSession::new(key.clone(), endpoint);
                if self.registry.insert(key, session).is_some() {
                    debug!("superseding existing worker session");
                }
                self.supervisor.start(runtime).await;
            }
            WatchEvent::Delete { key } => {
                if self.registry.remove(&key).is_some() {
                    info!(worker = %key.instance(), "worker left fleet");
                    self.supervisor.stop(key).await;
                } else {
                    debug!(worker = %key, "delete for unknown worker");
                }
            }
        }
        metrics::gauge!("fleet_workers").set(self.registry.len() as f64);
    }

    fn answer(&self, query: FleetQuery) {
        match query {
            FleetQuery::Workers { resp } => {
                let mut workers: Vec<WorkerInfo> = self
                    .registry
                    .values()
                    .map(|session| WorkerInfo {
                        id: session.id().clone(),
                        addr: session.endpoint().addr.clone(),
                        state: session.state(),
                    })
                    .collect();
                workers.sort_by(|a, b| a.id.cmp(&b.id));
                let _ = resp.send(workers);
            }
        }
    }
}

/// Periodically log fleet size and per-state counts. Stops on its own
/// once the manager has terminated.
pub fn spawn_status_reporter(handle: FleetHandle, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match handle.workers().await {
                Ok(workers) => {
                    let active = workers
                        .iter()
                        .filter(|worker| worker.state == SessionState::Active)
                        .count();
                    let connecting = workers
                        .iter()
                        .filter(|worker| worker.state == SessionState::Connecting)
                        .count();
                    info!(total = workers.len(), active, connecting, "fleet status");
                }
                Err(_) => {
                    debug!("fleet manager gone, stopping status reporter");
                    break;
                }
            }
        }
    })
}
