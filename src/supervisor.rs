//! Per-worker session scopes.
//!
//! Task spawning is decoupled from registry mutation: the fleet manager
//! sends start/stop commands here, and the supervisor owns one scope per
//! worker identity. A scope is the pair of background tasks (session run
//! and telemetry drain) plus the stop signal that cancels them when the
//! registry entry is replaced or removed, so tasks never accumulate
//! under membership churn. Task failures are logged and counted; they
//! never propagate back into the watch-processing path.

use std::{collections::HashMap, sync::Arc};

use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, error, warn};

use crate::{
    session::{drain_usage, SessionRuntime},
    sink::UsageSink,
    transport::WorkerTransport,
    watch::WorkerId,
};

const COMMAND_BUFFER: usize = 64;

enum Command {
    Start(SessionRuntime),
    Stop(WorkerId),
}

/// Handle used by the fleet manager to start and stop session scopes.
pub(crate) struct SessionSupervisor {
    commands: mpsc::Sender<Command>,
}

impl SessionSupervisor {
    pub(crate) fn spawn(transport: Arc<dyn WorkerTransport>, sink: Arc<dyn UsageSink>) -> Self {
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(supervise(transport, sink, rx));
        Self { commands }
    }

    /// Start a scope for the runtime's identity, stopping any scope it
    /// supersedes.
    pub(crate) async fn start(&self, runtime: SessionRuntime) {
        if self.commands.send(Command::Start(runtime)).await.is_err() {
            warn!("session supervisor is gone, dropping start command");
        }
    }

    pub(crate) async fn stop(&self, id: WorkerId) {
        if self.commands.send(Command::Stop(id)).await.is_err() {
            warn!("session supervisor is gone, dropping stop command");
        }
    }
}

struct SessionScope {
    stop: watch::Sender<bool>,
    run: JoinHandle<()>,
    drain: JoinHandle<()>,
}

impl SessionScope {
    /// Signal both tasks to stop. They exit on their own once they
    /// observe the signal and are not joined.
    fn signal_stop(self) {
        let _ = self.stop.send(true);
        drop(self.run);
        drop(self.drain);
    }
}

async fn supervise(
    transport: Arc<dyn WorkerTransport>,
    sink: Arc<dyn UsageSink>,
    mut commands: mpsc::Receiver<Command>,
) {
    let mut scopes: HashMap<WorkerId, SessionScope> = HashMap::new();
    while let Some(command) = commands.recv().await {
        match command {
            Command::Start(runtime) => {
                let id = runtime.id().clone();
                if let Some(old) = scopes.remove(&id) {
                    debug!(worker = %id, "stopping superseded session scope");
                    old.signal_stop();
                }
                let scope = start_scope(&id, runtime, Arc::clone(&transport), Arc::clone(&sink));
                scopes.insert(id, scope);
            }
            Command::Stop(id) => {
                if let Some(scope) = scopes.remove(&id) {
                    scope.signal_stop();
                }
            }
        }
    }

    // Manager is gone; wind down whatever is still running.
    for (_, scope) in scopes {
        scope.signal_stop();
    }
}

fn start_scope(
    id: &WorkerId,
    runtime: SessionRuntime,
    transport: Arc<dyn WorkerTransport>,
    sink: Arc<dyn UsageSink>,
) -> SessionScope {
    let (stop_tx, stop_rx) = watch::channel(false);
    let (feed_tx, feed_rx) = oneshot::channel();

    let run_id = id.clone();
    let run = tokio::spawn(async move {
        match runtime.run(transport, feed_tx, stop_rx).await {
            Ok(()) => debug!(worker = %run_id, "worker session ended"),
            Err(err) => {
                metrics::counter!("fleet_session_failures_total").increment(1);
                error!(worker = %run_id, error = %err, "worker session failed");
            }
        }
    });

    let drain_id = id.clone();
    let drain_stop = stop_tx.subscribe();
    let drain = tokio::spawn(async move {
        match drain_usage(drain_id.clone(), feed_rx, sink, drain_stop).await {
            Ok(()) => debug!(worker = %drain_id, "telemetry feed closed"),
            Err(err) => error!(worker = %drain_id, error = %err, "telemetry feed failed"),
        }
    });

    SessionScope {
        stop: stop_tx,
        run,
        drain,
    }
}
