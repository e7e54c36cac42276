//! End-to-end fleet lifecycle tests.
//!
//! These drive a [`FleetManager`] with a scripted membership watch and a
//! scripted transport, exercising the full path from watch event through
//! session supervision to the telemetry sink without a real coordination
//! store or worker.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use buildfleet::{
    endpoint::WorkerEndpoint,
    manager::{FleetError, FleetHandle, FleetManager},
    session::SessionState,
    sink::ChannelSink,
    transport::{
        SessionControl, SessionError, UsageFeed, UsageSample, WorkerConnection, WorkerTransport,
    },
    watch::{FleetWatch, WatchError, WatchEvent, WorkerId},
};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time::sleep,
};
use tokio_stream::wrappers::ReceiverStream;
use tonic::Status;

struct ScriptedWatch {
    rx: mpsc::Receiver<Vec<WatchEvent>>,
}

#[async_trait]
impl FleetWatch for ScriptedWatch {
    async fn next_batch(&mut self) -> Result<Vec<WatchEvent>, WatchError> {
        self.rx.recv().await.ok_or(WatchError::StreamClosed)
    }
}

/// Control handle that stays live until its session scope is stopped.
struct IdleControl;

#[async_trait]
impl SessionControl for IdleControl {
    async fn run(self: Box<Self>) -> Result<(), SessionError> {
        futures::future::pending::<()>().await;
        Ok(())
    }
}

/// Hands out pre-built connections in order; refuses the dial once the
/// script runs out.
struct ScriptedTransport {
    connections: Mutex<VecDeque<WorkerConnection>>,
    connects: AtomicUsize,
}

impl ScriptedTransport {
    fn new(connections: Vec<WorkerConnection>) -> Arc<Self> {
        Arc::new(Self {
            connections: Mutex::new(connections.into()),
            connects: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl WorkerTransport for ScriptedTransport {
    async fn connect(&self, _endpoint: &WorkerEndpoint) -> Result<WorkerConnection, SessionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.connections
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| SessionError::from(Status::unavailable("dial refused")))
    }
}

/// A connection whose telemetry feed is driven by the returned sender.
fn usage_connection() -> (WorkerConnection, mpsc::Sender<Result<UsageSample, SessionError>>) {
    let (usage_tx, usage_rx) = mpsc::channel(16);
    let usage: UsageFeed = Box::pin(ReceiverStream::new(usage_rx));
    let connection = WorkerConnection {
        control: Box::new(IdleControl),
        usage,
    };
    (connection, usage_tx)
}

fn sample(cpu: i32) -> UsageSample {
    UsageSample {
        cpu_percent: cpu,
        mem_percent: 25,
        recorded_at_ms: i64::from(cpu),
    }
}

fn put(key: &str, value: &[u8]) -> WatchEvent {
    WatchEvent::Put {
        key: WorkerId::new(key),
        value: value.to_vec(),
    }
}

fn delete(key: &str) -> WatchEvent {
    WatchEvent::Delete {
        key: WorkerId::new(key),
    }
}

fn start_fleet(
    transport: Arc<ScriptedTransport>,
    sink_capacity: usize,
) -> (
    mpsc::Sender<Vec<WatchEvent>>,
    mpsc::Receiver<(WorkerId, UsageSample)>,
    FleetHandle,
    JoinHandle<Result<(), FleetError>>,
) {
    let (sink, samples_rx) = ChannelSink::new(sink_capacity);
    let (manager, handle) = FleetManager::new(transport, Arc::new(sink));
    let (events_tx, events_rx) = mpsc::channel(8);
    let fleet = tokio::spawn(manager.watch_fleet(ScriptedWatch { rx: events_rx }));
    (events_tx, samples_rx, handle, fleet)
}

#[tokio::test]
async fn worker_joins_streams_usage_and_leaves() {
    let (connection, usage_tx) = usage_connection();
    let transport = ScriptedTransport::new(vec![connection]);
    let (events_tx, mut samples_rx, handle, fleet) = start_fleet(Arc::clone(&transport), 16);

    events_tx
        .send(vec![put("/buildfleet/workers/w1", b"host1:9000")])
        .await
        .unwrap();
    sleep(Duration::from_millis(50)).await;

    let workers = handle.workers().await.unwrap();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].state, SessionState::Active);

    usage_tx.send(Ok(sample(10))).await.unwrap();
    usage_tx.send(Ok(sample(20))).await.unwrap();

    let (worker, first) = samples_rx.recv().await.unwrap();
    assert_eq!(worker.instance(), "w1");
    assert_eq!(first.cpu_percent, 10);
    assert_eq!(samples_rx.recv().await.unwrap().1.cpu_percent, 20);

    events_tx
        .send(vec![delete("/buildfleet/workers/w1")])
        .await
        .unwrap();
    sleep(Duration::from_millis(50)).await;
    assert!(handle.workers().await.unwrap().is_empty());

    // The drain was cancelled with the scope; late samples go nowhere.
    let _ = usage_tx.send(Ok(sample(30))).await;
    sleep(Duration::from_millis(50)).await;
    assert!(samples_rx.try_recv().is_err());

    // Losing the watch itself is the only fatal condition.
    drop(events_tx);
    let err = fleet.await.unwrap().unwrap_err();
    assert!(matches!(err, FleetError::Watch(WatchError::StreamClosed)));
}

#[tokio::test]
async fn dial_failure_closes_session_but_keeps_registry_entry() {
    let transport = ScriptedTransport::new(Vec::new());
    let (events_tx, _samples_rx, handle, _fleet) = start_fleet(Arc::clone(&transport), 4);

    events_tx
        .send(vec![put("/buildfleet/workers/w1", b"host1:9000")])
        .await
        .unwrap();
    sleep(Duration::from_millis(50)).await;

    // Membership is fact, connectivity is state: the entry stays until
    // the store says the worker is gone.
    let workers = handle.workers().await.unwrap();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].state, SessionState::Closed);
    assert_eq!(transport.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn refreshed_registration_supersedes_the_old_session() {
    let (first, _first_usage) = usage_connection();
    let (second, _second_usage) = usage_connection();
    let transport = ScriptedTransport::new(vec![first, second]);
    let (events_tx, _samples_rx, handle, _fleet) = start_fleet(Arc::clone(&transport), 4);

    events_tx
        .send(vec![put("/buildfleet/workers/w1", b"host1:9000")])
        .await
        .unwrap();
    sleep(Duration::from_millis(50)).await;

    events_tx
        .send(vec![put("/buildfleet/workers/w1", b"host2:9000")])
        .await
        .unwrap();
    sleep(Duration::from_millis(50)).await;

    let workers = handle.workers().await.unwrap();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].addr, "host2:9000");
    assert_eq!(workers[0].state, SessionState::Active);
    assert_eq!(transport.connects.load(Ordering::SeqCst), 2);
}
