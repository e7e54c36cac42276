//! Telemetry sinks.
//!
//! The drain loop hands samples to a sink one at a time, in order.
//! Backpressure handling is the sink's responsibility; nothing here may
//! block the drain indefinitely.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{transport::UsageSample, watch::WorkerId};

/// Downstream consumer of per-worker usage samples.
#[async_trait]
pub trait UsageSink: Send + Sync + 'static {
    async fn record(&self, worker: &WorkerId, sample: UsageSample);
}

/// Writes each sample to the structured log.
pub struct LogSink;

#[async_trait]
impl UsageSink for LogSink {
    async fn record(&self, worker: &WorkerId, sample: UsageSample) {
        debug!(
            worker = %worker.instance(),
            cpu = sample.cpu_percent,
            mem = sample.mem_percent,
            "worker usage"
        );
    }
}

/// Forwards samples into a bounded channel for a downstream consumer.
/// Samples are dropped (and counted) when the consumer falls behind, so
/// a slow reader never stalls the drain loop.
pub struct ChannelSink {
    tx: mpsc::Sender<(WorkerId, UsageSample)>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<(WorkerId, UsageSample)>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl UsageSink for ChannelSink {
    async fn record(&self, worker: &WorkerId, sample: UsageSample) {
        if self.tx.try_send((worker.clone(), sample)).is_err() {
            metrics::counter!("fleet_usage_dropped_total").increment(1);
            debug!(worker = %worker.instance(), "usage consumer behind, dropping sample");
        }
    }
}
