//! Build master fleet daemon.
//!
//! Subscribes to the worker membership prefix in the coordination store
//! and supervises one session per registered worker until interrupted or
//! until the watch subscription is lost. Losing the watch is fatal by
//! design: the process exits non-zero and the surrounding supervisor
//! restarts it with a fresh subscription.

use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use buildfleet::{
    config::Config, manager::spawn_status_reporter, sink::LogSink, transport::GrpcTransport,
    watch::EtcdWatch, FleetManager,
};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const STATUS_PERIOD: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "fleet-master", about = "Worker fleet membership manager")]
struct Args {
    /// Comma-separated etcd endpoints (overrides BUILDFLEET_ETCD_ENDPOINTS)
    #[arg(long)]
    etcd_endpoints: Option<String>,

    /// Key prefix watched for worker registrations (overrides BUILDFLEET_WORKER_PREFIX)
    #[arg(long)]
    worker_prefix: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = Config::from_env().context("failed to load configuration")?;
    if let Some(endpoints) = args.etcd_endpoints {
        config.etcd_endpoints = endpoints
            .split(',')
            .map(|endpoint| endpoint.trim().to_string())
            .filter(|endpoint| !endpoint.is_empty())
            .collect();
    }
    if let Some(prefix) = args.worker_prefix {
        config.worker_prefix = prefix;
    }

    info!(
        endpoints = ?config.etcd_endpoints,
        prefix = %config.worker_prefix,
        master = %config.master_id,
        "starting fleet master"
    );

    let watch = EtcdWatch::subscribe(&config)
        .await
        .context("failed to subscribe to worker prefix")?;

    let transport = Arc::new(GrpcTransport::new(
        config.connect.clone(),
        config.master_id.clone(),
    ));
    let (manager, handle) = FleetManager::new(transport, Arc::new(LogSink));
    spawn_status_reporter(handle, STATUS_PERIOD);

    let fleet = tokio::spawn(manager.watch_fleet(watch));

    tokio::select! {
        result = fleet => match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                error!(error = %err, "fleet manager failed");
                Err(err.into())
            }
            Err(err) => Err(anyhow!("fleet manager panicked: {err}")),
        },
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            Ok(())
        }
    }
}
