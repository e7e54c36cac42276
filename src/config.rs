//! Configuration loading from environment variables.
//!
//! Uses the following environment variables:
//! - `BUILDFLEET_ETCD_ENDPOINTS`: comma-separated etcd endpoints (default: http://127.0.0.1:2379)
//! - `BUILDFLEET_ETCD_USERNAME`: etcd username (optional, requires password)
//! - `BUILDFLEET_ETCD_PASSWORD`: etcd password (optional, requires username)
//! - `BUILDFLEET_WORKER_PREFIX`: key prefix watched for worker registrations (default: /buildfleet/workers)
//! - `BUILDFLEET_MASTER_ID`: identity advertised to workers during the session handshake (default: fleet-master)
//! - `BUILDFLEET_GRPC_TLS`: dial workers over TLS (default: false)
//! - `BUILDFLEET_CONNECT_TIMEOUT_MS`: worker dial timeout (default: 5000)

use std::{env, time::Duration};

use anyhow::{bail, Result};

/// Default key prefix for worker membership registrations.
pub const DEFAULT_WORKER_PREFIX: &str = "/buildfleet/workers";

const DEFAULT_ETCD_ENDPOINT: &str = "http://127.0.0.1:2379";
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Master configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Coordination store endpoints.
    pub etcd_endpoints: Vec<String>,

    /// Coordination store credentials, set together or not at all.
    pub etcd_username: Option<String>,
    pub etcd_password: Option<String>,

    /// Key prefix under which workers publish their endpoints.
    pub worker_prefix: String,

    /// Identity this master advertises in the session handshake.
    pub master_id: String,

    /// Options applied when dialing worker sessions.
    pub connect: ConnectOptions,
}

/// Protocol-level parameters for opening a worker session.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Dial workers with an https scheme.
    pub tls: bool,
    /// Abort a dial attempt after this long.
    pub connect_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            tls: false,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Loads `.env` file if present, then reads from environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let etcd_endpoints: Vec<String> = env::var("BUILDFLEET_ETCD_ENDPOINTS")
            .unwrap_or_else(|_| DEFAULT_ETCD_ENDPOINT.to_string())
            .split(',')
            .map(|endpoint| endpoint.trim().to_string())
            .filter(|endpoint| !endpoint.is_empty())
            .collect();
        if etcd_endpoints.is_empty() {
            bail!("BUILDFLEET_ETCD_ENDPOINTS must name at least one endpoint");
        }

        let etcd_username = env::var("BUILDFLEET_ETCD_USERNAME").ok();
        let etcd_password = env::var("BUILDFLEET_ETCD_PASSWORD").ok();
        if etcd_username.is_some() != etcd_password.is_some() {
            bail!("BUILDFLEET_ETCD_USERNAME and BUILDFLEET_ETCD_PASSWORD must be set together");
        }

        let worker_prefix = env::var("BUILDFLEET_WORKER_PREFIX")
            .unwrap_or_else(|_| DEFAULT_WORKER_PREFIX.to_string());

        let master_id =
            env::var("BUILDFLEET_MASTER_ID").unwrap_or_else(|_| "fleet-master".to_string());

        let tls = env::var("BUILDFLEET_GRPC_TLS")
            .map(|value| value == "true" || value == "1")
            .unwrap_or(false);

        let connect_timeout_ms = env::var("BUILDFLEET_CONNECT_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS);

        Ok(Self {
            etcd_endpoints,
            etcd_username,
            etcd_password,
            worker_prefix,
            master_id,
            connect: ConnectOptions {
                tls,
                connect_timeout: Duration::from_millis(connect_timeout_ms),
            },
        })
    }

    /// Create a test configuration with defaults.
    #[cfg(test)]
    pub fn test_config() -> Self {
        Self {
            etcd_endpoints: vec![DEFAULT_ETCD_ENDPOINT.to_string()],
            etcd_username: None,
            etcd_password: None,
            worker_prefix: DEFAULT_WORKER_PREFIX.to_string(),
            master_id: "fleet-master-test".to_string(),
            connect: ConnectOptions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_connect_options() {
        let options = ConnectOptions::default();
        assert!(!options.tls);
        assert_eq!(options.connect_timeout, Duration::from_millis(5000));
    }

    #[test]
    fn test_config_watches_default_prefix() {
        let config = Config::test_config();
        assert_eq!(config.worker_prefix, DEFAULT_WORKER_PREFIX);
        assert_eq!(config.etcd_endpoints, vec![DEFAULT_ETCD_ENDPOINT]);
        assert!(config.etcd_username.is_none());
    }
}
