//! Coordination-store boundary: worker identities and membership events.
//!
//! Workers publish their endpoint under a shared key prefix in etcd; the
//! fleet manager consumes the prefix watch as an ordered stream of
//! membership change batches. The connection to the store may itself be
//! interrupted, which is unrecoverable for the subscriber.

use std::fmt;

use async_trait::async_trait;
use etcd_client::{
    Client, ConnectOptions as EtcdConnectOptions, EventType, WatchOptions, WatchStream, Watcher,
};
use thiserror::Error;

use crate::config::Config;

/// Opaque worker identity derived from the coordination-store key path
/// (`<prefix>/<service>/<instance>`). Stable across reconnects of the
/// same instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Trailing path segment, the unique worker instance identifier.
    pub fn instance(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for WorkerId {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// One membership change observed under the worker prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchEvent {
    /// A worker registered or refreshed its endpoint.
    Put { key: WorkerId, value: Vec<u8> },
    /// A worker's registration was removed.
    Delete { key: WorkerId },
}

/// Errors surfaced by a membership watch. All of them are unrecoverable
/// for the subscription; the owner decides restart policy.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("worker watch stream closed")]
    StreamClosed,
    #[error("coordination store failure: {0}")]
    Store(#[from] etcd_client::Error),
}

/// Ordered source of membership change batches.
#[async_trait]
pub trait FleetWatch: Send {
    /// Next batch of events, in delivery order.
    async fn next_batch(&mut self) -> Result<Vec<WatchEvent>, WatchError>;
}

/// Prefix watch over the worker namespace in etcd.
pub struct EtcdWatch {
    stream: WatchStream,
    // Dropping the watcher cancels the server-side watch.
    _watcher: Watcher,
}

impl EtcdWatch {
    /// Connect to the coordination store and subscribe to the worker
    /// prefix.
    pub async fn subscribe(config: &Config) -> Result<Self, WatchError> {
        let mut options = EtcdConnectOptions::new();
        if let (Some(user), Some(password)) = (&config.etcd_username, &config.etcd_password) {
            options = options.with_user(user, password);
        }
        let mut client = Client::connect(&config.etcd_endpoints, Some(options)).await?;
        let (watcher, stream) = client
            .watch(
                config.worker_prefix.as_str(),
                Some(WatchOptions::new().with_prefix()),
            )
            .await?;
        Ok(Self {
            stream,
            _watcher: watcher,
        })
    }
}

#[async_trait]
impl FleetWatch for EtcdWatch {
    async fn next_batch(&mut self) -> Result<Vec<WatchEvent>, WatchError> {
        loop {
            let response = self
                .stream
                .message()
                .await?
                .ok_or(WatchError::StreamClosed)?;
            if response.canceled() {
                return Err(WatchError::StreamClosed);
            }

            let mut events = Vec::with_capacity(response.events().len());
            for event in response.events() {
                let Some(kv) = event.kv() else { continue };
                let key = WorkerId::new(kv.key_str()?);
                match event.event_type() {
                    EventType::Put => events.push(WatchEvent::Put {
                        key,
                        value: kv.value().to_vec(),
                    }),
                    EventType::Delete => events.push(WatchEvent::Delete { key }),
                }
            }

            // Progress notifications carry no events; keep waiting.
            if !events.is_empty() {
                return Ok(events);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_id_instance_is_trailing_segment() {
        let id = WorkerId::new("/buildfleet/workers/worker-7f3a");
        assert_eq!(id.instance(), "worker-7f3a");
        assert_eq!(id.as_str(), "/buildfleet/workers/worker-7f3a");
    }

    #[test]
    fn worker_id_without_path_is_its_own_instance() {
        let id = WorkerId::new("bare-key");
        assert_eq!(id.instance(), "bare-key");
    }
}
