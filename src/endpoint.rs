//! Worker endpoint descriptors.
//!
//! The value of a membership PUT is either the bare `host:port` string a
//! worker advertises, or a JSON descriptor carrying the address plus
//! capability tags. The descriptor is only meaningful at the moment the
//! PUT is observed; it is retained on the session solely for dialing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Connection address and advertised capabilities for one worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerEndpoint {
    /// Network address in `host:port` form.
    pub addr: String,
    /// Advertised capability tags, e.g. platform or executor labels.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("endpoint value is not valid UTF-8")]
    InvalidUtf8,
    #[error("endpoint value is empty")]
    Empty,
    #[error("endpoint descriptor is missing an address")]
    MissingAddr,
    #[error("invalid endpoint descriptor: {0}")]
    Descriptor(#[from] serde_json::Error),
}

impl WorkerEndpoint {
    /// Parse a membership PUT value into an endpoint.
    pub fn parse(value: &[u8]) -> Result<Self, EndpointError> {
        let text = std::str::from_utf8(value).map_err(|_| EndpointError::InvalidUtf8)?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(EndpointError::Empty);
        }

        if trimmed.starts_with('{') {
            let endpoint: WorkerEndpoint = serde_json::from_str(trimmed)?;
            if endpoint.addr.is_empty() {
                return Err(EndpointError::MissingAddr);
            }
            return Ok(endpoint);
        }

        Ok(Self {
            addr: trimmed.to_string(),
            tags: BTreeMap::new(),
        })
    }

    /// URI used to dial the worker.
    pub fn uri(&self, tls: bool) -> String {
        let scheme = if tls { "https" } else { "http" };
        format!("{scheme}://{}", self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_address() {
        let endpoint = WorkerEndpoint::parse(b"10.0.3.7:23000").unwrap();
        assert_eq!(endpoint.addr, "10.0.3.7:23000");
        assert!(endpoint.tags.is_empty());
        assert_eq!(endpoint.uri(false), "http://10.0.3.7:23000");
        assert_eq!(endpoint.uri(true), "https://10.0.3.7:23000");
    }

    #[test]
    fn parses_json_descriptor_with_tags() {
        let endpoint = WorkerEndpoint::parse(
            br#"{"addr": "worker-3:23000", "tags": {"arch": "arm64", "docker": "true"}}"#,
        )
        .unwrap();
        assert_eq!(endpoint.addr, "worker-3:23000");
        assert_eq!(endpoint.tags.get("arch").map(String::as_str), Some("arm64"));
    }

    #[test]
    fn rejects_non_utf8_value() {
        let err = WorkerEndpoint::parse(&[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, EndpointError::InvalidUtf8));
    }

    #[test]
    fn rejects_empty_value() {
        let err = WorkerEndpoint::parse(b"   ").unwrap_err();
        assert!(matches!(err, EndpointError::Empty));
    }

    #[test]
    fn rejects_descriptor_with_empty_address() {
        let err = WorkerEndpoint::parse(br#"{"addr": ""}"#).unwrap_err();
        assert!(matches!(err, EndpointError::MissingAddr));
    }

    #[test]
    fn rejects_malformed_descriptor() {
        let err = WorkerEndpoint::parse(br#"{"tags": {}}"#).unwrap_err();
        assert!(matches!(err, EndpointError::Descriptor(_)));
    }
}
