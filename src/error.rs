// error.rs - Error taxonomy for the scan engine
// Transport failures are absorbed by the caller, resource failures end the run.

use std::path::PathBuf;
use thiserror::Error;

/// A single HTTP exchange that did not produce a response.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} failed: {reason}")]
    Failed { url: String, reason: String },

    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },
}

impl TransportError {
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout { url: url.to_string() }
        } else {
            TransportError::Failed {
                url: url.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Cannot connect to {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("Invalid payload catalog: {0}")]
    Catalog(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Cannot write {path}: {source}")]
    Resource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed record: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl ScanError {
    pub fn resource(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ScanError::Resource {
            path: path.into(),
            source,
        }
    }

    /// Resource errors abort the whole run; everything else only affects one target.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScanError::Resource { .. })
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_resource_errors_are_fatal() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(ScanError::resource("/tmp/x", io).is_fatal());
        assert!(!ScanError::InvalidTarget("".into()).is_fatal());
        assert!(!ScanError::Unreachable {
            url: "https://a".into(),
            reason: "status 500".into()
        }
        .is_fatal());
    }
}
