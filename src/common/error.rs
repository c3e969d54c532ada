//! Error types for slicemap

use thiserror::Error;

use crate::connector::WireError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Registry Errors ===
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Registry unavailable: {0}")]
    RegistryUnavailable(String),

    // === Store Errors ===
    #[error("Store error: {0}")]
    Store(String),

    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Nodemap corrupted: {0}")]
    NodemapCorrupted(String),

    #[cfg(feature = "etcd")]
    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),

    // === Coordination Errors ===
    #[error("Lease lost for lock {0}")]
    LeaseLost(String),

    // === Routing Errors ===
    #[error("No shard owns key {0}")]
    NoShardForKey(String),

    #[error("All {attempted} replicas failed, last error: {last}")]
    ReplicasExhausted { attempted: usize, last: String },

    #[error("Object not found: {0}")]
    NotFound(String),

    // === Network Errors ===
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("HTTP error: {0}")]
    Http(String),

    // === Serialization Errors ===
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::RegistryUnavailable(_)
            | Error::Store(_)
            | Error::LeaseLost(_)
            | Error::ReplicasExhausted { .. }
            | Error::Http(_) => true,
            Error::Wire(e) => e.is_transport(),
            #[cfg(feature = "etcd")]
            Error::Etcd(_) => true,
            _ => false,
        }
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::InvalidPayload(_) | Error::RegistryUnavailable(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::NoShardForKey(_)
            | Error::ReplicasExhausted { .. }
            | Error::Wire(_) => StatusCode::BAD_GATEWAY,
            Error::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(
            Error::InvalidPayload("x".into()).to_http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::RegistryUnavailable("down".into()).to_http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::NotFound("k".into()).to_http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::ReplicasExhausted {
                attempted: 3,
                last: "refused".into()
            }
            .to_http_status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            Error::NodemapCorrupted("2 records".into()).to_http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_retryable() {
        assert!(Error::LeaseLost("nodemap".into()).is_retryable());
        assert!(Error::Store("timeout".into()).is_retryable());
        assert!(!Error::InvalidPayload("bad".into()).is_retryable());
        assert!(!Error::NodemapCorrupted("empty".into()).is_retryable());
        assert!(!Error::Wire(WireError::HandlerInvalid).is_retryable());
    }
}
