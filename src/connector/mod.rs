//! Storage wire client
//!
//! A minimal, replaceable abstraction for talking to one storage replica:
//! - consistency policy encoding
//! - slice request construction and per-request timeout
//! - failure classification (validation / transport / protocol)

pub mod client;
pub mod policy;

pub use client::{SliceClient, SliceTransport, DEFAULT_TIMEOUT};
pub use policy::ConsistencyPolicy;

use crate::common::DIGEST_LEN;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WireError {
    // === Validation (local, never retried) ===
    #[error("Connection address is empty")]
    ConnAddrEmpty,

    #[error("Handler should be {} bytes long", DIGEST_LEN)]
    HandlerInvalid,

    #[error("put_slice requires a payload")]
    PutNilSlice,

    #[error("Invalid consistency policy: {0}")]
    ConsistencyInvalid(String),

    // === Transport ===
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    // === Protocol ===
    #[error("{url} answered {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
}

impl WireError {
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            WireError::ConnAddrEmpty
                | WireError::HandlerInvalid
                | WireError::PutNilSlice
                | WireError::ConsistencyInvalid(_)
        )
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, WireError::Timeout { .. } | WireError::Transport { .. })
    }

    /// The replica explicitly reported the slice as absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, WireError::Status { status: 404, .. })
    }
}
