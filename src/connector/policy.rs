//! Consistency policies forwarded to storage replicas

use crate::connector::WireError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Caller-selected guarantee for a single read or write
///
/// Opaque to this crate: the storage node decides what each level means.
/// The numeric value is what goes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsistencyPolicy {
    #[serde(rename = "none")]
    NoGuarantee = 1,
    #[serde(rename = "weak")]
    WeakConsistency = 2,
    #[serde(rename = "strong")]
    StrongConsistency = 3,
}

impl ConsistencyPolicy {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl Default for ConsistencyPolicy {
    fn default() -> Self {
        ConsistencyPolicy::StrongConsistency
    }
}

impl TryFrom<u8> for ConsistencyPolicy {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ConsistencyPolicy::NoGuarantee),
            2 => Ok(ConsistencyPolicy::WeakConsistency),
            3 => Ok(ConsistencyPolicy::StrongConsistency),
            other => Err(WireError::ConsistencyInvalid(other.to_string())),
        }
    }
}

impl FromStr for ConsistencyPolicy {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "none" => Ok(ConsistencyPolicy::NoGuarantee),
            "2" | "weak" => Ok(ConsistencyPolicy::WeakConsistency),
            "3" | "strong" => Ok(ConsistencyPolicy::StrongConsistency),
            _ => Err(WireError::ConsistencyInvalid(s.to_string())),
        }
    }
}

impl fmt::Display for ConsistencyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsistencyPolicy::NoGuarantee => write!(f, "none"),
            ConsistencyPolicy::WeakConsistency => write!(f, "weak"),
            ConsistencyPolicy::StrongConsistency => write!(f, "strong"),
        }
    }
}
