//! Hashing utilities for slicemap
//!
//! Object identifiers are routed by their SHA-256 digest. The digest doubles
//! as the slice handler sent to storage replicas.

use sha2::{Digest as _, Sha256};

/// Length in bytes of a routing digest (and of a valid slice handler)
pub const DIGEST_LEN: usize = 32;

pub type Digest = [u8; DIGEST_LEN];

/// Compute the routing digest of an object identifier
pub fn digest_id(id: &str) -> Digest {
    Sha256::digest(id.as_bytes()).into()
}

/// Routing digest as lowercase hex (for logs)
pub fn digest_hex(id: &str) -> String {
    hex::encode(digest_id(id))
}
