//! 256-bit keyspace arithmetic
//!
//! The keyspace is `[0, 2^256 - 1]`. Partitioning splits it into equal-width
//! contiguous ranges; the last range absorbs the remainder so that it always
//! ends at [`KEYSPACE_MAX`].

use primitive_types::U256;

/// Largest key in the keyspace
pub const KEYSPACE_MAX: U256 = U256::MAX;

/// Interpret a big-endian digest as a key
///
/// Digests longer than 32 bytes are rejected by callers before reaching here.
pub fn key_from_digest(digest: &[u8]) -> U256 {
    U256::from_big_endian(digest)
}

/// Width of one range when the keyspace is split `parts` ways,
/// i.e. `floor(2^256 / parts)`. `None` when `parts == 1` (width would be 2^256).
fn range_width(parts: u64) -> Option<U256> {
    if parts <= 1 {
        return None;
    }
    let n = U256::from(parts);
    // 2^256 = MAX + 1 = q * n + r + 1
    let q = KEYSPACE_MAX / n;
    let r = KEYSPACE_MAX % n;
    if r + U256::one() == n {
        Some(q + U256::one())
    } else {
        Some(q)
    }
}

/// Split the keyspace into `parts` contiguous inclusive ranges in address order
pub fn partition(parts: usize) -> Vec<(U256, U256)> {
    if parts == 0 {
        return Vec::new();
    }
    let width = match range_width(parts as u64) {
        Some(w) => w,
        None => return vec![(U256::zero(), KEYSPACE_MAX)],
    };

    let mut ranges = Vec::with_capacity(parts);
    let mut start = U256::zero();
    for i in 0..parts {
        let end = if i + 1 == parts {
            KEYSPACE_MAX
        } else {
            start + width - U256::one()
        };
        ranges.push((start, end));
        if i + 1 < parts {
            start = end + U256::one();
        }
    }
    ranges
}

/// Big-endian 64-char lowercase hex rendering of a key
pub fn to_hex(value: &U256) -> String {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    hex::encode(buf)
}

/// Parse a key rendered by [`to_hex`] (shorter inputs are left-padded)
pub fn from_hex(s: &str) -> crate::Result<U256> {
    let s = s.trim_start_matches("0x");
    if s.is_empty() || s.len() > 64 {
        return Err(crate::Error::InvalidPayload(format!(
            "key must be 1..=64 hex chars, got {}",
            s.len()
        )));
    }
    let padded = format!("{:0>64}", s);
    let bytes = hex::decode(&padded)
        .map_err(|e| crate::Error::InvalidPayload(format!("invalid key hex: {}", e)))?;
    Ok(U256::from_big_endian(&bytes))
}

/// Serde adapter storing a `U256` as a hex string
pub mod hex_u256 {
    use primitive_types::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::to_hex(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_covers_keyspace(ranges: &[(U256, U256)]) {
        assert_eq!(ranges.first().unwrap().0, U256::zero());
        assert_eq!(ranges.last().unwrap().1, KEYSPACE_MAX);
        for w in ranges.windows(2) {
            assert!(w[0].0 <= w[0].1);
            assert_eq!(w[0].1 + U256::one(), w[1].0);
        }
    }

    #[test]
    fn test_partition_single() {
        assert_eq!(partition(1), vec![(U256::zero(), KEYSPACE_MAX)]);
        assert!(partition(0).is_empty());
    }

    #[test]
    fn test_partition_halves_are_exact() {
        let ranges = partition(2);
        assert_covers_keyspace(&ranges);
        let mut buf = [0u8; 32];
        buf[0] = 0x80;
        let half = U256::from_big_endian(&buf);
        assert_eq!(ranges[0].1, half - U256::one());
        assert_eq!(ranges[1].0, half);
    }

    #[test]
    fn test_partition_remainder_on_last() {
        let ranges = partition(3);
        assert_covers_keyspace(&ranges);
        let w0 = ranges[0].1 - ranges[0].0;
        let w1 = ranges[1].1 - ranges[1].0;
        let w2 = ranges[2].1 - ranges[2].0;
        assert_eq!(w0, w1);
        // 2^256 = 3 * floor(2^256 / 3) + 1
        assert_eq!(w2, w0 + U256::one());
    }

    #[test]
    fn test_partition_many() {
        for parts in [4usize, 5, 7, 16, 100] {
            let ranges = partition(parts);
            assert_eq!(ranges.len(), parts);
            assert_covers_keyspace(&ranges);
        }
    }

    #[test]
    fn test_hex_round_trip() {
        let v = KEYSPACE_MAX / U256::from(3u64);
        let s = to_hex(&v);
        assert_eq!(s.len(), 64);
        assert_eq!(from_hex(&s).unwrap(), v);
        assert_eq!(from_hex("ff").unwrap(), U256::from(255u64));
        assert!(from_hex("zz").is_err());
        assert!(from_hex("").is_err());
    }
}
