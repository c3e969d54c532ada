//! Nodemap: the versioned shard-to-replica-group table
//!
//! A `Nodemap` is immutable once published. Each recomputation builds a new
//! value; holders share it behind an `Arc` and replace it wholesale.

use crate::common::keyspace::{self, hex_u256, KEYSPACE_MAX};
use crate::common::Result;
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A contiguous inclusive keyspace range served by one replica group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardRange {
    pub replica_addrs: Vec<String>,
    #[serde(with = "hex_u256")]
    pub range_start: U256,
    #[serde(with = "hex_u256")]
    pub range_end: U256,
}

impl ShardRange {
    pub fn contains(&self, key: &U256) -> bool {
        self.range_start <= *key && *key <= self.range_end
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nodemap {
    pub shards: Vec<ShardRange>,
    pub version: i64,
}

impl Nodemap {
    /// The nodemap used before anything has been published (version 0)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a nodemap assigning equal-width ranges to `groups` in order
    pub fn from_groups(groups: Vec<Vec<String>>, version: i64) -> Self {
        let ranges = keyspace::partition(groups.len());
        let shards = groups
            .into_iter()
            .zip(ranges)
            .map(|(replica_addrs, (range_start, range_end))| ShardRange {
                replica_addrs,
                range_start,
                range_end,
            })
            .collect();
        Self { shards, version }
    }

    /// Replica groups in stored order
    pub fn groups(&self) -> Vec<Vec<String>> {
        self.shards.iter().map(|s| s.replica_addrs.clone()).collect()
    }

    /// Every address currently assigned to some shard
    pub fn assigned_addrs(&self) -> HashSet<&str> {
        self.shards
            .iter()
            .flat_map(|s| s.replica_addrs.iter().map(String::as_str))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Find the shard owning `key`
    pub fn locate(&self, key: &U256) -> Option<&ShardRange> {
        let idx = self.shards.partition_point(|s| s.range_start <= *key);
        if idx == 0 {
            return None;
        }
        let shard = &self.shards[idx - 1];
        shard.contains(key).then_some(shard)
    }

    /// Find the shard owning a routing digest
    pub fn locate_digest(&self, digest: &[u8]) -> Option<&ShardRange> {
        self.locate(&keyspace::key_from_digest(digest))
    }

    /// Check that ranges are ordered, disjoint and cover the whole keyspace
    ///
    /// An empty nodemap is valid (nothing published yet).
    pub fn validate(&self) -> Result<()> {
        let (first, last) = match (self.shards.first(), self.shards.last()) {
            (Some(f), Some(l)) => (f, l),
            _ => return Ok(()),
        };
        if first.range_start != U256::zero() {
            return Err(crate::Error::NodemapCorrupted(
                "first range does not start at 0".into(),
            ));
        }
        if last.range_end != KEYSPACE_MAX {
            return Err(crate::Error::NodemapCorrupted(
                "last range does not end at the keyspace maximum".into(),
            ));
        }
        for (i, shard) in self.shards.iter().enumerate() {
            if shard.range_start > shard.range_end {
                return Err(crate::Error::NodemapCorrupted(format!(
                    "range {} is inverted",
                    i
                )));
            }
            if shard.replica_addrs.is_empty() {
                return Err(crate::Error::NodemapCorrupted(format!(
                    "range {} has no replicas",
                    i
                )));
            }
        }
        for (i, pair) in self.shards.windows(2).enumerate() {
            if pair[0].range_end == KEYSPACE_MAX
                || pair[0].range_end + U256::one() != pair[1].range_start
            {
                return Err(crate::Error::NodemapCorrupted(format!(
                    "ranges {} and {} are not contiguous",
                    i,
                    i + 1
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::digest_id;

    fn groups(n: usize) -> Vec<Vec<String>> {
        (0..n)
            .map(|g| (0..3).map(|r| format!("10.0.{}.{}:10001", g, r)).collect())
            .collect()
    }

    #[test]
    fn test_from_groups_covers_keyspace() {
        let map = Nodemap::from_groups(groups(3), 1);
        assert_eq!(map.shards.len(), 3);
        map.validate().unwrap();
    }

    #[test]
    fn test_locate_every_key_has_one_owner() {
        let map = Nodemap::from_groups(groups(5), 1);
        for id in ["a", "b", "object-42", "", "zzzz"] {
            let digest = digest_id(id);
            let key = keyspace::key_from_digest(&digest);
            let owners = map.shards.iter().filter(|s| s.contains(&key)).count();
            assert_eq!(owners, 1);
            assert!(map.locate_digest(&digest).unwrap().contains(&key));
        }
        assert!(map.locate(&U256::zero()).is_some());
        assert!(map.locate(&KEYSPACE_MAX).is_some());
    }

    #[test]
    fn test_locate_empty() {
        assert!(Nodemap::empty().locate(&U256::zero()).is_none());
    }

    #[test]
    fn test_validate_rejects_gap() {
        let mut map = Nodemap::from_groups(groups(2), 1);
        map.shards[1].range_start = map.shards[1].range_start + U256::one();
        assert!(map.validate().is_err());
    }

    #[test]
    fn test_json_shape() {
        let map = Nodemap::from_groups(groups(1), 7);
        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json["version"], 7);
        assert_eq!(json["shards"][0]["rangeStart"], "0".repeat(64));
        assert_eq!(json["shards"][0]["rangeEnd"], "f".repeat(64));
        assert_eq!(json["shards"][0]["replicaAddrs"][0], "10.0.0.0:10001");

        let back: Nodemap = serde_json::from_value(json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_assigned_addrs() {
        let map = Nodemap::from_groups(groups(2), 1);
        let addrs = map.assigned_addrs();
        assert_eq!(addrs.len(), 6);
        assert!(addrs.contains("10.0.1.2:10001"));
    }
}
