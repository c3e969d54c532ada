//! etcd-backed shared store
//!
//! Lets coordinators on different hosts share heartbeats, the published
//! nodemap and the recomputation lock. All keys live under a configurable
//! prefix so several deployments can share one etcd cluster.
//!
//! A lock is the key `{prefix}locks/{name}`, created only if absent and bound
//! to an etcd lease. Its create revision is the fencing token. The lease dies
//! with the holder, which deletes the key.

use crate::common::storage::{ClusterStore, Lease, LockService};
use crate::common::{timestamp_now_millis, Error, Result};
use async_trait::async_trait;
use etcd_client::{Client, Compare, CompareOp, GetOptions, PutOptions, Txn, TxnOp};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

const LOCKS_DIR: &str = "locks/";

pub struct EtcdStore {
    client: Client,
    prefix: String,
    /// etcd lease ids of the locks held through this store, by (name, token)
    leases: Mutex<HashMap<(String, u64), i64>>,
}

impl EtcdStore {
    pub async fn connect(endpoints: &[String], prefix: &str) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(Error::InvalidConfig("etcd endpoints are empty".into()));
        }
        let client = Client::connect(endpoints, None).await?;
        tracing::info!("Connected to etcd at {}", endpoints.join(","));

        Ok(Self {
            client,
            prefix: prefix.to_string(),
            leases: Mutex::new(HashMap::new()),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn lock_key(&self, name: &str) -> String {
        format!("{}{}{}", self.prefix, LOCKS_DIR, name)
    }

    fn lease_id(&self, lease: &Lease) -> Option<i64> {
        self.leases
            .lock()
            .get(&(lease.name.clone(), lease.token))
            .copied()
    }

    /// Create revision of the lock key, if it exists
    async fn lock_revision(&self, name: &str) -> Result<Option<i64>> {
        let mut client = self.client.clone();
        let resp = client.get(self.lock_key(name), None).await?;
        Ok(resp.kvs().first().map(|kv| kv.create_revision()))
    }
}

#[async_trait]
impl ClusterStore for EtcdStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut client = self.client.clone();
        let resp = client.get(self.key(key), None).await?;
        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut client = self.client.clone();
        client.put(self.key(key), value, None).await?;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mut client = self.client.clone();
        let resp = client
            .get(self.key(prefix), Some(GetOptions::new().with_prefix()))
            .await?;

        let mut records = Vec::with_capacity(resp.kvs().len());
        for kv in resp.kvs() {
            let key = kv.key_str()?;
            let key = key.strip_prefix(self.prefix.as_str()).unwrap_or(key);
            records.push((key.to_string(), kv.value().to_vec()));
        }
        Ok(records)
    }
}

#[async_trait]
impl LockService for EtcdStore {
    async fn try_acquire(&self, name: &str, holder: &str, ttl: Duration) -> Result<Option<Lease>> {
        let mut client = self.client.clone();
        // etcd leases have second granularity
        let ttl_secs = ttl.as_secs().max(1);
        let lease_id = client.lease_grant(ttl_secs as i64, None).await?.id();

        let key = self.lock_key(name);
        let txn = Txn::new()
            .when(vec![Compare::create_revision(
                key.clone(),
                CompareOp::Equal,
                0,
            )])
            .and_then(vec![TxnOp::put(
                key,
                holder,
                Some(PutOptions::new().with_lease(lease_id)),
            )]);
        let resp = client.txn(txn).await?;

        if !resp.succeeded() {
            if let Err(e) = client.lease_revoke(lease_id).await {
                tracing::debug!("Failed to revoke unused lease {:x}: {}", lease_id, e);
            }
            return Ok(None);
        }

        let token = resp
            .header()
            .map(|h| h.revision() as u64)
            .ok_or_else(|| Error::Store("etcd txn response without header".into()))?;
        self.leases
            .lock()
            .insert((name.to_string(), token), lease_id);

        Ok(Some(Lease {
            name: name.to_string(),
            holder: holder.to_string(),
            token,
            expires_at_ms: timestamp_now_millis() + ttl_secs * 1000,
        }))
    }

    async fn renew(&self, lease: &Lease, _ttl: Duration) -> Result<Lease> {
        let lost = || Error::LeaseLost(lease.name.clone());
        let lease_id = self.lease_id(lease).ok_or_else(lost)?;

        if self.lock_revision(&lease.name).await? != Some(lease.token as i64) {
            self.leases.lock().remove(&(lease.name.clone(), lease.token));
            return Err(lost());
        }

        let mut client = self.client.clone();
        let (mut keeper, mut stream) = client.lease_keep_alive(lease_id).await?;
        keeper.keep_alive().await?;
        match stream.message().await? {
            Some(resp) if resp.ttl() > 0 => Ok(Lease {
                expires_at_ms: timestamp_now_millis() + resp.ttl() as u64 * 1000,
                ..lease.clone()
            }),
            _ => {
                self.leases.lock().remove(&(lease.name.clone(), lease.token));
                Err(lost())
            }
        }
    }

    async fn release(&self, lease: &Lease) -> Result<()> {
        let lease_id = self.leases.lock().remove(&(lease.name.clone(), lease.token));
        let Some(lease_id) = lease_id else {
            return Ok(());
        };

        // Revoking the lease deletes the lock key attached to it.
        let mut client = self.client.clone();
        if let Err(e) = client.lease_revoke(lease_id).await {
            tracing::debug!("Failed to revoke lease {:x} of {}: {}", lease_id, lease.name, e);
        }
        Ok(())
    }
}

/// These tests need a running etcd; set `SLICEMAP_TEST_ETCD` to its endpoints
/// (comma separated) to run them.
#[cfg(test)]
mod tests {
    use super::*;

    async fn connect() -> Option<EtcdStore> {
        let endpoints = std::env::var("SLICEMAP_TEST_ETCD").ok()?;
        let endpoints: Vec<String> = endpoints.split(',').map(str::to_string).collect();
        let prefix = format!("slicemap-test-{}/", uuid::Uuid::new_v4());
        Some(EtcdStore::connect(&endpoints, &prefix).await.unwrap())
    }

    #[tokio::test]
    async fn test_kv_under_prefix() {
        let Some(store) = connect().await else {
            return;
        };

        store.put("nodes/b", b"2".to_vec()).await.unwrap();
        store.put("nodes/a", b"1".to_vec()).await.unwrap();
        store.put("nodemap/current", b"m".to_vec()).await.unwrap();

        assert_eq!(store.get("nodes/a").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get("nodes/zz").await.unwrap(), None);

        let nodes = store.scan_prefix("nodes/").await.unwrap();
        let keys: Vec<_> = nodes.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["nodes/a", "nodes/b"]);
    }

    #[tokio::test]
    async fn test_lock_excludes_other_processes() {
        let Some(a) = connect().await else {
            return;
        };
        // A second client on the same prefix stands in for another process.
        let b = EtcdStore {
            client: a.client.clone(),
            prefix: a.prefix.clone(),
            leases: Mutex::new(HashMap::new()),
        };
        let ttl = Duration::from_secs(5);

        let held = a.try_acquire("nodemap", "coord", ttl).await.unwrap().unwrap();
        assert!(b.try_acquire("nodemap", "coord", ttl).await.unwrap().is_none());

        let renewed = a.renew(&held, ttl).await.unwrap();
        assert_eq!(renewed.token, held.token);
        // Only the process holding the etcd lease can renew it.
        assert!(matches!(b.renew(&held, ttl).await, Err(Error::LeaseLost(_))));

        a.release(&held).await.unwrap();
        let next = b.try_acquire("nodemap", "coord", ttl).await.unwrap().unwrap();
        assert!(next.token > held.token);
        assert!(matches!(a.renew(&held, ttl).await, Err(Error::LeaseLost(_))));
        b.release(&next).await.unwrap();
    }
}
