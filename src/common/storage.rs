//! Shared store abstraction for the coordinator
//!
//! Heartbeats, the published nodemap and the recomputation lock live in an
//! external linearizable store. Two seams are modelled:
//! - [`ClusterStore`]: get / put / prefix scan over string keys
//! - [`LockService`]: lease-bound exclusive locks with fencing tokens
//!
//! Backends: [`MemStore`] (in-process), [`RocksStore`] (RocksDB, durable on
//! one host) and, with the `etcd` feature, `EtcdStore` (shared by
//! coordinators on any number of hosts).

use crate::common::config::StoreConfig;
use crate::common::utils::timestamp_now_millis;
use crate::common::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use rocksdb::{IteratorMode, Options, DB};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Key-value operations the coordinator needs from the shared store
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write `value` at `key`; durable once this returns
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// All records whose key starts with `prefix`, in key order
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;
}

/// A granted lease on a named lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub name: String,
    pub holder: String,
    /// Fencing token, strictly increasing per lock name
    pub token: u64,
    pub expires_at_ms: u64,
}

/// Lease-bound mutual exclusion
#[async_trait]
pub trait LockService: Send + Sync {
    /// Take `name` for `ttl`; `None` if another holder has an unexpired lease
    async fn try_acquire(&self, name: &str, holder: &str, ttl: Duration) -> Result<Option<Lease>>;

    /// Extend a held lease; fails with `LeaseLost` if it was taken over or expired
    async fn renew(&self, lease: &Lease, ttl: Duration) -> Result<Lease>;

    /// Give the lock up early; releasing a lost lease is a no-op
    async fn release(&self, lease: &Lease) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockRecord {
    holder: String,
    token: u64,
    expires_at_ms: u64,
}

impl LockRecord {
    fn lease(&self, name: &str) -> Lease {
        Lease {
            name: name.to_string(),
            holder: self.holder.clone(),
            token: self.token,
            expires_at_ms: self.expires_at_ms,
        }
    }

    fn is_held_by(&self, lease: &Lease, now: u64) -> bool {
        self.holder == lease.holder && self.token == lease.token && self.expires_at_ms > now
    }
}

/// Decide whether `holder` may take a lock currently in state `existing`
///
/// An unexpired lease is never granted again, not even to the same holder
/// name; extending a lease goes through `renew`.
fn grant(
    existing: Option<&LockRecord>,
    holder: &str,
    now: u64,
    ttl: Duration,
) -> Option<LockRecord> {
    let token = match existing {
        Some(rec) if rec.expires_at_ms > now => return None,
        Some(rec) => rec.token + 1,
        None => 1,
    };
    Some(LockRecord {
        holder: holder.to_string(),
        token,
        expires_at_ms: now + ttl.as_millis() as u64,
    })
}

/// Store handles used by the coordinator
#[derive(Clone)]
pub struct StoreHandles {
    pub kv: Arc<dyn ClusterStore>,
    pub locks: Arc<dyn LockService>,
}

impl StoreHandles {
    pub async fn open(config: &StoreConfig) -> Result<Self> {
        match config {
            StoreConfig::Memory => Ok(Self::memory()),
            StoreConfig::Rocksdb { path } => {
                let store = Arc::new(RocksStore::open(path)?);
                Ok(Self {
                    kv: store.clone(),
                    locks: store,
                })
            }
            #[cfg(feature = "etcd")]
            StoreConfig::Etcd { endpoints, prefix } => {
                let store = crate::common::etcd_store::EtcdStore::connect(endpoints, prefix).await?;
                let store = Arc::new(store);
                Ok(Self {
                    kv: store.clone(),
                    locks: store,
                })
            }
            #[cfg(not(feature = "etcd"))]
            StoreConfig::Etcd { .. } => Err(crate::Error::InvalidConfig(
                "etcd store backend needs the `etcd` feature".into(),
            )),
        }
    }

    pub fn memory() -> Self {
        let store = Arc::new(MemStore::new());
        Self {
            kv: store.clone(),
            locks: store,
        }
    }
}

/// In-memory store
#[derive(Default)]
pub struct MemStore {
    map: Mutex<BTreeMap<String, Vec<u8>>>,
    locks: Mutex<HashMap<String, LockRecord>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClusterStore for MemStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.map.lock().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.map.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        Ok(self
            .map
            .lock()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[async_trait]
impl LockService for MemStore {
    async fn try_acquire(&self, name: &str, holder: &str, ttl: Duration) -> Result<Option<Lease>> {
        let mut locks = self.locks.lock();
        let now = timestamp_now_millis();
        match grant(locks.get(name), holder, now, ttl) {
            Some(rec) => {
                let lease = rec.lease(name);
                locks.insert(name.to_string(), rec);
                Ok(Some(lease))
            }
            None => Ok(None),
        }
    }

    async fn renew(&self, lease: &Lease, ttl: Duration) -> Result<Lease> {
        let mut locks = self.locks.lock();
        let now = timestamp_now_millis();
        match locks.get_mut(&lease.name) {
            Some(rec) if rec.is_held_by(lease, now) => {
                rec.expires_at_ms = now + ttl.as_millis() as u64;
                Ok(rec.lease(&lease.name))
            }
            _ => Err(crate::Error::LeaseLost(lease.name.clone())),
        }
    }

    async fn release(&self, lease: &Lease) -> Result<()> {
        let mut locks = self.locks.lock();
        if let Some(rec) = locks.get_mut(&lease.name) {
            if rec.holder == lease.holder && rec.token == lease.token {
                rec.expires_at_ms = 0;
            }
        }
        Ok(())
    }
}

const CF_KV: &str = "kv";
const CF_LOCKS: &str = "locks";

/// RocksDB store
///
/// Lock updates are serialized by an in-process mutex, so exclusivity holds
/// between coordinators sharing this process (or this database directory
/// through a single process).
pub struct RocksStore {
    db: DB,
    lock_mutex: Mutex<()>,
}

impl RocksStore {
    /// Open or create the store
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(&opts, path, vec![CF_KV, CF_LOCKS])?;

        Ok(Self {
            db,
            lock_mutex: Mutex::new(()),
        })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| crate::Error::Store(format!("missing column family {}", name)))
    }

    fn read_lock(&self, name: &str) -> Result<Option<LockRecord>> {
        let cf = self.cf(CF_LOCKS)?;
        match self.db.get_cf(cf, name.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_lock(&self, name: &str, rec: &LockRecord) -> Result<()> {
        let cf = self.cf(CF_LOCKS)?;
        self.db.put_cf(cf, name.as_bytes(), serde_json::to_vec(rec)?)?;
        Ok(())
    }
}

#[async_trait]
impl ClusterStore for RocksStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let cf = self.cf(CF_KV)?;
        Ok(self.db.get_cf(cf, key.as_bytes())?)
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let cf = self.cf(CF_KV)?;
        let mut write_opts = rocksdb::WriteOptions::default();
        write_opts.set_sync(true);
        self.db.put_cf_opt(cf, key.as_bytes(), value, &write_opts)?;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let cf = self.cf(CF_KV)?;
        let iter = self.db.iterator_cf(
            cf,
            IteratorMode::From(prefix.as_bytes(), rocksdb::Direction::Forward),
        );

        let mut records = Vec::new();
        for item in iter {
            let (key_bytes, value) = item?;
            if !key_bytes.starts_with(prefix.as_bytes()) {
                break;
            }
            let key = String::from_utf8(key_bytes.to_vec())
                .map_err(|_| crate::Error::Store("invalid UTF-8 key".into()))?;
            records.push((key, value.to_vec()));
        }
        Ok(records)
    }
}

#[async_trait]
impl LockService for RocksStore {
    async fn try_acquire(&self, name: &str, holder: &str, ttl: Duration) -> Result<Option<Lease>> {
        let _guard = self.lock_mutex.lock();
        let now = timestamp_now_millis();
        let existing = self.read_lock(name)?;
        match grant(existing.as_ref(), holder, now, ttl) {
            Some(rec) => {
                self.write_lock(name, &rec)?;
                Ok(Some(rec.lease(name)))
            }
            None => Ok(None),
        }
    }

    async fn renew(&self, lease: &Lease, ttl: Duration) -> Result<Lease> {
        let _guard = self.lock_mutex.lock();
        let now = timestamp_now_millis();
        match self.read_lock(&lease.name)? {
            Some(mut rec) if rec.is_held_by(lease, now) => {
                rec.expires_at_ms = now + ttl.as_millis() as u64;
                self.write_lock(&lease.name, &rec)?;
                Ok(rec.lease(&lease.name))
            }
            _ => Err(crate::Error::LeaseLost(lease.name.clone())),
        }
    }

    async fn release(&self, lease: &Lease) -> Result<()> {
        let _guard = self.lock_mutex.lock();
        if let Some(mut rec) = self.read_lock(&lease.name)? {
            if rec.holder == lease.holder && rec.token == lease.token {
                rec.expires_at_ms = 0;
                self.write_lock(&lease.name, &rec)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TTL: Duration = Duration::from_secs(10);

    async fn exercise_kv(store: &dyn ClusterStore) {
        store.put("nodes/b", b"2".to_vec()).await.unwrap();
        store.put("nodes/a", b"1".to_vec()).await.unwrap();
        store.put("nodemap/current", b"m".to_vec()).await.unwrap();
        store.put("nodes/a", b"1b".to_vec()).await.unwrap();

        assert_eq!(store.get("nodes/a").await.unwrap(), Some(b"1b".to_vec()));
        assert_eq!(store.get("nodes/zz").await.unwrap(), None);

        let nodes = store.scan_prefix("nodes/").await.unwrap();
        let keys: Vec<_> = nodes.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["nodes/a", "nodes/b"]);
        assert_eq!(store.scan_prefix("nodemap/").await.unwrap().len(), 1);
        assert!(store.scan_prefix("bootstrap/").await.unwrap().is_empty());
    }

    async fn exercise_locks(locks: &dyn LockService) {
        let a = locks.try_acquire("nodemap", "coord-a", TTL).await.unwrap().unwrap();
        assert!(locks.try_acquire("nodemap", "coord-b", TTL).await.unwrap().is_none());
        // Two processes configured with the same id must still exclude each other.
        assert!(locks.try_acquire("nodemap", "coord-a", TTL).await.unwrap().is_none());

        let renewed = locks.renew(&a, TTL).await.unwrap();
        assert_eq!(renewed.token, a.token);

        locks.release(&a).await.unwrap();
        let b = locks.try_acquire("nodemap", "coord-b", TTL).await.unwrap().unwrap();
        assert!(b.token > a.token);
        assert!(matches!(
            locks.renew(&a, TTL).await,
            Err(crate::Error::LeaseLost(_))
        ));
    }

    #[tokio::test]
    async fn test_mem_store() {
        let store = MemStore::new();
        exercise_kv(&store).await;
        exercise_locks(&store).await;
    }

    #[tokio::test]
    async fn test_rocks_store() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(dir.path().join("store.db")).unwrap();
        exercise_kv(&store).await;
        exercise_locks(&store).await;
    }

    #[tokio::test]
    async fn test_rocks_store_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.db");
        {
            let store = RocksStore::open(&path).unwrap();
            store.put("nodemap/current", b"v1".to_vec()).await.unwrap();
        }
        let store = RocksStore::open(&path).unwrap();
        assert_eq!(
            store.get("nodemap/current").await.unwrap(),
            Some(b"v1".to_vec())
        );
    }

    #[tokio::test]
    async fn test_open_backends() {
        let dir = tempdir().unwrap();
        let handles = StoreHandles::open(&StoreConfig::Rocksdb {
            path: dir.path().join("store.db"),
        })
        .await
        .unwrap();
        handles.kv.put("nodes/a", b"1".to_vec()).await.unwrap();
        assert!(handles
            .locks
            .try_acquire("nodemap", "coord-a", TTL)
            .await
            .unwrap()
            .is_some());

        assert!(StoreHandles::open(&StoreConfig::Memory).await.is_ok());
    }

    #[cfg(not(feature = "etcd"))]
    #[tokio::test]
    async fn test_etcd_needs_feature() {
        let config = StoreConfig::etcd(vec!["http://127.0.0.1:2379".into()]);
        assert!(matches!(
            StoreHandles::open(&config).await,
            Err(crate::Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_taken_over() {
        let store = MemStore::new();
        let a = store
            .try_acquire("nodemap", "coord-a", Duration::from_millis(0))
            .await
            .unwrap()
            .unwrap();
        let b = store
            .try_acquire("nodemap", "coord-b", TTL)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(b.holder, "coord-b");
        assert!(b.token > a.token);
    }
}
