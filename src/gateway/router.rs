//! Key resolution and replica dispatch
//!
//! An identifier is routed by its SHA-256 digest, which is also the handler
//! sent to the replicas. Replicas are tried in nodemap order, once each; the
//! first success wins.

use crate::common::{digest_id, Digest, Error, Result, METRICS};
use crate::connector::{SliceTransport, WireError};
use crate::gateway::cache::NodemapCache;
use bytes::Bytes;
use std::sync::Arc;

/// Where an identifier lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub handler: Digest,
    pub replica_addrs: Vec<String>,
}

pub struct GatewayRouter {
    cache: Arc<NodemapCache>,
    transport: Arc<dyn SliceTransport>,
}

impl GatewayRouter {
    pub fn new(cache: Arc<NodemapCache>, transport: Arc<dyn SliceTransport>) -> Self {
        Self { cache, transport }
    }

    pub fn cache(&self) -> &Arc<NodemapCache> {
        &self.cache
    }

    /// Map `id` to its handler and replica group using the cached nodemap
    pub fn resolve(&self, id: &str) -> Result<Placement> {
        let handler = digest_id(id);
        let nodemap = self.cache.get();
        let shard = nodemap
            .locate_digest(&handler)
            .ok_or_else(|| Error::NoShardForKey(hex::encode(handler)))?;
        Ok(Placement {
            handler,
            replica_addrs: shard.replica_addrs.clone(),
        })
    }

    /// Read an object from the first replica that serves it
    ///
    /// `NotFound` when every replica failed and at least one answered 404.
    pub async fn get(&self, id: &str) -> Result<Bytes> {
        let placement = self.resolve(id)?;
        let mut failures = Failures::default();

        for addr in &placement.replica_addrs {
            match self.transport.get_slice(addr, &placement.handler).await {
                Ok(data) => {
                    METRICS.bytes_read.add(data.len() as u64);
                    return Ok(data);
                }
                Err(e) => failures.push(addr, e),
            }
        }

        if failures.not_found {
            return Err(Error::NotFound(id.to_string()));
        }
        Err(failures.exhausted(placement.replica_addrs.len()))
    }

    /// Write an object to the first replica that accepts it
    pub async fn put(&self, id: &str, data: Bytes) -> Result<()> {
        let placement = self.resolve(id)?;
        let mut failures = Failures::default();
        let len = data.len() as u64;

        for addr in &placement.replica_addrs {
            match self
                .transport
                .put_slice(addr, &placement.handler, Some(data.clone()))
                .await
            {
                Ok(()) => {
                    METRICS.bytes_written.add(len);
                    return Ok(());
                }
                Err(e) => failures.push(addr, e),
            }
        }

        Err(failures.exhausted(placement.replica_addrs.len()))
    }
}

#[derive(Default)]
struct Failures {
    not_found: bool,
    last: Option<WireError>,
}

impl Failures {
    fn push(&mut self, addr: &str, err: WireError) {
        METRICS.replica_failures.inc();
        tracing::warn!("Replica {} failed: {}", addr, err);
        self.not_found |= err.is_not_found();
        self.last = Some(err);
    }

    fn exhausted(self, attempted: usize) -> Error {
        METRICS.replicas_exhausted.inc();
        Error::ReplicasExhausted {
            attempted,
            last: self
                .last
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no replicas".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Nodemap;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// In-memory replicas; addresses listed in `down` fail with a transport-like error
    #[derive(Default)]
    struct FakeTransport {
        slices: Mutex<HashMap<(String, Vec<u8>), Bytes>>,
        down: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SliceTransport for FakeTransport {
        async fn get_slice(
            &self,
            addr: &str,
            handler: &[u8],
        ) -> std::result::Result<Bytes, WireError> {
            self.calls.lock().push(addr.to_string());
            if self.down.iter().any(|d| d == addr) {
                return Err(WireError::Timeout { url: addr.to_string() });
            }
            self.slices
                .lock()
                .get(&(addr.to_string(), handler.to_vec()))
                .cloned()
                .ok_or_else(|| WireError::Status {
                    url: addr.to_string(),
                    status: 404,
                    body: "Not found".into(),
                })
        }

        async fn put_slice(
            &self,
            addr: &str,
            handler: &[u8],
            data: Option<Bytes>,
        ) -> std::result::Result<(), WireError> {
            self.calls.lock().push(addr.to_string());
            if self.down.iter().any(|d| d == addr) {
                return Err(WireError::Timeout { url: addr.to_string() });
            }
            let data = data.ok_or(WireError::PutNilSlice)?;
            self.slices
                .lock()
                .insert((addr.to_string(), handler.to_vec()), data);
            Ok(())
        }
    }

    fn router(groups: Vec<Vec<&str>>, transport: Arc<FakeTransport>) -> GatewayRouter {
        let groups = groups
            .into_iter()
            .map(|g| g.into_iter().map(String::from).collect())
            .collect();
        let cache = Arc::new(NodemapCache::new(Nodemap::from_groups(groups, 1)));
        GatewayRouter::new(cache, transport)
    }

    #[test]
    fn test_resolve_uses_digest() {
        let r = router(vec![vec!["a:1"], vec!["b:1"]], Arc::new(FakeTransport::default()));
        let placement = r.resolve("x").unwrap();
        assert_eq!(placement.handler, digest_id("x"));
        assert_eq!(placement.replica_addrs.len(), 1);
    }

    #[test]
    fn test_empty_nodemap_has_no_shard() {
        let cache = Arc::new(NodemapCache::default());
        let r = GatewayRouter::new(cache, Arc::new(FakeTransport::default()));
        assert!(matches!(r.resolve("x"), Err(Error::NoShardForKey(_))));
    }

    #[tokio::test]
    async fn test_falls_back_to_next_replica() {
        let transport = Arc::new(FakeTransport {
            down: vec!["a:1".into()],
            ..Default::default()
        });
        let r = router(vec![vec!["a:1", "b:1"]], transport.clone());

        r.put("x", Bytes::from_static(b"payload")).await.unwrap();
        assert_eq!(r.get("x").await.unwrap(), Bytes::from_static(b"payload"));
        assert_eq!(*transport.calls.lock(), vec!["a:1", "b:1", "a:1", "b:1"]);
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let transport = Arc::new(FakeTransport::default());
        let r = router(vec![vec!["a:1", "b:1", "c:1"]], transport.clone());
        r.put("x", Bytes::from_static(b"v")).await.unwrap();
        assert_eq!(*transport.calls.lock(), vec!["a:1"]);
    }

    #[tokio::test]
    async fn test_all_replicas_down() {
        let transport = Arc::new(FakeTransport {
            down: vec!["a:1".into(), "b:1".into()],
            ..Default::default()
        });
        let r = router(vec![vec!["a:1", "b:1"]], transport);

        let err = r.get("x").await.unwrap_err();
        assert!(matches!(err, Error::ReplicasExhausted { attempted: 2, .. }));
        let err = r.put("x", Bytes::from_static(b"v")).await.unwrap_err();
        assert!(matches!(err, Error::ReplicasExhausted { attempted: 2, .. }));
    }

    #[tokio::test]
    async fn test_not_found_when_a_replica_says_so() {
        let transport = Arc::new(FakeTransport {
            down: vec!["a:1".into()],
            ..Default::default()
        });
        let r = router(vec![vec!["a:1", "b:1"]], transport);
        assert!(matches!(r.get("missing").await, Err(Error::NotFound(_))));
    }
}
