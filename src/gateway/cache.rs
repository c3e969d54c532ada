//! Cached nodemap with periodic refresh
//!
//! The cache holds an `Arc<Nodemap>` that is swapped wholesale. Fetching
//! happens outside the lock; readers never wait on the network.

use crate::common::{base_url, Error, Nodemap, Result, METRICS};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

pub struct NodemapCache {
    current: RwLock<Arc<Nodemap>>,
}

impl Default for NodemapCache {
    fn default() -> Self {
        Self::new(Nodemap::empty())
    }
}

impl NodemapCache {
    pub fn new(initial: Nodemap) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
        }
    }

    /// Snapshot of the cached nodemap
    pub fn get(&self) -> Arc<Nodemap> {
        self.current.read().clone()
    }

    /// Replace the cached nodemap, returning the previous one
    pub fn swap(&self, nodemap: Nodemap) -> Arc<Nodemap> {
        let next = Arc::new(nodemap);
        std::mem::replace(&mut *self.current.write(), next)
    }

    pub fn version(&self) -> i64 {
        self.current.read().version
    }
}

/// Fetches the published nodemap from the coordinator
#[derive(Clone)]
pub struct NodemapFetcher {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl NodemapFetcher {
    pub fn new(monitor_addr: &str, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: format!("{}/nodemap", base_url(monitor_addr)),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch and validate the published nodemap
    pub async fn fetch(&self) -> Result<Nodemap> {
        let response = self
            .http
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Http(format!("{}: {}", self.url, e)))?;

        if !response.status().is_success() {
            return Err(Error::Http(format!(
                "{}: status {}",
                self.url,
                response.status()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Http(format!("{}: {}", self.url, e)))?;
        let nodemap: Nodemap = serde_json::from_slice(&body)?;
        nodemap.validate()?;
        Ok(nodemap)
    }

    /// One refresh attempt; the stale copy is kept on failure
    pub async fn refresh(&self, cache: &NodemapCache) -> Result<()> {
        match self.fetch().await {
            Ok(nodemap) => {
                let version = nodemap.version;
                let previous = cache.swap(nodemap);
                if version < previous.version {
                    tracing::warn!(
                        version,
                        previous = previous.version,
                        "Nodemap version went backwards"
                    );
                } else if version > previous.version {
                    tracing::info!(version, "Nodemap updated");
                }
                METRICS.nodemap_version.set(version.max(0) as u64);
                Ok(())
            }
            Err(e) => {
                METRICS.refresh_failures.inc();
                tracing::warn!(
                    "Nodemap refresh failed, keeping version {}: {}",
                    cache.version(),
                    e
                );
                Err(e)
            }
        }
    }

    /// Refresh forever at `interval`
    pub async fn run(self, cache: Arc<NodemapCache>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let _ = self.refresh(&cache).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodemap(version: i64) -> Nodemap {
        Nodemap::from_groups(vec![vec!["a:1".into()]], version)
    }

    #[test]
    fn test_swap_replaces_wholesale() {
        let cache = NodemapCache::default();
        assert_eq!(cache.version(), 0);
        assert!(cache.get().is_empty());

        let before = cache.get();
        let previous = cache.swap(nodemap(2));
        assert_eq!(previous.version, 0);
        assert_eq!(cache.version(), 2);
        // Earlier snapshots are unaffected.
        assert!(before.is_empty());
        assert_eq!(cache.get().shards.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_stale_copy() {
        let cache = NodemapCache::new(nodemap(3));
        let fetcher = NodemapFetcher::new("127.0.0.1:1", Duration::from_millis(200));
        assert_eq!(fetcher.url(), "http://127.0.0.1:1/nodemap");

        assert!(fetcher.refresh(&cache).await.is_err());
        assert_eq!(cache.version(), 3);
    }
}
