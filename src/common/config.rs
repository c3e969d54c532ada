//! Configuration for slicemap components
//!
//! Values come from (lowest to highest priority): built-in defaults, an
//! optional TOML file named by `SLICEMAP_CONFIG` (default `slicemap.toml`),
//! `SLICEMAP__SECTION__KEY` environment variables, then CLI flags applied by
//! the binaries.

use crate::connector::ConsistencyPolicy;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "SLICEMAP_CONFIG";

const DEFAULT_CONFIG_FILE: &str = "slicemap.toml";

/// Global configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Node ID (used as the lock holder identity)
    pub node_id: Option<String>,

    /// Coordinator-specific config
    pub coordinator: CoordinatorConfig,

    /// Gateway-specific config
    pub gateway: GatewayConfig,

    /// Logging level, used when `RUST_LOG` is unset
    pub log_level: Option<String>,
}

impl Config {
    /// Load defaults, the optional config file and environment overrides
    pub fn load() -> crate::Result<Self> {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> crate::Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path).required(false))
            .add_source(
                ::config::Environment::with_prefix("SLICEMAP")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;
        let config: Config = settings.try_deserialize()?;
        config.coordinator.validate()?;
        config.gateway.validate()?;
        Ok(config)
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }
}

/// Where the coordinator keeps heartbeats, the nodemap and its lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    /// In-process store; state is lost on restart
    Memory,
    /// RocksDB database directory
    Rocksdb { path: PathBuf },
    /// etcd cluster shared by every coordinator (needs the `etcd` feature)
    Etcd {
        endpoints: Vec<String>,
        #[serde(default = "default_etcd_prefix")]
        prefix: String,
    },
}

fn default_etcd_prefix() -> String {
    "slicemap/".to_string()
}

impl StoreConfig {
    /// etcd store on `endpoints` under the default key prefix
    pub fn etcd(endpoints: Vec<String>) -> Self {
        StoreConfig::Etcd {
            endpoints,
            prefix: default_etcd_prefix(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Rocksdb {
            path: PathBuf::from("./coord-data"),
        }
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Bind address for HTTP API
    pub bind_addr: SocketAddr,

    /// Shared store backend
    pub store: StoreConfig,

    /// Replicas per group
    pub group_size: usize,

    /// Period of the recomputation cycle
    pub cycle_interval_ms: u64,

    /// Lease TTL of the recomputation lock
    pub lock_ttl_ms: u64,

    /// Well-known resource name of the recomputation lock
    pub lock_name: String,

    /// Pause between group bootstrap calls
    pub bootstrap_settle_ms: u64,

    /// Timeout of each bootstrap call
    pub bootstrap_timeout_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            store: StoreConfig::default(),
            group_size: 3,
            cycle_interval_ms: 10_000,
            lock_ttl_ms: 10_000,
            lock_name: "nodemap-coordinator".to_string(),
            bootstrap_settle_ms: 1_000,
            bootstrap_timeout_ms: 5_000,
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.group_size == 0 {
            return Err(crate::Error::InvalidConfig(
                "group_size must be at least 1".into(),
            ));
        }
        if self.cycle_interval_ms == 0 || self.lock_ttl_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "cycle_interval_ms and lock_ttl_ms must be positive".into(),
            ));
        }
        if self.lock_name.is_empty() {
            return Err(crate::Error::InvalidConfig("lock_name is empty".into()));
        }
        if let StoreConfig::Etcd { endpoints, .. } = &self.store {
            if endpoints.iter().all(|e| e.trim().is_empty()) {
                return Err(crate::Error::InvalidConfig(
                    "etcd store needs at least one endpoint".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn bootstrap_settle(&self) -> Duration {
        Duration::from_millis(self.bootstrap_settle_ms)
    }

    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_millis(self.bootstrap_timeout_ms)
    }
}

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Bind address for HTTP API
    pub bind_addr: SocketAddr,

    /// Coordinator base URL serving `/nodemap`
    pub monitor_addr: String,

    /// Period of the nodemap refresh task
    pub refresh_interval_ms: u64,

    /// Timeout of each replica and nodemap request
    pub request_timeout_ms: u64,

    /// Consistency policy forwarded to replicas
    pub consistency: ConsistencyPolicy,

    /// Largest accepted upload
    pub max_body_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 10000)),
            monitor_addr: "http://127.0.0.1:5000".to_string(),
            refresh_interval_ms: 10_000,
            request_timeout_ms: 5_000,
            consistency: ConsistencyPolicy::StrongConsistency,
            max_body_bytes: 64 * 1024 * 1024,
        }
    }
}

impl GatewayConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.monitor_addr.trim().is_empty() {
            return Err(crate::Error::InvalidConfig("monitor_addr is empty".into()));
        }
        if self.refresh_interval_ms == 0 || self.request_timeout_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "refresh_interval_ms and request_timeout_ms must be positive".into(),
            ));
        }
        if self.max_body_bytes == 0 {
            return Err(crate::Error::InvalidConfig(
                "max_body_bytes must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.coordinator.group_size, 3);
        assert_eq!(config.coordinator.cycle_interval(), Duration::from_secs(10));
        assert_eq!(config.gateway.request_timeout(), Duration::from_secs(5));
        assert_eq!(
            config.gateway.consistency,
            ConsistencyPolicy::StrongConsistency
        );
        assert_eq!(config.log_level(), "info");
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slicemap.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
node_id = "coord-a"
log_level = "debug"

[coordinator]
group_size = 5
cycle_interval_ms = 2000

[coordinator.store]
backend = "memory"

[gateway]
monitor_addr = "http://coord:5000"
consistency = "weak"
"#
        )
        .unwrap();

        let config = Config::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.node_id.as_deref(), Some("coord-a"));
        assert_eq!(config.coordinator.group_size, 5);
        assert_eq!(config.coordinator.cycle_interval_ms, 2000);
        assert_eq!(config.coordinator.lock_ttl_ms, 10_000);
        assert_eq!(config.coordinator.store, StoreConfig::Memory);
        assert_eq!(config.gateway.monitor_addr, "http://coord:5000");
        assert_eq!(config.gateway.consistency, ConsistencyPolicy::WeakConsistency);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load_from("/nonexistent/slicemap").unwrap();
        assert_eq!(config.coordinator.group_size, 3);
    }

    #[test]
    fn test_etcd_store_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slicemap.toml");
        std::fs::write(
            &path,
            r#"
[coordinator.store]
backend = "etcd"
endpoints = ["http://etcd-1:2379", "http://etcd-2:2379"]
"#,
        )
        .unwrap();

        let config = Config::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(
            config.coordinator.store,
            StoreConfig::etcd(vec![
                "http://etcd-1:2379".to_string(),
                "http://etcd-2:2379".to_string()
            ])
        );

        let no_endpoints = CoordinatorConfig {
            store: StoreConfig::etcd(Vec::new()),
            ..Default::default()
        };
        assert!(no_endpoints.validate().is_err());
    }

    #[test]
    fn test_invalid_group_size() {
        let config = CoordinatorConfig {
            group_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
