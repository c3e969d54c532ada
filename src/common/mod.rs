//! Common utilities and types shared across slicemap

pub mod config;
#[cfg(feature = "etcd")]
pub mod etcd_store;
pub mod error;
pub mod hash;
pub mod keyspace;
pub mod metrics;
pub mod nodemap;
pub mod storage;
pub mod tracing_middleware;
pub mod utils;

pub use self::config::{Config, CoordinatorConfig, GatewayConfig, StoreConfig};
#[cfg(feature = "etcd")]
pub use etcd_store::EtcdStore;
pub use error::{Error, Result};
pub use hash::{digest_hex, digest_id, Digest, DIGEST_LEN};
pub use metrics::METRICS;
pub use nodemap::{Nodemap, ShardRange};
pub use storage::{ClusterStore, Lease, LockService, MemStore, RocksStore, StoreHandles};
pub use utils::{base_url, parse_duration, timestamp_now_millis};
