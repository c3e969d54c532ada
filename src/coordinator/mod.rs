//! Nodemap coordinator
//!
//! The coordinator is responsible for:
//! - Node registry (latest heartbeat per storage node)
//! - Replica group formation and keyspace partitioning
//! - Group bootstrap against the storage nodes
//! - Publishing versioned nodemaps under an exclusive lease lock

pub mod bootstrap;
pub mod http;
pub mod lock;
pub mod recompute;
pub mod registry;
pub mod server;

pub use bootstrap::{BootstrapReport, GroupBootstrapper, HttpBootstrapper};
pub use lock::LeaseGuard;
pub use recompute::{plan_groups, CycleOutcome, GroupPlan, NodemapCoordinator};
pub use registry::{NodeHeartbeat, NodeRegistry, NodeRole, NodeStatus};
pub use server::Coordinator;
