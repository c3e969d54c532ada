//! # slicemap
//!
//! Control plane and routing layer of a sharded, replicated object store:
//! - Node registry fed by storage node heartbeats
//! - Nodemap coordinator: replica groups, keyspace partitioning, versioned
//!   publication under a lease lock
//! - Gateway: cached nodemap, key resolution, replica fallback
//! - Wire client for the storage nodes' slice API
//!
//! ## Architecture
//!
//! ```text
//!  storage nodes ──heartbeat──▶ ┌──────────────────────┐
//!                               │     Coordinator      │
//!                               │ registry + nodemap   │
//!                               └──────────┬───────────┘
//!                                          │ GET /nodemap (polled)
//!                               ┌──────────▼───────────┐
//!        clients ──/id/:id────▶ │       Gateway        │
//!                               └──┬────────┬───────┬──┘
//!                                  │ /slice │       │
//!                            ┌─────▼──┐ ┌───▼────┐ ┌▼───────┐
//!                            │ Group 0│ │ Group 1│ │ Group 2│
//!                            │[0, a]  │ │[a+1, b]│ │[b+1,MAX]│
//!                            └────────┘ └────────┘ └────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a coordinator
//! ```bash
//! slicemap-coord serve --id coord-1 --bind 0.0.0.0:5000 --db ./coord-data
//!
//! # several coordinators sharing one etcd cluster (built with `--features etcd`)
//! slicemap-coord serve --bind 0.0.0.0:5000 --store-endpoint http://etcd-1:2379,http://etcd-2:2379
//! ```
//!
//! ### Start a gateway
//! ```bash
//! slicemap-gateway serve --bind 0.0.0.0:10000 --monitor http://localhost:5000
//! ```
//!
//! ### Use the CLI
//! ```bash
//! slicemap put my-object --file ./data.bin --gateway http://localhost:10000
//! slicemap get my-object --output ./out.bin
//! slicemap locate my-object
//! slicemap nodemap
//! ```

#![allow(clippy::result_large_err)]

pub mod common;
pub mod connector;
pub mod coordinator;
pub mod gateway;

// Re-export commonly used types
pub use common::{Config, Error, Nodemap, Result};
pub use connector::{ConsistencyPolicy, SliceClient, SliceTransport, WireError};
pub use coordinator::Coordinator;
pub use gateway::Gateway;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
