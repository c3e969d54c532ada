//! Gateway router
//!
//! Stateless front door: caches the published nodemap, resolves object
//! identifiers to replica groups and dispatches reads and writes with
//! replica fallback.

pub mod cache;
pub mod http;
pub mod router;
pub mod server;

pub use cache::{NodemapCache, NodemapFetcher};
pub use router::{GatewayRouter, Placement};
pub use server::Gateway;
