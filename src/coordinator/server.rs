//! Coordinator server

use crate::common::{CoordinatorConfig, Result, StoreHandles};
use crate::coordinator::bootstrap::HttpBootstrapper;
use crate::coordinator::http::{create_router, CoordState};
use crate::coordinator::recompute::NodemapCoordinator;
use crate::coordinator::registry::NodeRegistry;
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct Coordinator {
    config: CoordinatorConfig,
    node_id: String,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, node_id: String) -> Self {
        Self { config, node_id }
    }

    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve_with_listener(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve_with_listener(self, listener: TcpListener) -> Result<()> {
        tracing::info!("Starting coordinator: {}", self.node_id);
        tracing::info!("  HTTP API: {}", listener.local_addr()?);
        tracing::info!("  Store: {:?}", self.config.store);
        tracing::info!("  Group size: {}", self.config.group_size);
        tracing::info!("  Cycle interval: {:?}", self.config.cycle_interval());

        let stores = StoreHandles::open(&self.config.store).await?;

        let bootstrapper = Arc::new(HttpBootstrapper::new(
            self.config.bootstrap_timeout(),
            self.config.bootstrap_settle(),
        ));
        let coordinator = Arc::new(NodemapCoordinator::new(
            self.node_id.clone(),
            self.config.clone(),
            stores.clone(),
            bootstrapper,
        ));

        let http_state = CoordState {
            node_id: self.node_id.clone(),
            registry: NodeRegistry::new(stores.kv.clone()),
            store: stores.kv.clone(),
        };
        let http_server = axum::serve(listener, create_router(http_state));

        tracing::info!("✓ Coordinator ready");

        tokio::select! {
            res = http_server => {
                if let Err(e) = res {
                    tracing::error!("HTTP server error: {}", e);
                }
            }
            _ = coordinator.run() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down coordinator");
            }
        }

        Ok(())
    }
}
