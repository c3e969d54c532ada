//! Gateway server

use crate::common::{GatewayConfig, Result};
use crate::connector::SliceClient;
use crate::gateway::cache::{NodemapCache, NodemapFetcher};
use crate::gateway::http::{create_router, GatewayState};
use crate::gateway::router::GatewayRouter;
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct Gateway {
    config: GatewayConfig,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }

    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve_with_listener(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve_with_listener(self, listener: TcpListener) -> Result<()> {
        tracing::info!("Starting gateway");
        tracing::info!("  HTTP API: {}", listener.local_addr()?);
        tracing::info!("  Monitor: {}", self.config.monitor_addr);
        tracing::info!("  Consistency: {}", self.config.consistency);
        tracing::info!("  Refresh interval: {:?}", self.config.refresh_interval());

        let cache = Arc::new(NodemapCache::default());
        let fetcher = NodemapFetcher::new(&self.config.monitor_addr, self.config.request_timeout());

        // A coordinator that is not up yet only delays routing until the next refresh.
        if let Err(e) = fetcher.refresh(&cache).await {
            tracing::warn!("Initial nodemap fetch failed: {}", e);
        }

        let transport = Arc::new(
            SliceClient::new(self.config.consistency).with_timeout(self.config.request_timeout()),
        );
        let state = GatewayState {
            router: Arc::new(GatewayRouter::new(cache.clone(), transport)),
            max_body_bytes: self.config.max_body_bytes,
        };
        let http_server = axum::serve(listener, create_router(state));

        tracing::info!("✓ Gateway ready (nodemap version {})", cache.version());

        tokio::select! {
            res = http_server => {
                if let Err(e) = res {
                    tracing::error!("HTTP server error: {}", e);
                }
            }
            _ = fetcher.run(cache, self.config.refresh_interval()) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down gateway");
            }
        }

        Ok(())
    }
}
