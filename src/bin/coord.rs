//! Coordinator binary

use clap::{Parser, Subcommand};
use slicemap::{
    common::{Config, StoreConfig},
    Coordinator,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "slicemap-coord")]
#[command(about = "slicemap nodemap coordinator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start coordinator server
    Serve {
        /// Node ID (lock holder identity)
        #[arg(long)]
        id: Option<String>,

        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// RocksDB directory for the shared store
        #[arg(long, conflicts_with = "memory")]
        db: Option<PathBuf>,

        /// Keep all state in memory
        #[arg(long, conflicts_with = "store_endpoint")]
        memory: bool,

        /// etcd endpoint shared by all coordinators (repeatable or comma separated)
        #[arg(long, value_delimiter = ',', conflicts_with = "db")]
        store_endpoint: Vec<String>,

        /// Replicas per group
        #[arg(long)]
        group_size: Option<usize>,

        /// Recomputation period, e.g. "10s"
        #[arg(long)]
        interval: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = Config::load()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            id,
            bind,
            db,
            memory,
            store_endpoint,
            group_size,
            interval,
        } => {
            // CLI flags take priority over file and environment values
            let coord = &mut config.coordinator;
            if let Some(bind) = bind {
                coord.bind_addr = bind;
            }
            if memory {
                coord.store = StoreConfig::Memory;
            } else if let Some(path) = db {
                coord.store = StoreConfig::Rocksdb { path };
            } else if !store_endpoint.is_empty() {
                coord.store = match std::mem::replace(&mut coord.store, StoreConfig::Memory) {
                    StoreConfig::Etcd { prefix, .. } => StoreConfig::Etcd {
                        endpoints: store_endpoint,
                        prefix,
                    },
                    _ => StoreConfig::etcd(store_endpoint),
                };
            }
            if let Some(size) = group_size {
                coord.group_size = size;
            }
            if let Some(interval) = interval {
                let period = slicemap::common::parse_duration(&interval)?;
                coord.cycle_interval_ms = period.as_millis() as u64;
                coord.lock_ttl_ms = coord.cycle_interval_ms;
            }
            coord.validate()?;

            let node_id = id
                .or_else(|| config.node_id.clone())
                .unwrap_or_else(|| format!("coord-{}", uuid::Uuid::new_v4()));

            Coordinator::new(config.coordinator, node_id).serve().await?;
        }
    }

    Ok(())
}
