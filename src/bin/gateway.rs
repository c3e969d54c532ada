//! Gateway binary

use clap::{Parser, Subcommand};
use slicemap::{common::Config, ConsistencyPolicy, Gateway};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "slicemap-gateway")]
#[command(about = "slicemap object gateway")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start gateway server
    Serve {
        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Coordinator URL serving /nodemap
        #[arg(long)]
        monitor: Option<String>,

        /// Consistency policy: none, weak or strong
        #[arg(long)]
        consistency: Option<ConsistencyPolicy>,

        /// Nodemap refresh period, e.g. "10s"
        #[arg(long)]
        refresh: Option<String>,

        /// Replica request timeout, e.g. "5s"
        #[arg(long)]
        timeout: Option<String>,
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
            bind,
            monitor,
            consistency,
            refresh,
            timeout,
        } => {
            let gw = &mut config.gateway;
            if let Some(bind) = bind {
                gw.bind_addr = bind;
            }
            if let Some(monitor) = monitor {
                gw.monitor_addr = monitor;
            }
            if let Some(policy) = consistency {
                gw.consistency = policy;
            }
            if let Some(refresh) = refresh {
                gw.refresh_interval_ms =
                    slicemap::common::parse_duration(&refresh)?.as_millis() as u64;
            }
            if let Some(timeout) = timeout {
                gw.request_timeout_ms =
                    slicemap::common::parse_duration(&timeout)?.as_millis() as u64;
            }
            gw.validate()?;

            Gateway::new(config.gateway).serve().await?;
        }
    }

    Ok(())
}
