//! CLI for cluster operations

use anyhow::Context;
use clap::{Parser, Subcommand};
use slicemap::common::{base_url, digest_hex, digest_id, keyspace};
use slicemap::coordinator::{NodeHeartbeat, NodeRole, NodeStatus};
use slicemap::Nodemap;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "slicemap")]
#[command(about = "slicemap object store CLI")]
#[command(version)]
struct Cli {
    /// Coordinator URL
    #[arg(long, default_value = "http://localhost:5000")]
    coordinator: String,

    /// Gateway URL
    #[arg(long, default_value = "http://localhost:10000")]
    gateway: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the published nodemap
    Nodemap,

    /// Send a heartbeat on behalf of a storage node
    Heartbeat {
        /// Node ID
        #[arg(long)]
        id: String,

        /// Node address (host:port)
        #[arg(long)]
        addr: String,

        /// Reported status: ready, pending or failed
        #[arg(long, default_value = "ready")]
        status: String,
    },

    /// Upload an object through the gateway
    Put {
        /// Object identifier
        id: String,

        /// File path
        #[arg(long)]
        file: PathBuf,
    },

    /// Download an object through the gateway
    Get {
        /// Object identifier
        id: String,

        /// Output file (stdout if omitted)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show which replica group owns an identifier
    Locate {
        /// Object identifier
        id: String,
    },
}

async fn fetch_nodemap(client: &reqwest::Client, coordinator: &str) -> anyhow::Result<Nodemap> {
    let url = format!("{}/nodemap", base_url(coordinator));
    let response = client.get(&url).send().await?.error_for_status()?;
    let nodemap: Nodemap = response.json().await?;
    nodemap.validate()?;
    Ok(nodemap)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Nodemap => {
            let nodemap = fetch_nodemap(&client, &cli.coordinator).await?;
            println!("Nodemap version {}", nodemap.version);
            for (i, shard) in nodemap.shards.iter().enumerate() {
                println!("  Shard {}:", i);
                println!("    Start: {}", keyspace::to_hex(&shard.range_start));
                println!("    End:   {}", keyspace::to_hex(&shard.range_end));
                println!("    Replicas: {}", shard.replica_addrs.join(", "));
            }
        }

        Commands::Heartbeat { id, addr, status } => {
            let status: NodeStatus = serde_json::from_value(serde_json::Value::String(status))
                .context("status must be ready, pending or failed")?;
            let heartbeat = NodeHeartbeat {
                status,
                node_id: id,
                role: NodeRole::Follower,
                addr,
                group: None,
                nodemap_version: 0,
            };
            client
                .post(format!("{}/heartbeat", base_url(&cli.coordinator)))
                .json(&heartbeat)
                .send()
                .await?
                .error_for_status()?;
            println!("Heartbeat sent for {}", heartbeat.node_id);
        }

        Commands::Put { id, file } => {
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let size = data.len();
            let body = client
                .put(format!("{}/id/{}", base_url(&cli.gateway), id))
                .body(data)
                .send()
                .await?
                .error_for_status()?
                .text()
                .await?;
            println!("{} ({} bytes): {}", id, size, body);
        }

        Commands::Get { id, output } => {
            let data = client
                .get(format!("{}/id/{}", base_url(&cli.gateway), id))
                .send()
                .await?
                .error_for_status()?
                .bytes()
                .await?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, &data).await?;
                    println!("Wrote {} bytes to {}", data.len(), path.display());
                }
                None => {
                    use std::io::Write;
                    std::io::stdout().write_all(&data)?;
                }
            }
        }

        Commands::Locate { id } => {
            let nodemap = fetch_nodemap(&client, &cli.coordinator).await?;
            let digest = digest_id(&id);
            println!("Digest: {}", digest_hex(&id));
            match nodemap.locate_digest(&digest) {
                Some(shard) => {
                    println!(
                        "Range: {} - {}",
                        keyspace::to_hex(&shard.range_start),
                        keyspace::to_hex(&shard.range_end)
                    );
                    println!("Replicas: {}", shard.replica_addrs.join(", "));
                }
                None => println!(
                    "No shard owns this key (nodemap version {})",
                    nodemap.version
                ),
            }
        }
    }

    Ok(())
}
