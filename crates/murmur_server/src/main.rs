use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use murmur_cluster::{Membership, Peer, PeerTransport, Router};
use murmur_common::config::MurmurConfig;
use murmur_server::json_transport::JsonTransport;
use murmur_server::{client, peer_server};
use murmur_storage::Store;

/// Distributed key-value node.
#[derive(Parser, Debug)]
#[command(name = "murmurd", version)]
struct Args {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Unique node name; overrides the config file.
    #[arg(long)]
    node_name: Option<String>,

    /// Client listen address; overrides the config file.
    #[arg(long)]
    client_listen_addr: Option<String>,

    /// Peer listen address; overrides the config file.
    #[arg(long)]
    peer_listen_addr: Option<String>,

    /// Seed peer to join, as `name=host:port`.
    #[arg(long)]
    join: Option<String>,
}

fn load_config(args: &Args) -> anyhow::Result<MurmurConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => MurmurConfig::default(),
    };
    if let Some(name) = &args.node_name {
        config.server.node_name = name.clone();
    }
    if let Some(addr) = &args.client_listen_addr {
        config.server.client_listen_addr = addr.clone();
    }
    if let Some(addr) = &args.peer_listen_addr {
        config.server.peer_listen_addr = addr.clone();
    }
    if let Some(join) = &args.join {
        config.server.join = join.clone();
    }
    config.validate().map_err(anyhow::Error::msg)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    let store = Arc::new(Store::new(&config.storage));
    let transport: Arc<dyn PeerTransport> = Arc::new(JsonTransport);
    let local = Peer::new(
        config.server.node_name.clone(),
        config.server.peer_listen_addr.clone(),
    );
    let membership = Membership::new(local, config.membership.clone(), Arc::clone(&transport));
    let router = Arc::new(Router::new(
        Arc::clone(&store),
        Arc::clone(&membership),
        Arc::clone(&transport),
    ));

    let client_listener = TcpListener::bind(&config.server.client_listen_addr)
        .await
        .with_context(|| format!("binding {}", config.server.client_listen_addr))?;
    let peer_listener = TcpListener::bind(&config.server.peer_listen_addr)
        .await
        .with_context(|| format!("binding {}", config.server.peer_listen_addr))?;

    info!(
        node = %config.server.node_name,
        client = %config.server.client_listen_addr,
        peer = %config.server.peer_listen_addr,
        "starting"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = vec![
        tokio::spawn(peer_server::run(
            peer_listener,
            Arc::clone(&membership),
            Arc::clone(&router),
            shutdown_rx.clone(),
        )),
        tokio::spawn(client::run(
            client_listener,
            Arc::clone(&router),
            config.server.max_connections,
            shutdown_rx,
        )),
    ];
    tasks.extend(membership.start());

    if !config.server.join.is_empty() {
        let seed = Peer::from_element(config.server.join.as_bytes())?;
        let membership = Arc::clone(&membership);
        tasks.push(tokio::spawn(async move {
            membership.bootstrap(&seed).await;
        }));
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    membership.stop();
    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}
