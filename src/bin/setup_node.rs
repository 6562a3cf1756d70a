use clap::Parser;
use setup_node::config::Config;
use setup_node::messaging::TcpMessagingClient;
use setup_node::metrics::NullMetricsSink;
use setup_node::model::PublicKey;
use setup_node::{Error, Result, SetupNode};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Route Setup Node.
#[derive(Parser, Debug)]
#[command(name = "setup-node")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Address to listen for inbound messaging channels on.
    #[arg(long, default_value = "0.0.0.0:7890")]
    bind: SocketAddr,

    /// Path to a JSON file mapping peer pubkey (hex) to its socket address.
    /// Stands in for the discovery service, which is out of this crate's
    /// scope.
    #[arg(long)]
    peers: Option<PathBuf>,
}

fn load_peer_directory(path: &PathBuf) -> Result<HashMap<PublicKey, SocketAddr>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::transport(format!("reading peer directory {}: {e}", path.display())))?;
    let entries: HashMap<String, String> = serde_json::from_str(&raw)?;
    let mut directory = HashMap::with_capacity(entries.len());
    for (pk_hex, addr) in entries {
        let pk = PublicKey::from_hex(&pk_hex).map_err(|e| Error::protocol(format!("bad peer pubkey: {e}")))?;
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| Error::protocol(format!("bad peer address: {e}")))?;
        directory.insert(pk, addr);
    }
    Ok(directory)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_file(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.env_filter_directive()))
        .init();

    let directory = match &cli.peers {
        Some(path) => load_peer_directory(path)?,
        None => HashMap::new(),
    };

    let messaging = Arc::new(TcpMessagingClient::new(config.pubkey, cli.bind, directory));
    let metrics = Arc::new(NullMetricsSink);
    let node = SetupNode::new(&config, messaging, metrics);

    let cancel = CancellationToken::new();
    let serve_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        serve_cancel.cancel();
    });

    node.serve(cancel).await?;
    Ok(())
}
