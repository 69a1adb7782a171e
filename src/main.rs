use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lnnode::chain::BitcoindClient;
use lnnode::node::{run_chain_monitor, Node, NodeConfig};
use lnnode::payment::{GraphRouter, HrpInvoiceEncoder};
use lnnode::peer::MemoryPeerTransport;
use lnnode::rpc;
use lnnode::store::MemoryStore;
use lnnode::Network;

#[derive(Parser)]
#[command(name = "lnnoded", about = "Lightning channel node daemon")]
struct Args {
    /// Chain network: mainnet, testnet, signet or regtest
    #[arg(long, default_value = "regtest")]
    network: String,

    /// Announced peer-to-peer port
    #[arg(long, default_value_t = 9735)]
    port: u16,

    /// JSON-RPC control port
    #[arg(long, default_value_t = 9736)]
    rpc_port: u16,

    #[arg(long, default_value = "127.0.0.1")]
    bitcoind_host: String,

    #[arg(long, default_value_t = 18443)]
    bitcoind_port: u16,

    #[arg(long, default_value = "bitcoind")]
    bitcoind_user: String,

    #[arg(long, default_value = "bitcoind")]
    bitcoind_pass: String,

    /// Node seed as 64 hex characters; random when omitted
    #[arg(long)]
    seed: Option<String>,

    /// Chain poll interval in seconds
    #[arg(long, default_value_t = 30)]
    poll_secs: u64,
}

fn parse_network(name: &str) -> Network {
    match name {
        "mainnet" | "bitcoin" => Network::Bitcoin,
        "testnet" => Network::Testnet,
        "signet" => Network::Signet,
        _ => Network::Regtest,
    }
}

fn parse_seed(arg: Option<&str>) -> Result<[u8; 32], String> {
    let mut seed = [0u8; 32];
    match arg {
        Some(hex_str) => {
            hex::decode_to_slice(hex_str, &mut seed)
                .map_err(|_| "seed must be 64 hex characters".to_string())?;
        }
        None => {
            use rand::Rng;
            rand::thread_rng().fill_bytes(&mut seed);
        }
    }
    Ok(seed)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let network = parse_network(&args.network);

    let seed = match parse_seed(args.seed.as_deref()) {
        Ok(seed) => seed,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let chain = match BitcoindClient::new(
        &args.bitcoind_host,
        args.bitcoind_port,
        &args.bitcoind_user,
        &args.bitcoind_pass,
    ) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("cannot reach bitcoind: {e}");
            std::process::exit(1);
        }
    };

    let node = Node::new(
        seed,
        NodeConfig {
            network,
            p2p_port: args.port,
            rpc_port: args.rpc_port,
        },
        Arc::new(MemoryStore::new()),
        chain,
        Arc::new(GraphRouter::new()),
        Arc::new(MemoryPeerTransport::new()),
        Arc::new(HrpInvoiceEncoder),
    );

    info!("node id {}", node.node_id);
    info!("network {network}");

    let listener = match TcpListener::bind(("127.0.0.1", args.rpc_port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("cannot bind JSON-RPC port {}: {e}", args.rpc_port);
            std::process::exit(1);
        }
    };

    let monitor = tokio::spawn(run_chain_monitor(
        node.clone(),
        Duration::from_secs(args.poll_secs),
    ));

    tokio::select! {
        _ = rpc::serve(node.clone(), listener) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            node.stop().await;
        }
    }

    // Let the chain monitor quiesce before exit.
    let _ = monitor.await;
    info!("stopped");
}
