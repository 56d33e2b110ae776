//! aegix-gateway — the privacy-payment gateway binary.
//!
//! Startup sequence:
//!   1. Open (or initialise) the durable store
//!   2. Wire the sealed map, chain RPC, compression RPC and facilitator
//!   3. Build the Core (registries, session keys, recovery pools, engine)
//!   4. Probe the compression capability
//!   5. Start the JSON-RPC 2.0 server; run until ctrl-c, then shut the
//!      Core down so background recovery tasks drain deterministically.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use aegix_chain::HttpChainRpc;
use aegix_compression::HttpCompressionRpc;
use aegix_core::types::Address;
use aegix_engine::{Core, CoreConfig, HttpFacilitator};
use aegix_rpc::RpcServer;
use aegix_sealed::SledSealed;
use aegix_store::GatewayStore;

#[derive(Parser, Debug)]
#[command(
    name = "aegix-gateway",
    version,
    about = "Aegix gateway — private stablecoin payments through ephemeral burners"
)]
struct Args {
    /// Directory for the persistent gateway store.
    #[arg(long, default_value = "~/.aegix/data")]
    data_dir: PathBuf,

    /// JSON-RPC listen address.
    #[arg(long, default_value = "127.0.0.1:8787")]
    rpc_addr: SocketAddr,

    /// Chain RPC endpoint.
    #[arg(long, default_value = "https://api.devnet.solana.com")]
    chain_rpc: String,

    /// ZK-compression RPC endpoint (may equal --chain-rpc on compression
    /// capable endpoints).
    #[arg(long, default_value = "https://devnet.helius-rpc.com")]
    compression_rpc: String,

    /// Gasless facilitator base URL.
    #[arg(long, default_value = "https://facilitator.payai.network")]
    facilitator: String,

    /// Stablecoin mint address (base58).
    #[arg(long, default_value = "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU")]
    mint: String,

    /// Network name advertised to the facilitator.
    #[arg(long, default_value = "solana-devnet")]
    network: String,

    /// Deadline for facilitator settle calls, in seconds.
    #[arg(long, default_value_t = 60)]
    settle_deadline_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,aegix=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("Aegix gateway starting");

    // ── Durable store ─────────────────────────────────────────────────────────
    let data_dir = expand_tilde(&args.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let store = Arc::new(GatewayStore::open(&data_dir).context("opening gateway store")?);

    // ── Capabilities ──────────────────────────────────────────────────────────
    let sealed = Arc::new(SledSealed::open(
        Arc::clone(&store),
        load_or_create_master(&data_dir)?,
    ));
    let chain = Arc::new(HttpChainRpc::new(&args.chain_rpc));
    let compression = Arc::new(HttpCompressionRpc::new(&args.compression_rpc));
    let facilitator = Arc::new(HttpFacilitator::new(
        &args.facilitator,
        Duration::from_secs(args.settle_deadline_secs),
    ));
    let mint = Address::from_b58(&args.mint).context("parsing mint address")?;

    // ── Core ──────────────────────────────────────────────────────────────────
    let core = Arc::new(
        Core::init(
            store,
            sealed,
            chain,
            compression,
            facilitator,
            CoreConfig {
                network: args.network.clone(),
                mint,
            },
        )
        .context("building core")?,
    );

    let capability = core.compression.probe().await;
    info!(?capability, "compression capability");

    // ── RPC server ────────────────────────────────────────────────────────────
    let handle = RpcServer::new(Arc::clone(&core))
        .start(args.rpc_addr)
        .await
        .context("starting RPC server")?;

    tokio::signal::ctrl_c().await.context("awaiting ctrl-c")?;
    info!("shutdown signal received");

    handle.stop().ok();
    core.shutdown().await;
    info!("gateway stopped");
    Ok(())
}

/// The sealed map's master key persists beside the store so owner-scoped
/// bindings survive restarts.
fn load_or_create_master(data_dir: &Path) -> anyhow::Result<[u8; 32]> {
    use rand::RngCore;

    let path = data_dir.join("sealed_master.key");
    if path.exists() {
        let bytes = hex::decode(std::fs::read_to_string(&path)?.trim())
            .context("decoding sealed master key")?;
        anyhow::ensure!(bytes.len() == 32, "sealed master key must be 32 bytes");
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        return Ok(arr);
    }
    let mut arr = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut arr);
    std::fs::write(&path, hex::encode(arr)).context("writing sealed master key")?;
    Ok(arr)
}

fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
