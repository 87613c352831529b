use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use peerchain_config::Config;
use peerchain_core::{Blockchain, Wallet};
use peerchain_node::{
    generate_node_id, miner, server, ConsensusEngine, MiningState, NodeContext, P2PManager,
    PeerClient,
};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let config = Config::load();
    let node_id = generate_node_id();
    let wallet = Wallet::generate();

    log::info!("starting node {} on {}", node_id, config.public_url());
    log::info!("wallet address {}", wallet.address());

    let ledger = Arc::new(RwLock::new(Blockchain::new(
        config.difficulty,
        config.block_reward,
        config.mempool_max_size,
    )));

    let client = Arc::new(PeerClient::new(&config));
    let p2p = Arc::new(P2PManager::new(node_id.clone(), &config, client.clone()));
    let consensus = Arc::new(ConsensusEngine::new(
        ledger.clone(),
        p2p.clone(),
        client,
        &config,
    ));

    let ctx = Arc::new(NodeContext {
        config,
        node_id,
        wallet,
        ledger,
        p2p,
        consensus,
        mining: Arc::new(MiningState::default()),
        start_time: Instant::now(),
    });

    ctx.p2p.spawn_loops();

    let sync = ctx.consensus.clone();
    tokio::spawn(async move {
        sync.run_loop().await;
    });

    let mining_ctx = ctx.clone();
    tokio::spawn(async move {
        miner::run_mining_loop(mining_ctx).await;
    });

    let server_ctx = ctx.clone();
    tokio::spawn(async move {
        server::run_server(server_ctx).await;
    });

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for shutdown signal");

    // abort any in-flight PoW search before the runtime tears down
    ctx.mining.active.store(false, Ordering::SeqCst);
    ctx.mining.cancel.store(true, Ordering::SeqCst);
    log::info!("shutting down");
}
