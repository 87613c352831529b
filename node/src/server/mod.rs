//! Node HTTP API.
//!
//! Every response uses the `Envelope` wire format from `api`. Handlers take
//! ledger locks for the shortest possible scope and never across an await.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;

use serde::Serialize;
use warp::http::StatusCode;
use warp::{Filter, Reply};

use peerchain_core::Transaction;

use crate::api::{
    AddressQuery, BlockchainStatus, ChainPayload, ChainValidation, ConsensusOutcome,
    CreateTransactionRequest, Envelope, HealthPayload, MinedBlock, MiningStatus, NodeList,
    NodeRegistered, RegisterNodeRequest, ServerInfo, TransactionAccepted, TransactionList,
    WalletBalance,
};
use crate::miner;
use crate::p2p::BroadcastKind;
use crate::NodeHandle;

pub async fn run_server(ctx: NodeHandle) {
    let addr: SocketAddr = format!("{}:{}", ctx.config.host, ctx.config.port)
        .parse()
        .expect("invalid bind address");

    log::info!("http api listening on {}", addr);
    warp::serve(routes(ctx)).run(addr).await;
}

fn with_ctx(ctx: NodeHandle) -> impl Filter<Extract = (NodeHandle,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

fn ok_reply<T: Serialize>(data: T) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(warp::reply::json(&Envelope::ok(data)), StatusCode::OK)
}

fn err_reply(error: &str, status: StatusCode) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(
        warp::reply::json(&Envelope::<()>::failure(error)),
        status,
    )
}

pub fn routes(
    ctx: NodeHandle,
) -> impl Filter<Extract = (impl Reply,), Error = warp::Rejection> + Clone {
    let health = warp::path!("api" / "health")
        .and(warp::get())
        .and(with_ctx(ctx.clone()))
        .and_then(get_health);

    let info = warp::path!("api" / "info")
        .and(warp::get())
        .and(with_ctx(ctx.clone()))
        .and_then(get_info);

    let blockchain_status = warp::path!("api" / "blockchain" / "status")
        .and(warp::get())
        .and(with_ctx(ctx.clone()))
        .and_then(get_blockchain_status);

    let chain = warp::path!("api" / "chain")
        .and(warp::get())
        .and(with_ctx(ctx.clone()))
        .and_then(get_chain);

    let chain_validate = warp::path!("api" / "chain" / "validate")
        .and(warp::get())
        .and(with_ctx(ctx.clone()))
        .and_then(get_chain_validate);

    let tx_create = warp::path!("api" / "transactions" / "create")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_ctx(ctx.clone()))
        .and_then(create_transaction);

    let tx_pending = warp::path!("api" / "transactions" / "pending")
        .and(warp::get())
        .and(with_ctx(ctx.clone()))
        .and_then(get_pending);

    let tx_history = warp::path!("api" / "transactions" / "history")
        .and(warp::get())
        .and(warp::query::<AddressQuery>())
        .and(with_ctx(ctx.clone()))
        .and_then(get_history);

    let wallet_balance = warp::path!("api" / "wallet" / "balance")
        .and(warp::get())
        .and(warp::query::<AddressQuery>())
        .and(with_ctx(ctx.clone()))
        .and_then(get_balance);

    let nodes_register = warp::path!("api" / "nodes" / "register")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_ctx(ctx.clone()))
        .and_then(register_node);

    let nodes_list = warp::path!("api" / "nodes" / "list")
        .and(warp::get())
        .and(with_ctx(ctx.clone()))
        .and_then(get_nodes);

    let network_status = warp::path!("api" / "network" / "status")
        .and(warp::get())
        .and(with_ctx(ctx.clone()))
        .and_then(get_network_status);

    let consensus = warp::path!("api" / "consensus")
        .and(warp::get())
        .and(with_ctx(ctx.clone()))
        .and_then(run_consensus);

    let mining_status = warp::path!("api" / "mining" / "status")
        .and(warp::get())
        .and(with_ctx(ctx.clone()))
        .and_then(get_mining_status);

    let mining_start = warp::path!("api" / "mining" / "start")
        .and(warp::post())
        .and(with_ctx(ctx.clone()))
        .and_then(start_mining);

    let mining_stop = warp::path!("api" / "mining" / "stop")
        .and(warp::post())
        .and(with_ctx(ctx.clone()))
        .and_then(stop_mining);

    let mining_mine = warp::path!("api" / "mining" / "mine-block")
        .and(warp::post())
        .and(with_ctx(ctx))
        .and_then(mine_block);

    chain_validate
        .or(chain)
        .or(blockchain_status)
        .or(health)
        .or(info)
        .or(tx_create)
        .or(tx_pending)
        .or(tx_history)
        .or(wallet_balance)
        .or(nodes_register)
        .or(nodes_list)
        .or(network_status)
        .or(consensus)
        .or(mining_status)
        .or(mining_start)
        .or(mining_stop)
        .or(mining_mine)
        .with(warp::log("peerchain::http"))
}

async fn get_health(ctx: NodeHandle) -> Result<impl Reply, warp::Rejection> {
    Ok(ok_reply(HealthPayload {
        status: "healthy".to_string(),
        node_id: ctx.node_id.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: ctx.uptime_secs(),
    }))
}

async fn get_info(ctx: NodeHandle) -> Result<impl Reply, warp::Rejection> {
    let (chain_length, difficulty, block_reward) = {
        let ledger = ctx.ledger.read();
        (ledger.chain_length(), ledger.difficulty, ledger.block_reward)
    };
    Ok(ok_reply(ServerInfo {
        node_id: ctx.node_id.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        host: ctx.config.host.clone(),
        port: ctx.config.port,
        chain_length,
        difficulty,
        block_reward,
        connected_nodes: ctx.p2p.network_status().connected_peers,
        uptime_secs: ctx.uptime_secs(),
    }))
}

async fn get_blockchain_status(ctx: NodeHandle) -> Result<impl Reply, warp::Rejection> {
    let ledger = ctx.ledger.read();
    Ok(ok_reply(BlockchainStatus {
        chain_length: ledger.chain_length(),
        latest_block: ledger.latest_block().clone(),
        difficulty: ledger.difficulty,
        mempool_size: ledger.mempool.transaction_count(),
        is_valid: ledger.validate_chain(),
    }))
}

async fn get_chain(ctx: NodeHandle) -> Result<impl Reply, warp::Rejection> {
    let chain = ctx.ledger.read().get_chain().to_vec();
    let length = chain.len();
    Ok(ok_reply(ChainPayload { chain, length }))
}

async fn get_chain_validate(ctx: NodeHandle) -> Result<impl Reply, warp::Rejection> {
    let ledger = ctx.ledger.read();
    Ok(ok_reply(ChainValidation {
        is_valid: ledger.validate_chain(),
        chain_length: ledger.chain_length(),
    }))
}

/// A signed transaction is accepted as-is. An unsigned one can only spend from
/// the node's own wallet, which signs it here; anything else is rejected.
async fn create_transaction(
    request: CreateTransactionRequest,
    ctx: NodeHandle,
) -> Result<impl Reply, warp::Rejection> {
    let mut tx = match request.timestamp {
        Some(ts) => Transaction::with_timestamp(&request.sender, &request.recipient, request.amount, ts),
        None => Transaction::new(&request.sender, &request.recipient, request.amount),
    };

    match request.signature {
        Some(signature) => tx.signature = signature,
        None => {
            if request.sender != ctx.wallet.address() {
                return Ok(err_reply(
                    "unsigned transaction for a foreign sender",
                    StatusCode::BAD_REQUEST,
                ));
            }
            if tx.sign(&ctx.wallet).is_err() {
                return Ok(err_reply("failed to sign transaction", StatusCode::INTERNAL_SERVER_ERROR));
            }
        }
    }

    if let Err(e) = ctx.ledger.write().submit_transaction(tx.clone()) {
        return Ok(err_reply(&e.to_string(), StatusCode::BAD_REQUEST));
    }

    let p2p = ctx.p2p.clone();
    let gossip = tx.clone();
    tokio::spawn(async move {
        p2p.broadcast(BroadcastKind::NewTransaction(gossip)).await;
    });

    Ok(ok_reply(TransactionAccepted { transaction: tx }))
}

async fn get_pending(ctx: NodeHandle) -> Result<impl Reply, warp::Rejection> {
    let transactions = ctx.ledger.read().mempool.pending().to_vec();
    let count = transactions.len();
    Ok(ok_reply(TransactionList { transactions, count }))
}

async fn get_history(
    query: AddressQuery,
    ctx: NodeHandle,
) -> Result<impl Reply, warp::Rejection> {
    let transactions: Vec<Transaction> = {
        let ledger = ctx.ledger.read();
        ledger
            .get_chain()
            .iter()
            .flat_map(|block| block.transactions.iter())
            .filter(|tx| tx.sender == query.address || tx.recipient == query.address)
            .cloned()
            .collect()
    };
    let count = transactions.len();
    Ok(ok_reply(TransactionList { transactions, count }))
}

async fn get_balance(query: AddressQuery, ctx: NodeHandle) -> Result<impl Reply, warp::Rejection> {
    let balance = ctx.ledger.read().get_balance(&query.address);
    Ok(ok_reply(WalletBalance {
        address: query.address,
        balance,
    }))
}

async fn register_node(
    request: RegisterNodeRequest,
    ctx: NodeHandle,
) -> Result<impl Reply, warp::Rejection> {
    if request.node_url.is_empty() {
        return Ok(err_reply("node_url must not be empty", StatusCode::BAD_REQUEST));
    }
    let total_nodes = ctx.p2p.register_node(&request.node_url);
    Ok(ok_reply(NodeRegistered {
        node_url: request.node_url,
        total_nodes,
    }))
}

async fn get_nodes(ctx: NodeHandle) -> Result<impl Reply, warp::Rejection> {
    let nodes = ctx.p2p.registered_nodes();
    let count = nodes.len();
    Ok(ok_reply(NodeList { nodes, count }))
}

async fn get_network_status(ctx: NodeHandle) -> Result<impl Reply, warp::Rejection> {
    Ok(ok_reply(ctx.p2p.network_status()))
}

async fn run_consensus(ctx: NodeHandle) -> Result<impl Reply, warp::Rejection> {
    let replaced = ctx.consensus.force_sync().await;
    let chain_length = ctx.ledger.read().chain_length();
    Ok(ok_reply(ConsensusOutcome { replaced, chain_length }))
}

fn mining_snapshot(ctx: &NodeHandle) -> MiningStatus {
    let (difficulty, block_reward, pending) = {
        let ledger = ctx.ledger.read();
        (
            ledger.difficulty,
            ledger.block_reward,
            ledger.mempool.transaction_count(),
        )
    };
    MiningStatus {
        is_mining: ctx.mining.active.load(Ordering::Relaxed),
        difficulty,
        block_reward,
        pending_transactions: pending,
        blocks_mined: ctx.mining.blocks_mined.load(Ordering::Relaxed),
    }
}

async fn get_mining_status(ctx: NodeHandle) -> Result<impl Reply, warp::Rejection> {
    Ok(ok_reply(mining_snapshot(&ctx)))
}

async fn start_mining(ctx: NodeHandle) -> Result<impl Reply, warp::Rejection> {
    if ctx.mining.active.swap(true, Ordering::SeqCst) {
        return Ok(err_reply("mining already in progress", StatusCode::BAD_REQUEST));
    }
    ctx.mining.cancel.store(false, Ordering::SeqCst);
    log::info!("continuous mining started");
    Ok(ok_reply(mining_snapshot(&ctx)))
}

async fn stop_mining(ctx: NodeHandle) -> Result<impl Reply, warp::Rejection> {
    if !ctx.mining.active.swap(false, Ordering::SeqCst) {
        return Ok(err_reply("mining is not currently active", StatusCode::BAD_REQUEST));
    }
    // the PoW loop polls this every nonce
    ctx.mining.cancel.store(true, Ordering::SeqCst);
    log::info!("continuous mining stopped");
    Ok(ok_reply(mining_snapshot(&ctx)))
}

async fn mine_block(ctx: NodeHandle) -> Result<impl Reply, warp::Rejection> {
    let pending = ctx.ledger.read().mempool.transaction_count();
    if pending == 0 {
        return Ok(err_reply(
            "no pending transactions to mine",
            StatusCode::BAD_REQUEST,
        ));
    }

    match miner::mine_once(&ctx).await {
        Some(block) => Ok(ok_reply(MinedBlock { block })),
        None => Ok(err_reply("failed to mine block", StatusCode::INTERNAL_SERVER_ERROR)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;
    use peerchain_config::Config;
    use peerchain_core::{Blockchain, Wallet};
    use std::sync::Arc;
    use std::time::Instant;

    use crate::client::PeerClient;
    use crate::consensus::ConsensusEngine;
    use crate::p2p::P2PManager;
    use crate::{generate_node_id, MiningState, NodeContext};

    fn test_context() -> NodeHandle {
        let mut config = Config::default();
        config.difficulty = 1;
        let ledger = Arc::new(RwLock::new(Blockchain::new(
            config.difficulty,
            config.block_reward,
            config.mempool_max_size,
        )));
        let client = Arc::new(PeerClient::new(&config));
        let p2p = Arc::new(P2PManager::new(generate_node_id(), &config, client.clone()));
        let consensus = Arc::new(ConsensusEngine::new(
            ledger.clone(),
            p2p.clone(),
            client,
            &config,
        ));
        Arc::new(NodeContext {
            config,
            node_id: generate_node_id(),
            wallet: Wallet::generate(),
            ledger,
            p2p,
            consensus,
            mining: Arc::new(MiningState::default()),
            start_time: Instant::now(),
        })
    }

    fn body_json(body: &[u8]) -> serde_json::Value {
        serde_json::from_slice(body).unwrap()
    }

    #[tokio::test]
    async fn health_returns_success_envelope() {
        let routes = routes(test_context());
        let resp = warp::test::request()
            .method("GET")
            .path("/api/health")
            .reply(&routes)
            .await;

        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp.body());
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["status"], "healthy");
    }

    #[tokio::test]
    async fn create_transaction_signs_for_own_wallet() {
        let ctx = test_context();
        let sender = ctx.wallet.address();
        let routes = routes(ctx.clone());

        let resp = warp::test::request()
            .method("POST")
            .path("/api/transactions/create")
            .json(&serde_json::json!({
                "sender": sender,
                "recipient": "bob",
                "amount": 2.5
            }))
            .reply(&routes)
            .await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp.body())["success"], true);
        assert_eq!(ctx.ledger.read().mempool.transaction_count(), 1);
    }

    #[tokio::test]
    async fn unsigned_foreign_transaction_is_rejected() {
        let ctx = test_context();
        let routes = routes(ctx.clone());

        let resp = warp::test::request()
            .method("POST")
            .path("/api/transactions/create")
            .json(&serde_json::json!({
                "sender": "someone-else",
                "recipient": "bob",
                "amount": 2.5
            }))
            .reply(&routes)
            .await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp.body())["success"], false);
        assert_eq!(ctx.ledger.read().mempool.transaction_count(), 0);
    }

    #[tokio::test]
    async fn register_and_list_nodes() {
        let routes = routes(test_context());

        let resp = warp::test::request()
            .method("POST")
            .path("/api/nodes/register")
            .json(&serde_json::json!({"node_url": "http://127.0.0.1:5001"}))
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = warp::test::request()
            .method("GET")
            .path("/api/nodes/list")
            .reply(&routes)
            .await;
        let json = body_json(resp.body());
        assert_eq!(json["data"]["count"], 1);
        assert_eq!(json["data"]["nodes"][0], "http://127.0.0.1:5001");
    }

    #[tokio::test]
    async fn mine_block_requires_pending_transactions() {
        let routes = routes(test_context());
        let resp = warp::test::request()
            .method("POST")
            .path("/api/mining/mine-block")
            .reply(&routes)
            .await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn mining_start_stop_toggles_flags() {
        let ctx = test_context();
        let routes = routes(ctx.clone());

        let resp = warp::test::request()
            .method("POST")
            .path("/api/mining/start")
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(ctx.mining.active.load(Ordering::Relaxed));

        // starting twice is an error
        let resp = warp::test::request()
            .method("POST")
            .path("/api/mining/start")
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = warp::test::request()
            .method("POST")
            .path("/api/mining/stop")
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!ctx.mining.active.load(Ordering::Relaxed));
        assert!(ctx.mining.cancel.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn balance_of_unknown_address_is_zero() {
        let routes = routes(test_context());
        let resp = warp::test::request()
            .method("GET")
            .path("/api/wallet/balance?address=nobody")
            .reply(&routes)
            .await;

        let json = body_json(resp.body());
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["balance"], 0.0);
    }
}
