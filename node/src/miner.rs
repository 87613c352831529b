//! Continuous mining service.
//!
//! The PoW search is CPU-bound and runs in `spawn_blocking` on a snapshot of
//! the ledger, never under the write lock. The commit path re-checks that the
//! mined candidate still links to the head, so a consensus replacement racing
//! the search just makes the stale block fall on the floor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use peerchain_core::Block;

use crate::p2p::BroadcastKind;
use crate::NodeHandle;

const IDLE_WAIT: Duration = Duration::from_secs(1);

pub async fn run_mining_loop(ctx: NodeHandle) {
    log::info!("mining service ready, rewards go to {}", ctx.wallet.address());

    loop {
        if !ctx.mining.active.load(Ordering::Relaxed) {
            tokio::time::sleep(IDLE_WAIT).await;
            continue;
        }

        match mine_with_flag(&ctx, ctx.mining.cancel.clone()).await {
            Some(block) => {
                log::info!(
                    "mined block index={} txs={} hash={}",
                    block.index,
                    block.transactions.len(),
                    &block.hash[..16]
                );
                ctx.p2p.broadcast(BroadcastKind::NewBlock).await;
            }
            // empty mempool or cancelled search
            None => tokio::time::sleep(IDLE_WAIT).await,
        }
    }
}

/// Mine exactly one block, ignoring the continuous-mining activity flag.
/// Backs the one-shot mining endpoint. The search still runs under the
/// shared cancel flag so stop-mining and shutdown abort it within one
/// nonce.
pub async fn mine_once(ctx: &NodeHandle) -> Option<Block> {
    ctx.mining.cancel.store(false, Ordering::SeqCst);
    let block = mine_with_flag(ctx, ctx.mining.cancel.clone()).await?;
    ctx.p2p.broadcast(BroadcastKind::NewBlock).await;
    Some(block)
}

pub(crate) async fn mine_with_flag(ctx: &NodeHandle, cancel: Arc<AtomicBool>) -> Option<Block> {
    // snapshot under the read lock, search outside any lock
    let (mut candidate, difficulty) = {
        let ledger = ctx.ledger.read();
        (ledger.next_candidate()?, ledger.difficulty)
    };

    let mined = tokio::task::spawn_blocking(move || {
        candidate
            .mine_proof_of_work(difficulty, &cancel)
            .map(|_| candidate)
    })
    .await
    .ok()??;

    let miner_address = ctx.wallet.address();
    let committed = ctx.ledger.write().commit_mined_block(mined, &miner_address)?;
    ctx.mining.blocks_mined.fetch_add(1, Ordering::Relaxed);
    Some(committed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;
    use peerchain_config::Config;
    use peerchain_core::{Blockchain, Transaction, Wallet};
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

    fn submit_signed(ctx: &NodeHandle, recipient: &str, amount: f64) {
        let wallet = Wallet::generate();
        let mut tx = Transaction::new(&wallet.address(), recipient, amount);
        tx.sign(&wallet).unwrap();
        ctx.ledger.write().submit_transaction(tx).unwrap();
    }

    #[tokio::test]
    async fn mine_once_commits_and_rewards_node_wallet() {
        let ctx = test_context();
        submit_signed(&ctx, "bob", 2.0);

        let block = mine_once(&ctx).await.unwrap();

        assert_eq!(block.index, 1);
        assert_eq!(ctx.ledger.read().chain_length(), 2);
        assert_eq!(
            ctx.ledger.read().get_balance(&ctx.wallet.address()),
            ctx.config.block_reward
        );
        assert_eq!(ctx.mining.blocks_mined.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn mine_once_on_empty_mempool_is_none() {
        let ctx = test_context();
        assert!(mine_once(&ctx).await.is_none());
        assert_eq!(ctx.ledger.read().chain_length(), 1);
    }

    #[tokio::test]
    async fn shutdown_aborts_one_shot_search() {
        let ctx = test_context();
        // a target this deep is unreachable within the test
        ctx.ledger.write().difficulty = 12;
        submit_signed(&ctx, "bob", 2.0);

        let mining_ctx = ctx.clone();
        let search = tokio::spawn(async move { mine_once(&mining_ctx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        ctx.mining.cancel.store(true, Ordering::SeqCst);

        assert!(search.await.unwrap().is_none());
        assert_eq!(ctx.ledger.read().chain_length(), 1);
    }

    #[tokio::test]
    async fn cancelled_search_yields_no_block() {
        let ctx = test_context();
        submit_signed(&ctx, "bob", 2.0);

        let cancelled = Arc::new(AtomicBool::new(true));
        assert!(mine_with_flag(&ctx, cancelled).await.is_none());
        assert_eq!(ctx.ledger.read().chain_length(), 1);
        // the transaction stays pending for the next attempt
        assert_eq!(ctx.ledger.read().mempool.transaction_count(), 1);
    }
}
