pub mod api;
pub mod client;
pub mod consensus;
pub mod miner;
pub mod p2p;
pub mod server;

pub use crate::client::PeerClient;
pub use crate::consensus::ConsensusEngine;
pub use crate::p2p::P2PManager;

use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use peerchain_config::Config;
use peerchain_core::{Blockchain, Wallet};

/// Everything a request handler or background loop needs, passed explicitly.
/// There are no process-wide globals; the context is built once in `main` and
/// shared via `Arc`.
pub struct NodeContext {
    pub config: Config,
    pub node_id: String,
    pub wallet: Wallet,
    pub ledger: Arc<RwLock<Blockchain>>,
    pub p2p: Arc<P2PManager>,
    pub consensus: Arc<ConsensusEngine>,
    pub mining: Arc<MiningState>,
    pub start_time: Instant,
}

pub type NodeHandle = Arc<NodeContext>;

impl NodeContext {
    pub fn uptime_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }
}

/// Shared mining flags. `cancel` is polled every nonce inside the PoW search,
/// so stop requests and shutdown take effect within one iteration.
pub struct MiningState {
    pub cancel: Arc<AtomicBool>,
    pub active: Arc<AtomicBool>,
    pub blocks_mined: Arc<AtomicU64>,
}

impl Default for MiningState {
    fn default() -> Self {
        Self {
            cancel: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicBool::new(false)),
            blocks_mined: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// Random short node identifier, stable for the process lifetime.
pub fn generate_node_id() -> String {
    format!("node_{:08x}", rand::random::<u32>())
}
