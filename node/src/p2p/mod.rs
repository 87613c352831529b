pub mod manager;

pub use manager::P2PManager;

use serde::{Deserialize, Serialize};

use peerchain_core::Transaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    Connected,
    Unresponsive,
    Disconnected,
}

/// One entry in the peer table. Timestamps are fractional Unix seconds.
#[derive(Debug, Clone, Serialize)]
pub struct Peer {
    pub node_id: String,
    pub url: String,
    pub host: String,
    pub port: u16,
    pub response_time_secs: f64,
    pub connected_at: f64,
    pub last_heartbeat: f64,
    pub status: PeerStatus,
}

/// Messages fanned out to connected peers. Transactions carry their payload;
/// block and chain notifications are pull-based gossip, the peer re-syncs via
/// its own consensus endpoint.
#[derive(Debug, Clone)]
pub enum BroadcastKind {
    NewTransaction(Transaction),
    NewBlock,
    ChainUpdate,
}
