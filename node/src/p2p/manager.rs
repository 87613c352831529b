use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use peerchain_config::Config;
use peerchain_core::transaction::now_timestamp;

use crate::api::CreateTransactionRequest;
use crate::client::PeerClient;
use crate::p2p::{BroadcastKind, Peer, PeerStatus};

type Shared<T> = Arc<Mutex<T>>;

#[derive(Debug, Clone, Serialize)]
pub struct NetworkStatsSnapshot {
    pub messages_sent: u64,
    pub connections_made: u64,
    pub connections_lost: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkStatus {
    pub node_id: String,
    pub is_running: bool,
    pub connected_peers: usize,
    pub total_known_peers: usize,
    pub peer_list: Vec<String>,
    pub blacklisted_peers: usize,
    pub stats: NetworkStatsSnapshot,
    pub uptime_secs: f64,
}

/// Peer table and the background loops that maintain it.
///
/// All shared collections sit behind `parking_lot::Mutex`; the discovery,
/// heartbeat, cleanup and broadcast paths run concurrently and never hold a
/// lock across network I/O.
pub struct P2PManager {
    node_id: String,
    public_url: String,
    seed_nodes: Vec<String>,
    max_connections: usize,
    peer_stale_secs: u64,
    discovery_interval: Duration,
    heartbeat_interval: Duration,
    cleanup_interval: Duration,

    client: Arc<PeerClient>,

    peers: Shared<HashMap<String, Peer>>,
    connected: Shared<HashSet<String>>,
    blacklisted: Shared<HashSet<String>>,
    /// Node URLs announced via the register endpoint; discovery seeds.
    registered: Shared<HashSet<String>>,

    running: AtomicBool,
    start_time: Instant,
    messages_sent: AtomicU64,
    connections_made: AtomicU64,
    connections_lost: AtomicU64,
}

impl P2PManager {
    pub fn new(node_id: String, config: &Config, client: Arc<PeerClient>) -> Self {
        P2PManager {
            node_id,
            public_url: config.public_url(),
            seed_nodes: config.seed_nodes.clone(),
            max_connections: config.max_connections,
            peer_stale_secs: config.peer_stale_secs,
            discovery_interval: Duration::from_secs(config.discovery_interval_secs),
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
            cleanup_interval: Duration::from_secs(config.cleanup_interval_secs),
            client,
            peers: Arc::new(Mutex::new(HashMap::new())),
            connected: Arc::new(Mutex::new(HashSet::new())),
            blacklisted: Arc::new(Mutex::new(HashSet::new())),
            registered: Arc::new(Mutex::new(HashSet::new())),
            running: AtomicBool::new(false),
            start_time: Instant::now(),
            messages_sent: AtomicU64::new(0),
            connections_made: AtomicU64::new(0),
            connections_lost: AtomicU64::new(0),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Spawn the discovery, heartbeat and cleanup loops. Each tick is wrapped
    /// so a failure is logged and the loop continues on its next interval.
    pub fn spawn_loops(self: &Arc<Self>) {
        self.running.store(true, Ordering::Relaxed);

        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                manager.discovery_tick().await;
                tokio::time::sleep(manager.discovery_interval).await;
            }
        });

        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                manager.heartbeat_tick().await;
                tokio::time::sleep(manager.heartbeat_interval).await;
            }
        });

        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                let evicted = manager.evict_stale(now_timestamp());
                for node_id in &evicted {
                    log::info!("evicted stale peer {}", node_id);
                }
                tokio::time::sleep(manager.cleanup_interval).await;
            }
        });

        log::info!(
            "p2p manager started for {} ({} seed nodes)",
            self.node_id,
            self.seed_nodes.len()
        );
    }

    /// One discovery pass: crawl from the seeds plus every registered node,
    /// then connect to anything new until the connection cap is reached.
    async fn discovery_tick(&self) {
        let mut seeds: Vec<String> = self.seed_nodes.clone();
        seeds.extend(self.registered_nodes());
        seeds.sort();
        seeds.dedup();

        if seeds.is_empty() {
            return;
        }

        let active = self.client.discover_nodes(&seeds).await;
        for url in active {
            if self.connected.lock().len() >= self.max_connections {
                break;
            }
            if self.is_known_url(&url) {
                continue;
            }
            self.connect_to_peer(&url).await;
        }
    }

    fn is_known_url(&self, url: &str) -> bool {
        self.peers.lock().values().any(|p| p.url == url)
    }

    async fn connect_to_peer(&self, url: &str) -> bool {
        let (reachable, response_time) = self.client.ping(url).await;
        if !reachable {
            return false;
        }

        let info = match self.client.get_server_info(url).await {
            Some(info) => info,
            None => return false,
        };

        if info.node_id == self.node_id {
            return false;
        }
        if self.blacklisted.lock().contains(&info.node_id) {
            log::debug!("skipping blacklisted peer {}", info.node_id);
            return false;
        }

        let now = now_timestamp();
        let peer = Peer {
            node_id: info.node_id.clone(),
            url: url.to_string(),
            host: info.host,
            port: info.port,
            response_time_secs: response_time.as_secs_f64(),
            connected_at: now,
            last_heartbeat: now,
            status: PeerStatus::Connected,
        };

        self.peers.lock().insert(info.node_id.clone(), peer);
        self.connected.lock().insert(info.node_id.clone());
        self.connections_made.fetch_add(1, Ordering::Relaxed);
        log::info!("connected to peer {} at {}", info.node_id, url);

        // announce ourselves so the peer's discovery finds us
        self.client.register_node(url, &self.public_url).await;
        true
    }

    /// One heartbeat pass over the connected set. Failures mark the peer
    /// unresponsive; eviction is the cleanup loop's job.
    async fn heartbeat_tick(&self) {
        let targets: Vec<(String, String)> = {
            let peers = self.peers.lock();
            self.connected
                .lock()
                .iter()
                .filter_map(|id| peers.get(id).map(|p| (id.clone(), p.url.clone())))
                .collect()
        };

        for (node_id, url) in targets {
            let healthy = self.client.health_check(&url).await.is_some();
            let mut peers = self.peers.lock();
            if let Some(peer) = peers.get_mut(&node_id) {
                if healthy {
                    peer.last_heartbeat = now_timestamp();
                    peer.status = PeerStatus::Connected;
                } else {
                    peer.status = PeerStatus::Unresponsive;
                    log::warn!("peer {} missed heartbeat", node_id);
                }
            }
        }
    }

    /// Remove every peer silent longer than `peer_stale_secs`. Returns the
    /// evicted ids.
    pub fn evict_stale(&self, now: f64) -> Vec<String> {
        let stale: Vec<String> = {
            let peers = self.peers.lock();
            peers
                .values()
                .filter(|p| now - p.last_heartbeat > self.peer_stale_secs as f64)
                .map(|p| p.node_id.clone())
                .collect()
        };

        for node_id in &stale {
            self.peers.lock().remove(node_id);
            if self.connected.lock().remove(node_id) {
                self.connections_lost.fetch_add(1, Ordering::Relaxed);
            }
        }
        stale
    }

    /// Best-effort fan-out to every connected peer; one failing peer does not
    /// abort the rest. Returns the number of successful deliveries.
    pub async fn broadcast(&self, kind: BroadcastKind) -> usize {
        let targets: Vec<String> = {
            let peers = self.peers.lock();
            self.connected
                .lock()
                .iter()
                .filter_map(|id| peers.get(id))
                .filter(|p| p.status == PeerStatus::Connected)
                .map(|p| p.url.clone())
                .collect()
        };

        let mut delivered = 0;
        for url in targets {
            let ok = match &kind {
                BroadcastKind::NewTransaction(tx) => {
                    let request = CreateTransactionRequest::from_transaction(tx);
                    self.client.create_transaction(&url, &request).await
                }
                BroadcastKind::NewBlock | BroadcastKind::ChainUpdate => {
                    self.client.consensus_resolve(&url).await
                }
            };
            if ok {
                delivered += 1;
            }
        }

        self.messages_sent.fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    // Registration endpoint backing.

    pub fn register_node(&self, node_url: &str) -> usize {
        if node_url != self.public_url {
            self.registered.lock().insert(node_url.to_string());
        }
        self.registered.lock().len()
    }

    pub fn registered_nodes(&self) -> Vec<String> {
        let mut nodes: Vec<String> = self.registered.lock().iter().cloned().collect();
        nodes.sort();
        nodes
    }

    /// URLs of peers currently marked connected, for the consensus round.
    pub fn connected_peer_urls(&self) -> Vec<String> {
        let peers = self.peers.lock();
        self.connected
            .lock()
            .iter()
            .filter_map(|id| peers.get(id))
            .map(|p| p.url.clone())
            .collect()
    }

    pub fn blacklist(&self, node_id: &str) {
        self.blacklisted.lock().insert(node_id.to_string());
        if self.connected.lock().remove(node_id) {
            self.connections_lost.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(peer) = self.peers.lock().get_mut(node_id) {
            peer.status = PeerStatus::Disconnected;
        }
        log::info!("blacklisted peer {}", node_id);
    }

    pub fn unblacklist(&self, node_id: &str) {
        self.blacklisted.lock().remove(node_id);
    }

    pub fn is_blacklisted(&self, node_id: &str) -> bool {
        self.blacklisted.lock().contains(node_id)
    }

    pub fn get_peer(&self, node_id: &str) -> Option<Peer> {
        self.peers.lock().get(node_id).cloned()
    }

    pub fn network_status(&self) -> NetworkStatus {
        let peer_list: Vec<String> = self.connected.lock().iter().cloned().collect();
        NetworkStatus {
            node_id: self.node_id.clone(),
            is_running: self.running.load(Ordering::Relaxed),
            connected_peers: peer_list.len(),
            total_known_peers: self.peers.lock().len(),
            peer_list,
            blacklisted_peers: self.blacklisted.lock().len(),
            stats: NetworkStatsSnapshot {
                messages_sent: self.messages_sent.load(Ordering::Relaxed),
                connections_made: self.connections_made.load(Ordering::Relaxed),
                connections_lost: self.connections_lost.load(Ordering::Relaxed),
            },
            uptime_secs: self.start_time.elapsed().as_secs_f64(),
        }
    }
}
