//! Longest-valid-chain consensus.
//!
//! Each round snapshots the local chain, gathers every connected peer's
//! self-reported chain, and runs the decision procedure below. The decision is
//! a pure function so the whole table is unit-testable without a network. A
//! peer's `is_valid` flag is only a first filter; any adopted chain is fully
//! re-validated by `replace_chain` before it lands.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use peerchain_config::Config;
use peerchain_core::transaction::now_timestamp;
use peerchain_core::{Block, Blockchain};

use crate::client::PeerClient;
use crate::p2p::P2PManager;

/// What one peer claims about its chain, plus the chain itself.
#[derive(Debug, Clone)]
pub struct PeerChainReport {
    pub node_url: String,
    pub chain_length: usize,
    pub latest_block_hash: String,
    pub is_valid: bool,
    pub chain: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConsensusDecision {
    NoAction { reason: &'static str },
    Adopt { report_index: usize, support: usize, fork: bool },
}

/// The decision table over `(local_len, local_hash)` and the peer reports.
///
/// Peers reporting an invalid chain are discarded, the rest are bucketed by
/// `(chain_length, latest_block_hash)`. A strictly longer bucket wins; tied
/// longer buckets resolve by peer support, then by lexicographically smallest
/// head hash. At equal length the local chain survives only while its own
/// bucket holds at least `threshold` of all responding peers.
pub fn decide(
    local_len: usize,
    local_hash: &str,
    reports: &[PeerChainReport],
    threshold: f64,
) -> ConsensusDecision {
    let mut buckets: Vec<((usize, &str), Vec<usize>)> = Vec::new();
    for (i, report) in reports.iter().enumerate() {
        if !report.is_valid {
            continue;
        }
        let key = (report.chain_length, report.latest_block_hash.as_str());
        match buckets.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(i),
            None => buckets.push((key, vec![i])),
        }
    }

    if buckets.is_empty() {
        return ConsensusDecision::NoAction { reason: "no valid peers" };
    }

    let max_len = buckets.iter().map(|((len, _), _)| *len).max().unwrap_or(0);
    let mut leaders: Vec<&((usize, &str), Vec<usize>)> =
        buckets.iter().filter(|((len, _), _)| *len == max_len).collect();
    // most support first; equal support resolves to the smallest head hash
    leaders.sort_by(|a, b| {
        b.1.len().cmp(&a.1.len()).then_with(|| a.0 .1.cmp(b.0 .1))
    });
    let ((_, best_hash), best_members) = leaders[0];
    let fork = leaders.len() > 1;

    if max_len > local_len {
        return ConsensusDecision::Adopt {
            report_index: best_members[0],
            support: best_members.len(),
            fork,
        };
    }

    if max_len == local_len {
        let local_support = buckets
            .iter()
            .find(|((len, hash), _)| *len == local_len && *hash == local_hash)
            .map(|(_, members)| members.len())
            .unwrap_or(0);
        let ratio = local_support as f64 / reports.len() as f64;

        if ratio >= threshold {
            return ConsensusDecision::NoAction { reason: "local chain has majority support" };
        }
        if *best_hash == local_hash {
            return ConsensusDecision::NoAction { reason: "local chain is best supported" };
        }
        return ConsensusDecision::Adopt {
            report_index: best_members[0],
            support: best_members.len(),
            fork,
        };
    }

    ConsensusDecision::NoAction { reason: "local chain is ahead" }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsensusStatsSnapshot {
    pub sync_attempts: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    pub forks_detected: u64,
    pub forks_resolved: u64,
    pub chain_replacements: u64,
    pub last_sync_time: Option<f64>,
    pub round_in_progress: bool,
    pub sync_interval_secs: u64,
    pub consensus_threshold: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncDetails {
    pub local_length: usize,
    pub local_hash: String,
    pub matching_peers: usize,
    pub total_peers: usize,
    pub consensus_ratio: f64,
    pub threshold: f64,
}

pub struct ConsensusEngine {
    ledger: Arc<RwLock<Blockchain>>,
    p2p: Arc<P2PManager>,
    client: Arc<PeerClient>,

    round_in_progress: AtomicBool,
    sync_interval_secs: AtomicU64,
    consensus_threshold: Mutex<f64>,

    sync_attempts: AtomicU64,
    successful_syncs: AtomicU64,
    failed_syncs: AtomicU64,
    forks_detected: AtomicU64,
    forks_resolved: AtomicU64,
    chain_replacements: AtomicU64,
    last_sync_time: Mutex<Option<f64>>,
}

/// Floor for the sync interval, matching `set_sync_interval`.
const MIN_SYNC_INTERVAL_SECS: u64 = 10;

impl ConsensusEngine {
    pub fn new(
        ledger: Arc<RwLock<Blockchain>>,
        p2p: Arc<P2PManager>,
        client: Arc<PeerClient>,
        config: &Config,
    ) -> Self {
        ConsensusEngine {
            ledger,
            p2p,
            client,
            round_in_progress: AtomicBool::new(false),
            sync_interval_secs: AtomicU64::new(config.sync_interval_secs.max(MIN_SYNC_INTERVAL_SECS)),
            consensus_threshold: Mutex::new(config.consensus_threshold.clamp(0.1, 1.0)),
            sync_attempts: AtomicU64::new(0),
            successful_syncs: AtomicU64::new(0),
            failed_syncs: AtomicU64::new(0),
            forks_detected: AtomicU64::new(0),
            forks_resolved: AtomicU64::new(0),
            chain_replacements: AtomicU64::new(0),
            last_sync_time: Mutex::new(None),
        }
    }

    /// The periodic consensus loop; runs until the process exits.
    pub async fn run_loop(self: Arc<Self>) {
        loop {
            self.run_round().await;
            let interval = self.sync_interval_secs.load(Ordering::Relaxed);
            tokio::time::sleep(Duration::from_secs(interval)).await;
        }
    }

    /// Run one round. Returns whether the local chain was replaced. Overlapping
    /// rounds are collapsed: a round that finds one already running is a no-op.
    pub async fn run_round(&self) -> bool {
        if self.round_in_progress.swap(true, Ordering::SeqCst) {
            return false;
        }
        let replaced = self.round_inner().await;
        self.round_in_progress.store(false, Ordering::SeqCst);
        replaced
    }

    async fn round_inner(&self) -> bool {
        self.sync_attempts.fetch_add(1, Ordering::Relaxed);

        let peer_urls = self.p2p.connected_peer_urls();
        if peer_urls.is_empty() {
            log::debug!("no connected peers for consensus round");
            return false;
        }

        // Snapshot local state before any network I/O; the ledger lock is
        // never held across a peer round-trip.
        let (local_len, local_hash) = {
            let ledger = self.ledger.read();
            (ledger.chain_length(), ledger.latest_block().hash.clone())
        };

        let reports = self.collect_reports(&peer_urls).await;
        if reports.is_empty() {
            self.failed_syncs.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let threshold = *self.consensus_threshold.lock();
        let decision = decide(local_len, &local_hash, &reports, threshold);

        let mut replaced = false;
        match decision {
            ConsensusDecision::NoAction { reason } => {
                log::debug!("consensus round: no action ({})", reason);
            }
            ConsensusDecision::Adopt { report_index, support, fork } => {
                if fork {
                    self.forks_detected.fetch_add(1, Ordering::Relaxed);
                    log::info!("fork detected, adopting chain with {} peer support", support);
                }
                let candidate = reports[report_index].chain.clone();
                // adopt_chain re-validates every block and the linkage; the
                // peer's self-reported validity is never trusted on its own.
                // The length policy was already settled by the decision, so
                // equal-length majority adoptions go through here too.
                replaced = self.ledger.write().adopt_chain(candidate);
                if replaced {
                    self.chain_replacements.fetch_add(1, Ordering::Relaxed);
                    if fork {
                        self.forks_resolved.fetch_add(1, Ordering::Relaxed);
                    }
                } else {
                    log::warn!(
                        "candidate chain from {} failed local validation",
                        reports[report_index].node_url
                    );
                }
            }
        }

        self.successful_syncs.fetch_add(1, Ordering::Relaxed);
        *self.last_sync_time.lock() = Some(now_timestamp());
        replaced
    }

    async fn collect_reports(&self, peer_urls: &[String]) -> Vec<PeerChainReport> {
        let mut reports = Vec::new();
        for url in peer_urls {
            let status = match self.client.get_blockchain_status(url).await {
                Some(status) => status,
                None => continue,
            };
            let chain = match self.client.get_full_chain(url).await {
                Some(payload) => payload.chain,
                None => continue,
            };
            reports.push(PeerChainReport {
                node_url: url.clone(),
                chain_length: status.chain_length,
                latest_block_hash: status.latest_block.hash,
                is_valid: status.is_valid,
                chain,
            });
        }
        reports
    }

    pub async fn force_sync(&self) -> bool {
        self.run_round().await
    }

    /// Read-only majority check: does the local `(length, hash)` match at
    /// least `threshold` of the reporting peers? Never mutates the chain.
    pub async fn is_synced_with_network(
        &self,
        peer_urls: Option<Vec<String>>,
    ) -> (bool, SyncDetails) {
        let urls = peer_urls.unwrap_or_else(|| self.p2p.connected_peer_urls());
        let (local_length, local_hash) = {
            let ledger = self.ledger.read();
            (ledger.chain_length(), ledger.latest_block().hash.clone())
        };
        let threshold = *self.consensus_threshold.lock();

        if urls.is_empty() {
            return (
                true,
                SyncDetails {
                    local_length,
                    local_hash,
                    matching_peers: 0,
                    total_peers: 0,
                    consensus_ratio: 0.0,
                    threshold,
                },
            );
        }

        let reports = self.collect_reports(&urls).await;
        let matching = reports
            .iter()
            .filter(|r| r.chain_length == local_length && r.latest_block_hash == local_hash)
            .count();
        let total = reports.len();
        let ratio = if total > 0 { matching as f64 / total as f64 } else { 0.0 };

        (
            total == 0 || ratio >= threshold,
            SyncDetails {
                local_length,
                local_hash,
                matching_peers: matching,
                total_peers: total,
                consensus_ratio: ratio,
                threshold,
            },
        )
    }

    pub fn get_stats(&self) -> ConsensusStatsSnapshot {
        ConsensusStatsSnapshot {
            sync_attempts: self.sync_attempts.load(Ordering::Relaxed),
            successful_syncs: self.successful_syncs.load(Ordering::Relaxed),
            failed_syncs: self.failed_syncs.load(Ordering::Relaxed),
            forks_detected: self.forks_detected.load(Ordering::Relaxed),
            forks_resolved: self.forks_resolved.load(Ordering::Relaxed),
            chain_replacements: self.chain_replacements.load(Ordering::Relaxed),
            last_sync_time: *self.last_sync_time.lock(),
            round_in_progress: self.round_in_progress.load(Ordering::Relaxed),
            sync_interval_secs: self.sync_interval_secs.load(Ordering::Relaxed),
            consensus_threshold: *self.consensus_threshold.lock(),
        }
    }

    pub fn set_sync_interval(&self, secs: u64) {
        let clamped = secs.max(MIN_SYNC_INTERVAL_SECS);
        self.sync_interval_secs.store(clamped, Ordering::Relaxed);
        log::info!("sync interval set to {}s", clamped);
    }

    pub fn set_consensus_threshold(&self, threshold: f64) {
        let clamped = threshold.clamp(0.1, 1.0);
        *self.consensus_threshold.lock() = clamped;
        log::info!("consensus threshold set to {}", clamped);
    }
}
