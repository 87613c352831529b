//! Retrying HTTP client for talking to remote nodes.
//!
//! Every call is bounded by the configured per-request timeout and retried up
//! to `max_retries` times with linear backoff. A peer that stays unreachable
//! is simply absent from that round; nothing here is fatal for the node.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;

use peerchain_config::Config;

use crate::api::{
    BlockchainStatus, ChainPayload, ChainValidation, CreateTransactionRequest, Envelope,
    HealthPayload, MinedBlock, MiningStatus, NodeList, RegisterNodeRequest, ServerInfo,
    TransactionList, WalletBalance,
};

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub is_connected: bool,
    pub node_url: Option<String>,
    pub connection_errors: u32,
    pub last_response_time_secs: Option<f64>,
}

pub struct PeerClient {
    http: reqwest::Client,
    max_retries: u32,
    retry_base_delay: Duration,

    current_url: Mutex<Option<String>>,
    is_connected: AtomicBool,
    connection_errors: AtomicU32,
    last_response_time: Mutex<Option<Duration>>,
}

impl PeerClient {
    pub fn new(config: &Config) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.connection_timeout_ms))
            .build()
            .expect("failed to build http client");

        PeerClient {
            http,
            max_retries: config.max_retries,
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
            current_url: Mutex::new(None),
            is_connected: AtomicBool::new(false),
            connection_errors: AtomicU32::new(0),
            last_response_time: Mutex::new(None),
        }
    }

    /// Probe a node's health endpoint; on success the node becomes the
    /// client's current peer.
    pub async fn connect(&self, url: &str) -> bool {
        match self.health_check(url).await {
            Some(_) => {
                *self.current_url.lock() = Some(url.to_string());
                self.is_connected.store(true, Ordering::Relaxed);
                self.connection_errors.store(0, Ordering::Relaxed);
                log::info!("connected to node {}", url);
                true
            }
            None => {
                self.is_connected.store(false, Ordering::Relaxed);
                log::warn!("failed to connect to node {}", url);
                false
            }
        }
    }

    pub fn disconnect(&self) {
        *self.current_url.lock() = None;
        self.is_connected.store(false, Ordering::Relaxed);
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        ConnectionStatus {
            is_connected: self.is_connected.load(Ordering::Relaxed),
            node_url: self.current_url.lock().clone(),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            last_response_time_secs: self.last_response_time.lock().map(|d| d.as_secs_f64()),
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        // linear backoff: 1x, 2x, 3x the base delay
        self.retry_base_delay * (attempt + 1)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        url: String,
        body: Option<serde_json::Value>,
    ) -> Option<Envelope<T>> {
        for attempt in 0..=self.max_retries {
            let started = Instant::now();
            let mut builder = self.http.request(method.clone(), &url);
            if let Some(ref json) = body {
                builder = builder.json(json);
            }

            match builder.send().await {
                Ok(response) => {
                    *self.last_response_time.lock() = Some(started.elapsed());
                    if response.status().is_success() {
                        match response.json::<Envelope<T>>().await {
                            Ok(envelope) => {
                                self.connection_errors.store(0, Ordering::Relaxed);
                                return Some(envelope);
                            }
                            // a garbled body is a failed attempt like any
                            // other and consumes a retry
                            Err(e) => {
                                self.connection_errors.fetch_add(1, Ordering::Relaxed);
                                log::warn!(
                                    "invalid JSON from {} (attempt {}): {}",
                                    url,
                                    attempt + 1,
                                    e
                                );
                            }
                        }
                    } else {
                        log::warn!(
                            "HTTP {} from {} (attempt {})",
                            response.status(),
                            url,
                            attempt + 1
                        );
                    }
                }
                Err(e) => {
                    self.connection_errors.fetch_add(1, Ordering::Relaxed);
                    log::warn!("request to {} failed (attempt {}): {}", url, attempt + 1, e);
                }
            }

            if attempt < self.max_retries {
                tokio::time::sleep(self.backoff_delay(attempt)).await;
            }
        }

        self.is_connected.store(false, Ordering::Relaxed);
        None
    }

    async fn get<T: DeserializeOwned>(&self, base: &str, path: &str) -> Option<Envelope<T>> {
        self.request(Method::GET, join(base, path), None).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        base: &str,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Option<Envelope<T>> {
        self.request(Method::POST, join(base, path), body).await
    }

    // Node API surface.

    pub async fn health_check(&self, url: &str) -> Option<HealthPayload> {
        self.get::<HealthPayload>(url, "/api/health").await?.into_data()
    }

    pub async fn get_server_info(&self, url: &str) -> Option<ServerInfo> {
        self.get::<ServerInfo>(url, "/api/info").await?.into_data()
    }

    pub async fn get_blockchain_status(&self, url: &str) -> Option<BlockchainStatus> {
        self.get::<BlockchainStatus>(url, "/api/blockchain/status")
            .await?
            .into_data()
    }

    pub async fn get_full_chain(&self, url: &str) -> Option<ChainPayload> {
        self.get::<ChainPayload>(url, "/api/chain").await?.into_data()
    }

    pub async fn validate_chain(&self, url: &str) -> Option<ChainValidation> {
        self.get::<ChainValidation>(url, "/api/chain/validate")
            .await?
            .into_data()
    }

    /// Forward a transaction to a peer. Returns the peer's accept decision.
    pub async fn create_transaction(&self, url: &str, request: &CreateTransactionRequest) -> bool {
        let body = serde_json::to_value(request).ok();
        self.post::<serde_json::Value>(url, "/api/transactions/create", body)
            .await
            .map(|env| env.success)
            .unwrap_or(false)
    }

    pub async fn get_pending_transactions(&self, url: &str) -> Option<TransactionList> {
        self.get::<TransactionList>(url, "/api/transactions/pending")
            .await?
            .into_data()
    }

    pub async fn get_wallet_balance(&self, url: &str, address: &str) -> Option<WalletBalance> {
        let path = format!("/api/wallet/balance?address={}", address);
        self.get::<WalletBalance>(url, &path).await?.into_data()
    }

    pub async fn register_node(&self, url: &str, node_url: &str) -> bool {
        let body = serde_json::to_value(RegisterNodeRequest {
            node_url: node_url.to_string(),
        })
        .ok();
        self.post::<serde_json::Value>(url, "/api/nodes/register", body)
            .await
            .map(|env| env.success)
            .unwrap_or(false)
    }

    pub async fn get_nodes(&self, url: &str) -> Option<Vec<String>> {
        self.get::<NodeList>(url, "/api/nodes/list")
            .await?
            .into_data()
            .map(|list| list.nodes)
    }

    /// Ask a peer to run a consensus round (pull-based gossip: "something
    /// changed, go look").
    pub async fn consensus_resolve(&self, url: &str) -> bool {
        self.get::<serde_json::Value>(url, "/api/consensus")
            .await
            .map(|env| env.success)
            .unwrap_or(false)
    }

    pub async fn get_mining_status(&self, url: &str) -> Option<MiningStatus> {
        self.get::<MiningStatus>(url, "/api/mining/status")
            .await?
            .into_data()
    }

    pub async fn start_mining(&self, url: &str) -> bool {
        self.post::<serde_json::Value>(url, "/api/mining/start", None)
            .await
            .map(|env| env.success)
            .unwrap_or(false)
    }

    pub async fn stop_mining(&self, url: &str) -> bool {
        self.post::<serde_json::Value>(url, "/api/mining/stop", None)
            .await
            .map(|env| env.success)
            .unwrap_or(false)
    }

    pub async fn mine_block(&self, url: &str) -> Option<MinedBlock> {
        self.post::<MinedBlock>(url, "/api/mining/mine-block", None)
            .await?
            .into_data()
    }

    // Discovery.

    /// Breadth-first crawl from the seed URLs. The `checked` set guarantees
    /// termination even when peer lists reference each other cyclically.
    pub async fn discover_nodes(&self, seeds: &[String]) -> Vec<String> {
        let mut discovered = Vec::new();
        let mut checked: HashSet<String> = HashSet::new();
        let mut frontier: VecDeque<String> = seeds.iter().cloned().collect();

        while let Some(url) = frontier.pop_front() {
            if !checked.insert(url.clone()) {
                continue;
            }
            if self.connect(&url).await {
                discovered.push(url.clone());
                if let Some(nodes) = self.get_nodes(&url).await {
                    for node in nodes {
                        if !checked.contains(&node) {
                            frontier.push_back(node);
                        }
                    }
                }
            }
        }

        log::debug!("discovery crawl found {} reachable nodes", discovered.len());
        discovered
    }

    pub async fn ping(&self, url: &str) -> (bool, Duration) {
        let started = Instant::now();
        match self.health_check(url).await {
            Some(_) => (true, started.elapsed()),
            None => (false, Duration::ZERO),
        }
    }

    pub async fn find_fastest(&self, urls: &[String]) -> Option<String> {
        let mut fastest: Option<(String, Duration)> = None;
        for url in urls {
            let (reachable, latency) = self.ping(url).await;
            if reachable && fastest.as_ref().map_or(true, |(_, best)| latency < *best) {
                fastest = Some((url.clone(), latency));
            }
        }
        fastest.map(|(url, _)| url)
    }
}

fn join(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}
