use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

/// Node configuration, persisted as JSON under the user's home directory.
/// Missing file means defaults are written back on first load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Bind address for the HTTP API server.
    pub host: String,
    pub port: u16,
    /// Peers contacted at startup to bootstrap discovery.
    pub seed_nodes: Vec<String>,

    pub difficulty: u32,
    pub block_reward: f64,
    pub mempool_max_size: usize,

    /// Upper bound on simultaneously connected peers.
    pub max_connections: usize,
    pub connection_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,

    pub sync_interval_secs: u64,
    /// Fraction of reporting peers that must agree before a foreign chain is
    /// adopted at equal length.
    pub consensus_threshold: f64,

    pub heartbeat_interval_secs: u64,
    pub discovery_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    /// Peers silent longer than this are evicted by the cleanup loop.
    pub peer_stale_secs: u64,
}

impl Config {
    fn expand_path(path: &str) -> PathBuf {
        let expanded = shellexpand::tilde(path);
        PathBuf::from(expanded.into_owned())
    }

    /// Compute the default configuration path depending on the target OS.
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().expect("Cannot find home directory");

        // Use a Windows-friendly folder when building on Windows to avoid tilde expansion issues.
        if cfg!(target_os = "windows") {
            let base = dirs::data_dir().unwrap_or(home).join("peerchain");
            return base.join("config.json");
        }

        home.join(".peerchain").join("config.json")
    }

    /// `http://host:port` as advertised to peers.
    pub fn public_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn load() -> Self {
        Self::load_from(&Self::default_path())
    }

    pub fn load_from(path: &PathBuf) -> Self {
        if !path.exists() {
            log::info!("configuration file not found, writing defaults: {:?}", path);
            let cfg = Self::default();
            cfg.save_to(path);
            return cfg;
        }
        let data = fs::read_to_string(path).expect("Failed to read configuration file");
        serde_json::from_str(&data).expect("Configuration file format error")
    }

    pub fn save(&self) {
        self.save_to(&Self::default_path());
    }

    pub fn save_to(&self, path: &PathBuf) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let json = serde_json::to_string_pretty(self).unwrap();
        fs::write(path, json).unwrap();
    }

    /// Resolve a user-supplied path with tilde expansion applied.
    pub fn resolve_path(path: &str) -> PathBuf {
        Self::expand_path(path)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            seed_nodes: Vec::new(),

            difficulty: 4,
            block_reward: 10.0,
            mempool_max_size: 1000,

            max_connections: 10,
            connection_timeout_ms: 5000,
            max_retries: 3,
            retry_base_delay_ms: 1000,

            sync_interval_secs: 30,
            consensus_threshold: 0.51,

            heartbeat_interval_secs: 30,
            discovery_interval_secs: 30,
            cleanup_interval_secs: 10,
            peer_stale_secs: 120,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.max_connections, 10);
        assert_eq!(cfg.connection_timeout_ms, 5000);
        assert_eq!(cfg.consensus_threshold, 0.51);
        assert_eq!(cfg.public_url(), "http://127.0.0.1:5000");
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = Config::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.port, cfg.port);
        assert_eq!(back.peer_stale_secs, cfg.peer_stale_secs);
    }
}
