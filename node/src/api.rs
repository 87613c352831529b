//! Wire types for the node HTTP API.
//!
//! Every endpoint answers with the same envelope: `{success: true, data,
//! timestamp}` or `{success: false, error, timestamp}`. Handlers build typed
//! payloads and the envelope is the only place the success flag lives, so a
//! payload can never disagree with its status.

use serde::{Deserialize, Serialize};

use peerchain_core::{Block, Transaction};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Envelope {
            success: true,
            data: Some(data),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Envelope {
            success: false,
            data: None,
            error: Some(error.into()),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Payload of a successful envelope, `None` for failures.
    pub fn into_data(self) -> Option<T> {
        if self.success {
            self.data
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthPayload {
    pub status: String,
    pub node_id: String,
    pub version: String,
    pub uptime_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub node_id: String,
    pub version: String,
    pub host: String,
    pub port: u16,
    pub chain_length: usize,
    pub difficulty: u32,
    pub block_reward: f64,
    pub connected_nodes: usize,
    pub uptime_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockchainStatus {
    pub chain_length: usize,
    pub latest_block: Block,
    pub difficulty: u32,
    pub mempool_size: usize,
    pub is_valid: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainPayload {
    pub chain: Vec<Block>,
    pub length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainValidation {
    pub is_valid: bool,
    pub chain_length: usize,
}

/// Body of `POST /api/transactions/create`. `timestamp` and `signature` are
/// optional: peers forwarding a signed transaction supply both, a local caller
/// spending from the node wallet supplies neither.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransactionRequest {
    pub sender: String,
    pub recipient: String,
    pub amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl CreateTransactionRequest {
    pub fn from_transaction(tx: &Transaction) -> Self {
        CreateTransactionRequest {
            sender: tx.sender.clone(),
            recipient: tx.recipient.clone(),
            amount: tx.amount,
            timestamp: Some(tx.timestamp),
            signature: Some(tx.signature.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionAccepted {
    pub transaction: Transaction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionList {
    pub transactions: Vec<Transaction>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletBalance {
    pub address: String,
    pub balance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterNodeRequest {
    pub node_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRegistered {
    pub node_url: String,
    pub total_nodes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeList {
    pub nodes: Vec<String>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningStatus {
    pub is_mining: bool,
    pub difficulty: u32,
    pub block_reward: f64,
    pub pending_transactions: usize,
    pub blocks_mined: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinedBlock {
    pub block: Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusOutcome {
    pub replaced: bool,
    pub chain_length: usize,
}

#[derive(Debug, Deserialize)]
pub struct AddressQuery {
    pub address: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_serializes_without_error_field() {
        let env = Envelope::ok(WalletBalance {
            address: "alice".into(),
            balance: 12.5,
        });
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains("\"success\":true"));
        assert!(json.contains("\"balance\":12.5"));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn failure_envelope_serializes_without_data_field() {
        let env: Envelope<WalletBalance> = Envelope::failure("nope");
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains("\"success\":false"));
        assert!(json.contains("\"error\":\"nope\""));
        assert!(!json.contains("\"data\""));
    }

    #[test]
    fn into_data_ignores_failure_payloads() {
        let ok = Envelope::ok(7u32);
        assert_eq!(ok.into_data(), Some(7));

        let failed: Envelope<u32> = Envelope::failure("boom");
        assert_eq!(failed.into_data(), None);
    }

    #[test]
    fn create_request_round_trips_signed_transaction() {
        let tx = Transaction::with_timestamp("alice", "bob", 2.0, 1_700_000_000.5);
        let req = CreateTransactionRequest::from_transaction(&tx);
        let back: CreateTransactionRequest =
            serde_json::from_str(&serde_json::to_string(&req).unwrap()).unwrap();
        assert_eq!(back.timestamp, Some(1_700_000_000.5));
        assert_eq!(back.amount, 2.0);
    }
}
