use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::SYSTEM_SENDER;
use crate::wallet::{verify_signature, Wallet};

/// A value transfer between two addresses.
///
/// `sender` is the hex of the signer's compressed public key; system
/// transactions (coinbase reward, genesis) use the sender `"0"` and carry no
/// signature. The hash covers everything except the signature, so a
/// transaction is immutable once hashed apart from signature attachment.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Transaction {
    pub sender: String,
    pub recipient: String,
    pub amount: f64,
    pub timestamp: f64,
    pub signature: String,
    pub hash: String,
}

/// Hash input: field order is fixed and the signature is excluded.
#[derive(Serialize)]
struct HashFields<'a> {
    sender: &'a str,
    recipient: &'a str,
    amount: f64,
    timestamp: f64,
}

pub fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

impl Transaction {
    pub fn new(sender: &str, recipient: &str, amount: f64) -> Self {
        Self::with_timestamp(sender, recipient, amount, now_timestamp())
    }

    /// Rebuild a transaction from known fields (wire deserialization path);
    /// the hash is always recomputed, never trusted.
    pub fn with_timestamp(sender: &str, recipient: &str, amount: f64, timestamp: f64) -> Self {
        let mut tx = Transaction {
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            amount,
            timestamp,
            signature: String::new(),
            hash: String::new(),
        };
        tx.hash = tx.calculate_hash();
        tx
    }

    /// Coinbase reward paid to a miner.
    pub fn reward(recipient: &str, amount: f64) -> Self {
        Self::new(SYSTEM_SENDER, recipient, amount)
    }

    /// The zero-amount transaction carried by the genesis block.
    pub fn genesis() -> Self {
        Self::new(SYSTEM_SENDER, "genesis", 0.0)
    }

    pub fn calculate_hash(&self) -> String {
        let fields = HashFields {
            sender: &self.sender,
            recipient: &self.recipient,
            amount: self.amount,
            timestamp: self.timestamp,
        };
        // serde_json emits struct fields in declaration order, which keeps
        // the hash input canonical across nodes.
        let encoded = serde_json::to_string(&fields).expect("transaction fields serialize");
        hex::encode(Sha256::digest(encoded.as_bytes()))
    }

    pub fn is_system(&self) -> bool {
        self.sender == SYSTEM_SENDER
    }

    /// Attach the sender's signature over the transaction hash.
    pub fn sign(&mut self, wallet: &Wallet) -> Result<()> {
        self.signature = wallet.sign_hash(&self.hash)?;
        Ok(())
    }

    /// Full transaction invariant. System transactions are exempt from the
    /// positive-amount, distinct-party and signature rules.
    pub fn is_valid(&self) -> bool {
        if self.hash != self.calculate_hash() {
            return false;
        }

        if self.is_system() {
            return self.amount >= 0.0 && !self.recipient.is_empty();
        }

        if self.amount <= 0.0 {
            return false;
        }
        if self.sender == self.recipient {
            return false;
        }

        verify_signature(&self.hash, &self.sender, &self.signature)
    }
}
