use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::transaction::{now_timestamp, Transaction};

/// A block in the chain. The hash covers every other field, so any mutation
/// after mining invalidates the block.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Block {
    pub index: u64,
    pub timestamp: f64,
    pub transactions: Vec<Transaction>,
    pub proof: u64,
    pub previous_hash: String,
    pub hash: String,
}

#[derive(Serialize)]
struct HashFields<'a> {
    index: u64,
    timestamp: f64,
    transactions: &'a [Transaction],
    proof: u64,
    previous_hash: &'a str,
}

impl Block {
    pub fn new(index: u64, transactions: Vec<Transaction>, proof: u64, previous_hash: &str) -> Self {
        let mut block = Block {
            index,
            timestamp: now_timestamp(),
            transactions,
            proof,
            previous_hash: previous_hash.to_string(),
            hash: String::new(),
        };
        block.hash = block.calculate_hash();
        block
    }

    pub fn calculate_hash(&self) -> String {
        let fields = HashFields {
            index: self.index,
            timestamp: self.timestamp,
            transactions: &self.transactions,
            proof: self.proof,
            previous_hash: &self.previous_hash,
        };
        let encoded = serde_json::to_string(&fields).expect("block fields serialize");
        hex::encode(Sha256::digest(encoded.as_bytes()))
    }

    /// PoW search: increment `proof` until the hash has `difficulty` leading
    /// zero hex characters. The cancel flag is polled every nonce, so
    /// stop-mining and shutdown take effect within one iteration. Returns
    /// `None` when cancelled (the block is left with its last tried proof).
    pub fn mine_proof_of_work(&mut self, difficulty: u32, cancel: &AtomicBool) -> Option<u64> {
        let target = "0".repeat(difficulty as usize);

        loop {
            if cancel.load(Ordering::Relaxed) {
                log::debug!("mining cancelled at proof {}", self.proof);
                return None;
            }

            self.proof += 1;
            self.hash = self.calculate_hash();

            if self.hash.starts_with(&target) {
                return Some(self.proof);
            }

            // yield occasionally so OS scheduler can run other threads
            if self.proof % 1_000_000 == 0 {
                std::thread::yield_now();
            }
        }
    }

    /// Structural validity: stored hash matches recomputation, the proof is
    /// positive, and every contained transaction is individually valid.
    pub fn is_valid(&self) -> bool {
        if self.hash != self.calculate_hash() {
            return false;
        }
        if self.proof == 0 {
            return false;
        }
        self.transactions.iter().all(|tx| tx.is_valid())
    }
}
