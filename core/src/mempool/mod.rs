use std::cmp::Ordering;

use crate::config::{calculate_fee, MAX_BLOCK_TRANSACTIONS, MEMPOOL_MAX_SIZE};
use crate::error::CoreError;
use crate::transaction::Transaction;

/// Pool of submitted-but-unmined transactions, keyed by hash, bounded by
/// `max_size`. Insertion order is preserved so prioritization ties resolve
/// deterministically.
#[derive(Debug, Clone)]
pub struct Mempool {
    transactions: Vec<Transaction>,
    pub max_size: usize,
}

impl Default for Mempool {
    fn default() -> Self {
        Mempool {
            transactions: Vec::new(),
            max_size: MEMPOOL_MAX_SIZE,
        }
    }
}

impl Mempool {
    pub fn new(max_size: usize) -> Self {
        Mempool {
            transactions: Vec::new(),
            max_size,
        }
    }

    /// Admit a transaction. Rejects invalid transactions, a full pool, and
    /// duplicate hashes.
    pub fn add_transaction(&mut self, transaction: Transaction) -> Result<(), CoreError> {
        if !transaction.is_valid() {
            log::debug!("mempool rejected invalid tx {}", transaction.hash);
            return Err(CoreError::InvalidTransaction {
                hash: transaction.hash,
            });
        }
        if self.is_full() {
            log::warn!("mempool full ({} txs), rejecting {}", self.max_size, transaction.hash);
            return Err(CoreError::MempoolFull {
                capacity: self.max_size,
            });
        }
        if self.contains(&transaction.hash) {
            log::debug!("mempool rejected duplicate tx {}", transaction.hash);
            return Err(CoreError::DuplicateTransaction {
                hash: transaction.hash,
            });
        }

        self.transactions.push(transaction);
        Ok(())
    }

    pub fn remove_transaction(&mut self, transaction_hash: &str) -> bool {
        if let Some(pos) = self.transactions.iter().position(|tx| tx.hash == transaction_hash) {
            self.transactions.remove(pos);
            return true;
        }
        false
    }

    /// Drop every transaction whose hash appears in `hashes` (block inclusion).
    pub fn clear_transactions(&mut self, hashes: &[String]) {
        self.transactions.retain(|tx| !hashes.contains(&tx.hash));
    }

    pub fn get_transaction_by_hash(&self, transaction_hash: &str) -> Option<&Transaction> {
        self.transactions.iter().find(|tx| tx.hash == transaction_hash)
    }

    pub fn contains(&self, transaction_hash: &str) -> bool {
        self.transactions.iter().any(|tx| tx.hash == transaction_hash)
    }

    pub fn pending(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_full(&self) -> bool {
        self.transactions.len() >= self.max_size
    }

    pub fn fee(&self, transaction: &Transaction) -> f64 {
        calculate_fee(transaction.amount)
    }

    /// Pending transactions ordered by (fee desc, timestamp desc). The sort
    /// is stable, so equal keys keep their insertion order.
    pub fn prioritize(&self) -> Vec<Transaction> {
        let mut ordered = self.transactions.clone();
        ordered.sort_by(|a, b| {
            let by_fee = self
                .fee(b)
                .partial_cmp(&self.fee(a))
                .unwrap_or(Ordering::Equal);
            by_fee.then_with(|| b.timestamp.partial_cmp(&a.timestamp).unwrap_or(Ordering::Equal))
        });
        ordered
    }

    /// Highest-priority transactions for block assembly.
    pub fn for_block(&self, limit: usize) -> Vec<Transaction> {
        let mut selected = self.prioritize();
        selected.truncate(limit);
        selected
    }

    pub fn for_block_default(&self) -> Vec<Transaction> {
        self.for_block(MAX_BLOCK_TRANSACTIONS)
    }
}
