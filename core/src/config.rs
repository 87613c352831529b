// Chain parameters and protocol constants

/// Fixed previous_hash of the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Default PoW difficulty: required leading zero hex characters.
pub const DEFAULT_DIFFICULTY: u32 = 4;

/// Default coinbase reward paid to the miner of each block.
pub const DEFAULT_BLOCK_REWARD: f64 = 10.0;

/// Sender address of system transactions (reward and genesis).
pub const SYSTEM_SENDER: &str = "0";

/// Maximum number of pending transactions held in the mempool.
pub const MEMPOOL_MAX_SIZE: usize = 1000;

/// Maximum non-reward transactions included in a mined block.
pub const MAX_BLOCK_TRANSACTIONS: usize = 100;

/// Difficulty is re-evaluated every this many blocks.
pub const DIFFICULTY_ADJUSTMENT_INTERVAL: usize = 10;

/// Target average block interval in seconds.
pub const TARGET_BLOCK_TIME_SECS: f64 = 60.0;

/// Minimum fee charged on any transaction.
pub const MIN_TRANSACTION_FEE: f64 = 0.001;

/// Fee rate applied to the transaction amount.
pub const FEE_RATE: f64 = 0.001;

/// Fee for a transaction: max(MIN_TRANSACTION_FEE, amount * FEE_RATE).
pub fn calculate_fee(amount: f64) -> f64 {
    (amount * FEE_RATE).max(MIN_TRANSACTION_FEE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_floor() {
        // Tiny amounts still pay the minimum fee
        assert_eq!(calculate_fee(0.5), MIN_TRANSACTION_FEE);
        assert_eq!(calculate_fee(1.0), MIN_TRANSACTION_FEE);
    }

    #[test]
    fn test_fee_proportional() {
        assert_eq!(calculate_fee(100.0), 0.1);
        assert_eq!(calculate_fee(5000.0), 5.0);
    }

    #[test]
    fn test_genesis_sentinel_length() {
        assert_eq!(GENESIS_PREVIOUS_HASH.len(), 64);
        assert!(GENESIS_PREVIOUS_HASH.chars().all(|c| c == '0'));
    }
}
