use std::sync::atomic::AtomicBool;

use crate::block::Block;
use crate::config::{
    DEFAULT_BLOCK_REWARD, DEFAULT_DIFFICULTY, DIFFICULTY_ADJUSTMENT_INTERVAL,
    GENESIS_PREVIOUS_HASH, MEMPOOL_MAX_SIZE, TARGET_BLOCK_TIME_SECS,
};
use crate::error::CoreError;
use crate::mempool::Mempool;
use crate::transaction::Transaction;

/// Proof carried by the genesis block. Never PoW-checked; any positive value
/// satisfies the `proof > 0` rule.
const GENESIS_PROOF: u64 = 100;

/// The in-memory ledger: hash-linked chain plus the mempool it feeds from.
///
/// The chain is mutated only by appending a mined block or by wholesale
/// replacement through consensus; everything else is read-only. There is no
/// persistence by design, state is lost on restart.
pub struct Blockchain {
    pub chain: Vec<Block>,
    pub difficulty: u32,
    pub block_reward: f64,
    pub mempool: Mempool,
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new(DEFAULT_DIFFICULTY, DEFAULT_BLOCK_REWARD, MEMPOOL_MAX_SIZE)
    }
}

impl Blockchain {
    pub fn new(difficulty: u32, block_reward: f64, mempool_max_size: usize) -> Self {
        let genesis = Block::new(0, vec![Transaction::genesis()], GENESIS_PROOF, GENESIS_PREVIOUS_HASH);
        log::info!("ledger initialized, genesis hash {}", &genesis.hash[..16]);

        Blockchain {
            chain: vec![genesis],
            difficulty: difficulty.max(1),
            block_reward,
            mempool: Mempool::new(mempool_max_size),
        }
    }

    pub fn latest_block(&self) -> &Block {
        self.chain.last().expect("chain always holds genesis")
    }

    pub fn chain_length(&self) -> usize {
        self.chain.len()
    }

    pub fn get_chain(&self) -> &[Block] {
        &self.chain
    }

    /// Admit a transaction to the mempool. System transactions (sender `"0"`)
    /// are minted only by the miner and are never accepted via submission.
    pub fn submit_transaction(&mut self, transaction: Transaction) -> Result<(), CoreError> {
        if transaction.is_system() {
            log::warn!("rejected submitted system transaction {}", transaction.hash);
            return Err(CoreError::SystemSender);
        }
        self.mempool.add_transaction(transaction)
    }

    /// Candidate block for mining: up to 100 prioritized mempool transactions
    /// referencing the current head, proof 0. `None` when the mempool is
    /// empty. The PoW search runs on this candidate before the reward
    /// transaction is added, so the reward is covered by the final hash but
    /// not by the search target.
    pub fn next_candidate(&self) -> Option<Block> {
        if self.mempool.transaction_count() == 0 {
            return None;
        }
        let transactions = self.mempool.for_block_default();
        Some(Block::new(
            self.latest_block().index + 1,
            transactions,
            0,
            &self.latest_block().hash,
        ))
    }

    /// Finalize and append a mined candidate: prepend the coinbase reward,
    /// recompute the hash over the full transaction set, append, drop the
    /// included non-reward transactions from the mempool, and re-evaluate
    /// difficulty. Returns `None` when the candidate no longer links to the
    /// current head (the chain advanced while mining) or carries no proof.
    pub fn commit_mined_block(&mut self, mut block: Block, miner_address: &str) -> Option<Block> {
        if block.previous_hash != self.latest_block().hash {
            log::warn!(
                "discarding mined block {}: chain advanced past its parent",
                &block.hash[..16.min(block.hash.len())]
            );
            return None;
        }
        if block.proof == 0 {
            return None;
        }

        let included: Vec<String> = block.transactions.iter().map(|tx| tx.hash.clone()).collect();

        block
            .transactions
            .insert(0, Transaction::reward(miner_address, self.block_reward));
        block.hash = block.calculate_hash();

        log::info!(
            "appended block index={} txs={} hash={}",
            block.index,
            block.transactions.len(),
            &block.hash[..16]
        );

        self.chain.push(block.clone());
        self.mempool.clear_transactions(&included);
        self.adjust_difficulty();

        Some(block)
    }

    /// Mine one block from the mempool. `None` when the mempool is empty or
    /// the search was cancelled.
    pub fn mine_block(&mut self, miner_address: &str, cancel: &AtomicBool) -> Option<Block> {
        let mut candidate = self.next_candidate()?;
        candidate.mine_proof_of_work(self.difficulty, cancel)?;
        self.commit_mined_block(candidate, miner_address)
    }

    /// Every 10 blocks, steer difficulty toward the 60 s block-time target:
    /// +1 when the recent average is under 30 s, -1 (floored at 1) when it is
    /// over 120 s.
    pub fn adjust_difficulty(&mut self) {
        if self.chain.len() < DIFFICULTY_ADJUSTMENT_INTERVAL
            || self.chain.len() % DIFFICULTY_ADJUSTMENT_INTERVAL != 0
        {
            return;
        }

        let window = &self.chain[self.chain.len() - DIFFICULTY_ADJUSTMENT_INTERVAL..];
        let span = window.last().unwrap().timestamp - window.first().unwrap().timestamp;
        let average = span / (DIFFICULTY_ADJUSTMENT_INTERVAL - 1) as f64;

        let previous = self.difficulty;
        if average < TARGET_BLOCK_TIME_SECS / 2.0 {
            self.difficulty += 1;
        } else if average > TARGET_BLOCK_TIME_SECS * 2.0 {
            self.difficulty = self.difficulty.saturating_sub(1).max(1);
        }

        if self.difficulty != previous {
            log::info!(
                "difficulty adjusted {} -> {} (avg block time {:.1}s)",
                previous,
                self.difficulty,
                average
            );
        }
    }

    /// Full-chain validation: hash linkage between every adjacent pair plus
    /// per-block structural validity (stored hash, positive proof, valid
    /// transactions).
    pub fn validate_chain(&self) -> bool {
        Self::is_valid_sequence(&self.chain)
    }

    fn is_valid_sequence(chain: &[Block]) -> bool {
        for i in 1..chain.len() {
            if chain[i].previous_hash != chain[i - 1].hash {
                log::warn!("chain linkage broken at index {}", i);
                return false;
            }
            if !chain[i].is_valid() {
                log::warn!("invalid block at index {}", i);
                return false;
            }
        }
        true
    }

    /// Longest-valid-chain replacement. The candidate must be strictly
    /// longer; everything else is `adopt_chain`'s structural validation.
    pub fn replace_chain(&mut self, candidate: Vec<Block>) -> bool {
        if candidate.len() <= self.chain.len() {
            log::debug!(
                "rejecting candidate chain: length {} <= local {}",
                candidate.len(),
                self.chain.len()
            );
            return false;
        }
        self.adopt_chain(candidate)
    }

    /// Consensus adoption: the candidate must start at a genesis block
    /// (index 0), carry sequential indices, hold hash linkage across the
    /// whole sequence, and contain only valid blocks. There is no length
    /// precondition, so an equal-length fork resolved by peer majority can
    /// still land. On acceptance the local chain is swapped in one
    /// assignment.
    pub fn adopt_chain(&mut self, candidate: Vec<Block>) -> bool {
        if candidate.first().map(|b| b.index) != Some(0) {
            log::warn!("rejecting candidate chain: missing genesis");
            return false;
        }
        if candidate.iter().enumerate().any(|(i, b)| b.index != i as u64) {
            log::warn!("rejecting candidate chain: non-sequential indices");
            return false;
        }
        if !Self::is_valid_sequence(&candidate) {
            log::warn!("rejecting candidate chain: failed validation");
            return false;
        }

        log::info!(
            "adopting chain: {} -> {} blocks, new head {}",
            self.chain.len(),
            candidate.len(),
            &candidate.last().unwrap().hash[..16]
        );
        self.chain = candidate;
        true
    }

    /// Balance by full-chain scan: received minus sent across every committed
    /// block. Deliberately recomputed per query, no cached index.
    pub fn get_balance(&self, address: &str) -> f64 {
        let mut balance = 0.0;
        for block in &self.chain {
            for tx in &block.transactions {
                if tx.recipient == address {
                    balance += tx.amount;
                }
                if tx.sender == address {
                    balance -= tx.amount;
                }
            }
        }
        balance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::Wallet;

    fn no_cancel() -> AtomicBool {
        AtomicBool::new(false)
    }

    fn test_chain() -> Blockchain {
        // difficulty 1 keeps PoW fast in tests
        Blockchain::new(1, DEFAULT_BLOCK_REWARD, MEMPOOL_MAX_SIZE)
    }

    fn submit_signed(bc: &mut Blockchain, wallet: &Wallet, recipient: &str, amount: f64) {
        let mut tx = Transaction::new(&wallet.address(), recipient, amount);
        tx.sign(wallet).unwrap();
        bc.submit_transaction(tx).unwrap();
    }

    #[test]
    fn genesis_block_shape() {
        let bc = Blockchain::default();
        let genesis = bc.latest_block();
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.previous_hash, GENESIS_PREVIOUS_HASH);
        assert_eq!(genesis.transactions.len(), 1);
        assert_eq!(genesis.transactions[0].amount, 0.0);
        assert!(bc.validate_chain());
    }

    #[test]
    fn submit_rejects_system_sender() {
        let mut bc = test_chain();
        assert_eq!(
            bc.submit_transaction(Transaction::reward("mallory", 10.0)),
            Err(CoreError::SystemSender)
        );
    }

    #[test]
    fn mine_on_empty_mempool_returns_none() {
        let mut bc = test_chain();
        assert!(bc.mine_block("miner", &no_cancel()).is_none());
        assert_eq!(bc.chain_length(), 1);
    }

    #[test]
    fn mine_includes_reward_and_drains_mempool() {
        let mut bc = test_chain();
        let wallet = Wallet::generate();
        submit_signed(&mut bc, &wallet, "a", 1.0);
        submit_signed(&mut bc, &wallet, "b", 2.0);
        submit_signed(&mut bc, &wallet, "c", 3.0);

        let block = bc.mine_block("miner", &no_cancel()).unwrap();

        assert_eq!(bc.chain_length(), 2);
        // 3 originals + 1 reward, reward first
        assert_eq!(block.transactions.len(), 4);
        assert!(block.transactions[0].is_system());
        assert_eq!(block.transactions[0].recipient, "miner");
        assert_eq!(bc.mempool.transaction_count(), 0);
        assert_eq!(bc.get_balance("miner"), bc.block_reward);
        assert!(bc.validate_chain());
    }

    #[test]
    fn mined_block_hash_covers_reward_but_pow_does_not() {
        let mut bc = test_chain();
        let wallet = Wallet::generate();
        submit_signed(&mut bc, &wallet, "a", 1.0);

        let block = bc.mine_block("miner", &no_cancel()).unwrap();

        // final hash is recomputed after the reward insertion and still
        // matches the block contents
        assert_eq!(block.hash, block.calculate_hash());
        assert!(block.proof > 0);
    }

    #[test]
    fn cancelled_mining_leaves_state_untouched() {
        let mut bc = test_chain();
        let wallet = Wallet::generate();
        submit_signed(&mut bc, &wallet, "a", 1.0);

        let cancelled = AtomicBool::new(true);
        assert!(bc.mine_block("miner", &cancelled).is_none());
        assert_eq!(bc.chain_length(), 1);
        assert_eq!(bc.mempool.transaction_count(), 1);
    }

    #[test]
    fn commit_rejects_stale_candidate() {
        let mut bc = test_chain();
        let wallet = Wallet::generate();
        submit_signed(&mut bc, &wallet, "a", 1.0);

        let mut stale = bc.next_candidate().unwrap();
        stale.mine_proof_of_work(1, &no_cancel()).unwrap();

        // chain advances while the candidate was in flight
        submit_signed(&mut bc, &wallet, "b", 2.0);
        bc.mine_block("miner", &no_cancel()).unwrap();

        assert!(bc.commit_mined_block(stale, "miner").is_none());
    }

    #[test]
    fn validate_chain_detects_tampering() {
        let mut bc = test_chain();
        let wallet = Wallet::generate();
        submit_signed(&mut bc, &wallet, "a", 1.0);
        bc.mine_block("miner", &no_cancel()).unwrap();
        assert!(bc.validate_chain());

        bc.chain[1].transactions[0].amount = 1000.0;
        assert!(!bc.validate_chain());
    }

    #[test]
    fn replace_chain_accepts_longer_valid_chain() {
        let wallet = Wallet::generate();

        // Node A mines 5 blocks from genesis
        let mut node_a = test_chain();
        for i in 0..5 {
            submit_signed(&mut node_a, &wallet, &format!("r{i}"), 1.0 + i as f64);
            node_a.mine_block("miner-a", &no_cancel()).unwrap();
        }
        assert_eq!(node_a.chain_length(), 6);

        // Node B is fresh and adopts A's chain
        let mut node_b = test_chain();
        assert!(node_b.replace_chain(node_a.chain.clone()));
        assert_eq!(node_b.chain_length(), 6);
        assert_eq!(node_b.latest_block().hash, node_a.latest_block().hash);
    }

    #[test]
    fn replace_chain_rejects_shorter_or_equal() {
        let wallet = Wallet::generate();
        let mut bc = test_chain();
        submit_signed(&mut bc, &wallet, "a", 1.0);
        bc.mine_block("miner", &no_cancel()).unwrap();

        let fresh = test_chain();
        let head_before = bc.latest_block().hash.clone();

        assert!(!bc.replace_chain(fresh.chain.clone()));
        assert!(!bc.replace_chain(bc.chain.clone()));
        assert_eq!(bc.latest_block().hash, head_before);
    }

    #[test]
    fn adopt_chain_accepts_equal_length_fork() {
        let wallet = Wallet::generate();

        // two forks of equal length with different heads
        let mut local = test_chain();
        submit_signed(&mut local, &wallet, "a", 1.0);
        local.mine_block("miner-l", &no_cancel()).unwrap();

        let mut remote = test_chain();
        submit_signed(&mut remote, &wallet, "b", 2.0);
        remote.mine_block("miner-r", &no_cancel()).unwrap();

        assert_eq!(local.chain_length(), remote.chain_length());
        assert_ne!(local.latest_block().hash, remote.latest_block().hash);

        // the longest-chain entry point still refuses an equal-length swap
        assert!(!local.replace_chain(remote.chain.clone()));

        assert!(local.adopt_chain(remote.chain.clone()));
        assert_eq!(local.latest_block().hash, remote.latest_block().hash);
        assert!(local.validate_chain());
    }

    #[test]
    fn adopt_chain_rejects_invalid_candidate() {
        let wallet = Wallet::generate();
        let mut source = test_chain();
        submit_signed(&mut source, &wallet, "a", 1.0);
        source.mine_block("miner", &no_cancel()).unwrap();

        let mut forged = source.chain.clone();
        forged[1].previous_hash = "f".repeat(64);

        let mut bc = test_chain();
        let head_before = bc.latest_block().hash.clone();
        assert!(!bc.adopt_chain(forged));
        assert_eq!(bc.latest_block().hash, head_before);
    }

    #[test]
    fn replace_chain_rejects_broken_linkage() {
        let wallet = Wallet::generate();
        let mut source = test_chain();
        for i in 0..2 {
            submit_signed(&mut source, &wallet, &format!("r{i}"), 1.0);
            source.mine_block("miner", &no_cancel()).unwrap();
        }

        let mut forged = source.chain.clone();
        forged[2].previous_hash = "f".repeat(64);

        let mut bc = test_chain();
        assert!(!bc.replace_chain(forged));
        assert_eq!(bc.chain_length(), 1);
    }

    #[test]
    fn balance_is_received_minus_sent_and_stable() {
        let mut bc = test_chain();
        let wallet = Wallet::generate();
        let addr = wallet.address();

        submit_signed(&mut bc, &wallet, "shop", 4.0);
        bc.mine_block(&addr, &no_cancel()).unwrap();

        // reward 10 received, 4 sent
        let expected = bc.block_reward - 4.0;
        assert_eq!(bc.get_balance(&addr), expected);
        assert_eq!(bc.get_balance(&addr), expected);
        assert_eq!(bc.get_balance("shop"), 4.0);
    }

    #[test]
    fn difficulty_rises_when_blocks_are_fast() {
        let mut bc = test_chain();
        // fabricate a 10-block chain mined 10s apart
        for i in 1..10 {
            let mut block = Block::new(i, vec![Transaction::genesis()], 1, "x");
            block.timestamp = bc.chain[0].timestamp + i as f64 * 10.0;
            bc.chain.push(block);
        }
        let before = bc.difficulty;
        bc.adjust_difficulty();
        assert_eq!(bc.difficulty, before + 1);
    }

    #[test]
    fn difficulty_drops_when_blocks_are_slow_with_floor() {
        let mut bc = test_chain();
        for i in 1..10 {
            let mut block = Block::new(i, vec![Transaction::genesis()], 1, "x");
            block.timestamp = bc.chain[0].timestamp + i as f64 * 300.0;
            bc.chain.push(block);
        }
        bc.adjust_difficulty();
        // difficulty started at 1 and never drops below the floor
        assert_eq!(bc.difficulty, 1);
    }
}
