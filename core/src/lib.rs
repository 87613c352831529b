pub mod block;
pub mod blockchain;
pub mod config;
pub mod error;
pub mod mempool;
pub mod transaction;
pub mod wallet;

// Explicit re-exports to avoid ambiguous glob re-exports
pub use block::Block;
pub use blockchain::Blockchain;
pub use error::CoreError;
pub use mempool::Mempool;
pub use transaction::Transaction;
pub use wallet::Wallet;
