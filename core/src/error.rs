use thiserror::Error;

/// Rejection reasons for transaction admission. Chain-level validation keeps
/// its `bool` surface; these variants exist where the caller needs to report
/// why a transaction was turned away.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("invalid transaction {hash}")]
    InvalidTransaction { hash: String },

    #[error("mempool full ({capacity} transactions)")]
    MempoolFull { capacity: usize },

    #[error("duplicate transaction {hash}")]
    DuplicateTransaction { hash: String },

    #[error("system transactions cannot be submitted")]
    SystemSender,
}
