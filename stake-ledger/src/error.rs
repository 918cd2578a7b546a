//! Error types for the stake ledger

use thiserror::Error;

/// Result type for stake ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Stake ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Argument not found
    #[error("Argument not found: {0}")]
    ArgumentNotFound(u64),

    /// Stake not found
    #[error("Stake not found: {0}")]
    StakeNotFound(u64),

    /// Transaction not found
    #[error("Transaction not found: {0}")]
    TransactionNotFound(u64),

    /// Claim rejected by the claim registry
    #[error("Invalid claim: {0}")]
    InvalidClaim(u64),

    /// Stake denomination differs from the platform stake denomination
    #[error("Wrong denomination: expected {expected}, got {actual}")]
    WrongDenomination {
        /// Platform stake denomination
        expected: String,
        /// Denomination supplied by the caller
        actual: String,
    },

    /// Stake amount is zero
    #[error("Stake amount must be positive")]
    ZeroStake,

    /// Stake amount outside the configured bounds
    #[error("Stake amount {amount} outside [{min}, {max}]")]
    StakeOutOfRange {
        /// Requested amount
        amount: u128,
        /// Minimum stake amount
        min: u128,
        /// Maximum stake amount
        max: u128,
    },

    /// Stake duration does not move the end time past the creation time
    #[error("Invalid stake duration: {0}")]
    InvalidDuration(String),

    /// Account is jailed and may not stake
    #[error("Account is jailed: {0}")]
    Jailed(String),

    /// Argument body violates the length limits
    #[error("Invalid argument body: {0}")]
    InvalidArgumentBody(String),

    /// Transaction kind may not increase a balance
    #[error("Transaction kind {0} cannot credit a balance")]
    IllegalCreditKind(String),

    /// Transaction kind may not decrease a balance
    #[error("Transaction kind {0} cannot debit a balance")]
    IllegalDebitKind(String),

    /// Balance lower than the requested debit
    #[error("Insufficient funds: balance {balance}{denom}, requested {requested}{denom}")]
    InsufficientFunds {
        /// Denomination
        denom: String,
        /// Current balance
        balance: u128,
        /// Requested amount
        requested: u128,
    },

    /// Coin arithmetic across different denominations
    #[error("Denomination mismatch: {0} vs {1}")]
    DenominationMismatch(String, String),

    /// Coin arithmetic overflowed
    #[error("Amount overflow in {0}")]
    Overflow(String),

    /// An allocated ID is already taken (store corruption)
    #[error("Duplicate ID: {0}")]
    DuplicateId(String),

    /// Address cannot be encoded into a key
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Timestamp cannot be encoded into a sortable key
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Invariant violation (queue entry without stake, corrupt key, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Record serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Genesis (JSON) serialization error
    #[error("Genesis encoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Errors after which the state machine must stop instead of continuing
    /// with possibly partial state.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::DuplicateId(_)
                | Error::InvariantViolation(_)
                | Error::Storage(_)
                | Error::Serialization(_)
        )
    }

    /// Unknown entity ID
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::ArgumentNotFound(_) | Error::StakeNotFound(_) | Error::TransactionNotFound(_)
        )
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
