//! Stake Ledger Core
//!
//! Indexed stake store and conservation-enforcing transaction ledger for a
//! stake-backed deliberation platform.
//!
//! # Architecture
//!
//! - **Ordered KV store**: records, indices and the expiry queue share one
//!   keyspace partitioned by a one-byte [`keys::KeyPrefix`]
//! - **Single Writer**: mutations take `&mut self`; the actor serialises async callers
//! - **Atomic Operations**: each operation commits exactly one write batch
//! - **Paged Expiry**: matured stakes are drained a bounded page per block
//!
//! # Invariants
//!
//! - Money conservation: Σ(credits) - Σ(debits) == Σ(balances) - Σ(initial balances)
//! - Direction: a kind only moves balances the way its capability allows
//! - Append-only: transactions are never modified or deleted
//! - Monotonic IDs: no ID is handed out twice, across restarts and genesis reloads

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]

pub mod actor;
pub mod bank;
pub mod config;
pub mod error;
pub mod genesis;
pub mod ids;
pub mod index;
pub mod keeper;
pub mod keys;
pub mod metrics;
pub mod queue;
pub mod records;
pub mod store;
pub mod types;

// Re-exports
pub use actor::{spawn_keeper_actor, KeeperHandle};
pub use bank::{Bank, SortOrder, TransactionFilter};
pub use config::{Config, StakingParams};
pub use error::{Error, Result};
pub use genesis::{validate_genesis, GenesisState};
pub use keeper::{
    AccountRegistry, ClaimRegistry, ClaimSet, ClaimStakes, JailSet, OutcomeResolver, ReturnInFull,
    StakeKeeper, StakeOutcome,
};
pub use metrics::Metrics;
pub use queue::{ExpiryQueue, QueueEntry};
pub use store::{KeyValueStore, MemoryStore, RocksStore, WriteTxn};
pub use types::{
    AccountBalance, Address, Argument, Coin, Coins, Direction, Stake, StakeType, Timestamp,
    Transaction, TransactionKind, UserEarnedCoins,
};
