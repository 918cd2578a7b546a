//! Core types for the stake ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode for records, JSON for genesis)
//! - Exact integer arithmetic for coin amounts
//! - Static, exhaustively checked transaction capabilities

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Block time supplied by the caller. The core never reads the wall clock.
pub type Timestamp = DateTime<Utc>;

/// Account address (bech32 string of the app account)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    /// Create new address
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw bytes used in store keys
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Amount of a single denomination
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coin {
    /// Denomination
    pub denom: String,
    /// Non-negative amount
    pub amount: u128,
}

impl Coin {
    /// Create new coin
    pub fn new(denom: impl Into<String>, amount: u128) -> Self {
        Self {
            denom: denom.into(),
            amount,
        }
    }

    /// Zero amount of `denom`
    pub fn zero(denom: impl Into<String>) -> Self {
        Self::new(denom, 0)
    }

    /// True when the amount is zero
    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }

    /// Add two coins of the same denomination
    pub fn checked_add(&self, other: &Coin) -> Result<Coin> {
        self.ensure_same_denom(other)?;
        let amount = self
            .amount
            .checked_add(other.amount)
            .ok_or_else(|| Error::Overflow(format!("{} + {}", self, other)))?;
        Ok(Coin::new(self.denom.clone(), amount))
    }

    /// Subtract a coin of the same denomination; fails instead of underflowing
    pub fn checked_sub(&self, other: &Coin) -> Result<Coin> {
        self.ensure_same_denom(other)?;
        let amount = self
            .amount
            .checked_sub(other.amount)
            .ok_or_else(|| Error::InsufficientFunds {
                denom: self.denom.clone(),
                balance: self.amount,
                requested: other.amount,
            })?;
        Ok(Coin::new(self.denom.clone(), amount))
    }

    fn ensure_same_denom(&self, other: &Coin) -> Result<()> {
        if self.denom != other.denom {
            return Err(Error::DenominationMismatch(
                self.denom.clone(),
                other.denom.clone(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}

/// Multi-denomination amount, sorted by denom, without zero entries.
///
/// Deserialization normalises its input the same way [`Coins::from_coins`]
/// does.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Coin>")]
pub struct Coins(Vec<Coin>);

impl TryFrom<Vec<Coin>> for Coins {
    type Error = Error;

    fn try_from(coins: Vec<Coin>) -> Result<Self> {
        Coins::from_coins(coins)
    }
}

impl Coins {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from arbitrary coins, merging duplicates
    pub fn from_coins(coins: impl IntoIterator<Item = Coin>) -> Result<Self> {
        let mut out = Coins::new();
        for coin in coins {
            out.add(&coin)?;
        }
        Ok(out)
    }

    /// Add a coin in place
    pub fn add(&mut self, coin: &Coin) -> Result<()> {
        if coin.is_zero() {
            return Ok(());
        }
        match self.0.binary_search_by(|c| c.denom.as_str().cmp(&coin.denom)) {
            Ok(pos) => {
                self.0[pos] = self.0[pos].checked_add(coin)?;
            }
            Err(pos) => self.0.insert(pos, coin.clone()),
        }
        Ok(())
    }

    /// Amount of `denom` (zero if absent)
    pub fn amount_of(&self, denom: &str) -> u128 {
        self.0
            .iter()
            .find(|c| c.denom == denom)
            .map(|c| c.amount)
            .unwrap_or(0)
    }

    /// True when no denomination has a positive amount
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate coins in denom order
    pub fn iter(&self) -> impl Iterator<Item = &Coin> {
        self.0.iter()
    }
}

/// Direction a transaction kind is allowed to move a balance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Increases the balance
    Credit,
    /// Decreases the balance
    Debit,
}

/// Transaction kind
///
/// Each kind carries exactly one direction capability; see
/// [`TransactionKind::direction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransactionKind {
    /// Initial grant on account registration
    Registration = 0,
    /// Stake backing an argument
    Backing = 1,
    /// Backing stake returned at expiry
    BackingReturned = 2,
    /// Stake challenging an argument
    Challenge = 3,
    /// Challenge stake returned at expiry
    ChallengeReturned = 4,
    /// Stake upvoting an argument
    Upvote = 5,
    /// Upvote stake returned at expiry
    UpvoteReturned = 6,
    /// Interest for creating an argument
    InterestArgumentCreation = 7,
    /// Interest for upvotes received on an argument
    InterestUpvoteReceived = 8,
    /// Interest for upvotes given
    InterestUpvoteGiven = 9,
    /// Reward payout
    RewardPayout = 10,
}

impl TransactionKind {
    /// Every kind, in declaration order
    pub const ALL: [TransactionKind; 11] = [
        TransactionKind::Registration,
        TransactionKind::Backing,
        TransactionKind::BackingReturned,
        TransactionKind::Challenge,
        TransactionKind::ChallengeReturned,
        TransactionKind::Upvote,
        TransactionKind::UpvoteReturned,
        TransactionKind::InterestArgumentCreation,
        TransactionKind::InterestUpvoteReceived,
        TransactionKind::InterestUpvoteGiven,
        TransactionKind::RewardPayout,
    ];

    /// Direction capability.
    ///
    /// Earlier versions of the bank let `RewardPayout` debit and had a single
    /// interest kind; this table is the current one.
    pub const fn direction(self) -> Direction {
        match self {
            TransactionKind::Backing | TransactionKind::Challenge | TransactionKind::Upvote => {
                Direction::Debit
            }
            TransactionKind::Registration
            | TransactionKind::BackingReturned
            | TransactionKind::ChallengeReturned
            | TransactionKind::UpvoteReturned
            | TransactionKind::InterestArgumentCreation
            | TransactionKind::InterestUpvoteReceived
            | TransactionKind::InterestUpvoteGiven
            | TransactionKind::RewardPayout => Direction::Credit,
        }
    }

    /// May increase a balance
    pub const fn allows_credit(self) -> bool {
        matches!(self.direction(), Direction::Credit)
    }

    /// May decrease a balance
    pub const fn allows_debit(self) -> bool {
        matches!(self.direction(), Direction::Debit)
    }

    /// Stable name
    pub fn name(&self) -> &'static str {
        match self {
            TransactionKind::Registration => "Registration",
            TransactionKind::Backing => "Backing",
            TransactionKind::BackingReturned => "BackingReturned",
            TransactionKind::Challenge => "Challenge",
            TransactionKind::ChallengeReturned => "ChallengeReturned",
            TransactionKind::Upvote => "Upvote",
            TransactionKind::UpvoteReturned => "UpvoteReturned",
            TransactionKind::InterestArgumentCreation => "InterestArgumentCreation",
            TransactionKind::InterestUpvoteReceived => "InterestUpvoteReceived",
            TransactionKind::InterestUpvoteGiven => "InterestUpvoteGiven",
            TransactionKind::RewardPayout => "RewardPayout",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// What a stake was placed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StakeType {
    /// Backing the argument's position
    Backing,
    /// Challenging the argument's position
    Challenge,
    /// Upvoting the argument
    Upvote,
}

impl StakeType {
    /// Debit kind used when the stake is placed
    pub fn debit_kind(self) -> TransactionKind {
        match self {
            StakeType::Backing => TransactionKind::Backing,
            StakeType::Challenge => TransactionKind::Challenge,
            StakeType::Upvote => TransactionKind::Upvote,
        }
    }

    /// Credit kind used when the stake is returned
    pub fn return_kind(self) -> TransactionKind {
        match self {
            StakeType::Backing => TransactionKind::BackingReturned,
            StakeType::Challenge => TransactionKind::ChallengeReturned,
            StakeType::Upvote => TransactionKind::UpvoteReturned,
        }
    }
}

/// A position taken on a claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argument {
    /// Argument ID
    pub id: u64,
    /// Claim the argument belongs to
    pub claim_id: u64,
    /// Author
    pub creator: Address,
    /// Argument text
    pub body: String,
    /// Creation block time
    pub created_time: Timestamp,
}

/// Currency locked against an argument until `end_time`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stake {
    /// Stake ID
    pub id: u64,
    /// Staked argument
    pub argument_id: u64,
    /// Staker
    pub creator: Address,
    /// Locked amount (platform stake denomination)
    pub amount: Coin,
    /// Backing, challenge or upvote
    pub stake_type: StakeType,
    /// Creation block time
    pub created_time: Timestamp,
    /// Maturity time, strictly after `created_time`
    pub end_time: Timestamp,
    /// Set once by the expiry drain
    pub expired: bool,
}

/// Immutable ledger entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction ID (monotonic)
    pub id: u64,
    /// Kind
    pub kind: TransactionKind,
    /// Account whose balance changed
    pub app_account_address: Address,
    /// Stake, argument or claim that caused the transaction
    pub reference_id: u64,
    /// Amount moved
    pub amount: Coin,
    /// Block time
    pub created_time: Timestamp,
}

/// Earned coins of one user (genesis payload)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEarnedCoins {
    /// User
    pub address: Address,
    /// Running total of credits
    pub coins: Coins,
}

/// Balance of one user in one denomination (genesis payload)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// User
    pub address: Address,
    /// Balance
    pub coin: Coin,
}
