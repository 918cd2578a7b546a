//! Stake keeper: argument and stake orchestration
//!
//! Ties the ID counters, primary records, secondary indices, expiry queue and
//! ledger together. Every mutating operation stages all of its writes in one
//! [`WriteTxn`] and commits once, so a failed validation leaves no trace.
//!
//! # Example
//!
//! ```
//! use chrono::{Duration, TimeZone, Utc};
//! use stake_ledger::{
//!     Address, ClaimSet, Coin, MemoryStore, ReturnInFull, StakeKeeper, StakeType,
//!     StakingParams, TransactionKind,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> stake_ledger::Result<()> {
//! let params = StakingParams::default();
//! let denom = params.stake_denom.clone();
//! let mut keeper = StakeKeeper::new(
//!     Arc::new(MemoryStore::new()),
//!     ClaimSet::new([1]),
//!     ReturnInFull,
//!     params,
//! )?;
//!
//! let now = Utc.with_ymd_and_hms(2019, 7, 1, 0, 0, 0).unwrap();
//! let author = Address::new("cosmos1author");
//! let staker = Address::new("cosmos1staker");
//!
//! keeper
//!     .bank_mut()
//!     .credit(&staker, &Coin::new(denom.clone(), 500), TransactionKind::Registration, 0, &now)?;
//!
//! let argument_id = keeper.create_argument(1, &author, "Water boils at 100C at sea level.", &now)?;
//! let stake_id = keeper.create_stake(
//!     argument_id,
//!     &staker,
//!     &Coin::new(denom.clone(), 100),
//!     StakeType::Backing,
//!     Some(Duration::hours(1)),
//!     &now,
//! )?;
//!
//! assert_eq!(keeper.end_block(&(now + Duration::hours(2)))?, 1);
//! assert!(keeper.stake(stake_id)?.expired);
//! # Ok(())
//! # }
//! ```

use crate::bank::{self, Bank};
use crate::config::StakingParams;
use crate::ids::IdAllocator;
use crate::index;
use crate::metrics::Metrics;
use crate::queue::{ExpiryQueue, QueueEntry};
use crate::records;
use crate::store::{KeyValueStore, WriteTxn};
use crate::types::{Address, Argument, Coin, Coins, Stake, StakeType, Timestamp, UserEarnedCoins};
use crate::{Error, Result};
use chrono::Duration;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Source of truth for which claims exist and how much is staked on them
pub trait ClaimRegistry: Send + Sync {
    /// True if arguments may be attached to `claim_id`
    fn claim_exists(&self, claim_id: u64) -> bool;

    /// Add `amount` to the backing total of `claim_id`.
    ///
    /// Called once per backing stake, after every other check passed and
    /// before the stake is committed.
    fn add_backing_stake(&mut self, claim_id: u64, amount: &Coin) -> Result<()>;

    /// Add `amount` to the challenge total of `claim_id`
    fn add_challenge_stake(&mut self, claim_id: u64, amount: &Coin) -> Result<()>;
}

/// Backing and challenge totals of one claim
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClaimStakes {
    /// Sum of backing stakes
    pub backing: u128,
    /// Sum of challenge stakes
    pub challenge: u128,
}

/// Fixed set of known claims with in-memory stake totals
#[derive(Debug, Clone, Default)]
pub struct ClaimSet {
    claims: BTreeMap<u64, ClaimStakes>,
}

impl ClaimSet {
    /// Registry accepting exactly `claims`
    pub fn new(claims: impl IntoIterator<Item = u64>) -> Self {
        Self {
            claims: claims
                .into_iter()
                .map(|id| (id, ClaimStakes::default()))
                .collect(),
        }
    }

    /// Register another claim
    pub fn insert(&mut self, claim_id: u64) -> bool {
        match self.claims.entry(claim_id) {
            Entry::Vacant(entry) => {
                entry.insert(ClaimStakes::default());
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Stake totals of `claim_id`
    pub fn stakes(&self, claim_id: u64) -> Option<ClaimStakes> {
        self.claims.get(&claim_id).copied()
    }

    fn totals_mut(&mut self, claim_id: u64) -> Result<&mut ClaimStakes> {
        self.claims
            .get_mut(&claim_id)
            .ok_or(Error::InvalidClaim(claim_id))
    }
}

impl ClaimRegistry for ClaimSet {
    fn claim_exists(&self, claim_id: u64) -> bool {
        self.claims.contains_key(&claim_id)
    }

    fn add_backing_stake(&mut self, claim_id: u64, amount: &Coin) -> Result<()> {
        let totals = self.totals_mut(claim_id)?;
        totals.backing = totals
            .backing
            .checked_add(amount.amount)
            .ok_or_else(|| Error::Overflow(format!("backing total of claim {}", claim_id)))?;
        Ok(())
    }

    fn add_challenge_stake(&mut self, claim_id: u64, amount: &Coin) -> Result<()> {
        let totals = self.totals_mut(claim_id)?;
        totals.challenge = totals
            .challenge
            .checked_add(amount.amount)
            .ok_or_else(|| Error::Overflow(format!("challenge total of claim {}", claim_id)))?;
        Ok(())
    }
}

/// Source of truth for account standing
pub trait AccountRegistry: Send + Sync {
    /// True if `address` is jailed and may not stake
    fn is_jailed(&self, address: &Address) -> bool;
}

/// Fixed set of jailed accounts; empty by default
#[derive(Debug, Clone, Default)]
pub struct JailSet {
    jailed: BTreeSet<Address>,
}

impl JailSet {
    /// Registry jailing exactly `addresses`
    pub fn new(addresses: impl IntoIterator<Item = Address>) -> Self {
        Self {
            jailed: addresses.into_iter().collect(),
        }
    }

    /// Jail `address`
    pub fn jail(&mut self, address: Address) -> bool {
        self.jailed.insert(address)
    }

    /// Release `address`
    pub fn unjail(&mut self, address: &Address) -> bool {
        self.jailed.remove(address)
    }
}

impl AccountRegistry for JailSet {
    fn is_jailed(&self, address: &Address) -> bool {
        self.jailed.contains(address)
    }
}

/// What happens to a stake's funds at maturity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StakeOutcome {
    /// Credit `amount` (at most the staked amount) back to the staker
    Return {
        /// Amount returned
        amount: u128,
    },
    /// Burn `amount` (at most the staked amount); the remainder is returned
    Forfeit {
        /// Amount burned
        amount: u128,
    },
}

/// Decides the outcome of a matured stake
pub trait OutcomeResolver: Send + Sync {
    /// Outcome for `stake`, called once inside its drain
    fn resolve(&self, stake: &Stake) -> Result<StakeOutcome>;
}

/// Returns every stake in full
#[derive(Debug, Clone, Copy, Default)]
pub struct ReturnInFull;

impl OutcomeResolver for ReturnInFull {
    fn resolve(&self, stake: &Stake) -> Result<StakeOutcome> {
        Ok(StakeOutcome::Return {
            amount: stake.amount.amount,
        })
    }
}

/// Stake keeper
pub struct StakeKeeper<S: KeyValueStore, C: ClaimRegistry = ClaimSet, R: OutcomeResolver = ReturnInFull>
{
    pub(crate) store: Arc<S>,
    bank: Bank<S>,
    claims: C,
    accounts: Box<dyn AccountRegistry>,
    resolver: R,
    pub(crate) params: StakingParams,
    pub(crate) metrics: Metrics,
}

impl<S: KeyValueStore, C: ClaimRegistry, R: OutcomeResolver> StakeKeeper<S, C, R> {
    /// Keeper over `store` with immutable `params`
    pub fn new(store: Arc<S>, claims: C, resolver: R, params: StakingParams) -> Result<Self> {
        Self::with_metrics(store, claims, resolver, params, Metrics::new()?)
    }

    /// Keeper reporting into an existing metrics collector.
    ///
    /// The first keeper on a store records `params` with it; later keepers
    /// must be built with equal params.
    pub fn with_metrics(
        store: Arc<S>,
        claims: C,
        resolver: R,
        params: StakingParams,
        metrics: Metrics,
    ) -> Result<Self> {
        params.validate()?;
        match records::params(store.as_ref())? {
            Some(stored) if stored != params => {
                return Err(Error::Config(format!(
                    "staking params differ from the params stored with the ledger: {:?}",
                    stored
                )));
            }
            Some(_) => {}
            None => {
                let mut txn = WriteTxn::new(store.as_ref());
                records::stage_params(&mut txn, &params)?;
                txn.commit()?;
            }
        }

        metrics.set_active_stakes(ExpiryQueue::scheduled(store.as_ref())?.len());
        Ok(Self {
            bank: Bank::new(Arc::clone(&store), metrics.clone()),
            store,
            claims,
            accounts: Box::new(JailSet::default()),
            resolver,
            params,
            metrics,
        })
    }

    /// Check stake creators against `accounts`
    pub fn with_accounts(mut self, accounts: impl AccountRegistry + 'static) -> Self {
        self.accounts = Box::new(accounts);
        self
    }

    /// Claim registry
    pub fn claims(&self) -> &C {
        &self.claims
    }

    /// Staking parameters
    pub fn params(&self) -> &StakingParams {
        &self.params
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Ledger over the same store
    pub fn bank(&self) -> &Bank<S> {
        &self.bank
    }

    /// Ledger over the same store, for external credits such as registration
    /// grants and interest payouts
    pub fn bank_mut(&mut self) -> &mut Bank<S> {
        &mut self.bank
    }

    /// Create an argument under `claim_id`
    pub fn create_argument(
        &mut self,
        claim_id: u64,
        creator: &Address,
        body: &str,
        now: &Timestamp,
    ) -> Result<u64> {
        if !self.claims.claim_exists(claim_id) {
            return Err(Error::InvalidClaim(claim_id));
        }

        let len = body.chars().count();
        if len < self.params.min_argument_length || len > self.params.max_argument_length {
            return Err(Error::InvalidArgumentBody(format!(
                "length {} outside [{}, {}]",
                len, self.params.min_argument_length, self.params.max_argument_length
            )));
        }

        let mut txn = WriteTxn::new(self.store.as_ref());
        let argument = Argument {
            id: IdAllocator::next_argument_id(&mut txn)?,
            claim_id,
            creator: creator.clone(),
            body: body.to_string(),
            created_time: *now,
        };
        records::insert_argument(&mut txn, &argument)?;
        index::index_argument(&mut txn, &argument)?;
        txn.commit()?;

        self.metrics.record_argument_created();
        tracing::debug!(
            argument_id = argument.id,
            claim_id,
            creator = %creator,
            "Argument created"
        );

        Ok(argument.id)
    }

    /// Lock `amount` of `creator`'s funds against `argument_id`.
    ///
    /// `duration` defaults to the configured stake duration. The debit
    /// transaction references the argument. The stake counts towards the
    /// claim's backing or challenge total; upvotes count towards the side of
    /// the argument they upvote.
    pub fn create_stake(
        &mut self,
        argument_id: u64,
        creator: &Address,
        amount: &Coin,
        stake_type: StakeType,
        duration: Option<Duration>,
        now: &Timestamp,
    ) -> Result<u64> {
        if self.accounts.is_jailed(creator) {
            return Err(Error::Jailed(creator.to_string()));
        }

        let argument = records::argument(self.store.as_ref(), argument_id)?;

        if amount.denom != self.params.stake_denom {
            return Err(Error::WrongDenomination {
                expected: self.params.stake_denom.clone(),
                actual: amount.denom.clone(),
            });
        }
        if amount.is_zero() {
            return Err(Error::ZeroStake);
        }
        let (min, max) = (
            u128::from(self.params.min_stake_amount),
            u128::from(self.params.max_stake_amount),
        );
        if amount.amount < min || amount.amount > max {
            return Err(Error::StakeOutOfRange {
                amount: amount.amount,
                min,
                max,
            });
        }

        let duration = duration.unwrap_or_else(|| self.params.default_stake_duration());
        if duration <= Duration::zero() {
            return Err(Error::InvalidDuration(format!("{}", duration)));
        }
        let end_time = now
            .checked_add_signed(duration)
            .ok_or_else(|| Error::InvalidDuration(format!("{} + {}", now, duration)))?;

        let side = match stake_type {
            StakeType::Upvote => self.argument_side(argument_id)?,
            side => Some(side),
        };

        let mut txn = WriteTxn::new(self.store.as_ref());

        // Funds first: InsufficientFunds aborts before anything else is staged
        bank::stage_debit(
            &mut txn,
            creator,
            amount,
            stake_type.debit_kind(),
            argument_id,
            now,
        )?;

        let stake = Stake {
            id: IdAllocator::next_stake_id(&mut txn)?,
            argument_id,
            creator: creator.clone(),
            amount: amount.clone(),
            stake_type,
            created_time: *now,
            end_time,
            expired: false,
        };
        records::insert_stake(&mut txn, &stake)?;
        index::index_stake(&mut txn, &stake)?;
        ExpiryQueue::schedule(&mut txn, stake.id, &stake.end_time)?;

        match side {
            Some(StakeType::Backing) => self.claims.add_backing_stake(argument.claim_id, amount)?,
            Some(StakeType::Challenge) => {
                self.claims.add_challenge_stake(argument.claim_id, amount)?
            }
            _ => {}
        }
        txn.commit()?;

        self.metrics.record_stake_created();
        self.metrics.record_transactions(1);
        tracing::debug!(
            stake_id = stake.id,
            argument_id,
            creator = %creator,
            amount = %amount,
            end_time = %end_time,
            "Stake created"
        );

        Ok(stake.id)
    }

    /// Expire at most `limit` stakes matured at `now`, oldest first.
    ///
    /// Each stake is settled in its own atomic batch. A stake whose
    /// settlement fails with a non-fatal error stays queued for the next
    /// drain and the stakes behind it are still processed. A fatal error
    /// aborts the drain; stakes settled before it stay settled. Returns the
    /// number of stakes settled.
    pub fn drain_expired(&mut self, now: &Timestamp, limit: usize) -> Result<usize> {
        let mut processed = 0;
        // Skipped entries stay at the head of the queue
        let mut skipped = 0;

        while processed < limit {
            let wanted = limit - processed;
            let due = ExpiryQueue::due(self.store.as_ref(), now, Some(skipped + wanted))?;
            let fresh = due.get(skipped..).unwrap_or(&[]);
            if fresh.is_empty() {
                break;
            }

            for entry in fresh {
                match self.expire_stake(entry, now) {
                    Ok(()) => processed += 1,
                    Err(e) if e.is_fatal() => {
                        self.metrics.record_drain(processed);
                        tracing::error!(stake_id = entry.stake_id, error = %e, "Stake expiry failed");
                        return Err(e);
                    }
                    Err(e) => {
                        skipped += 1;
                        tracing::warn!(
                            stake_id = entry.stake_id,
                            error = %e,
                            "Stake expiry deferred"
                        );
                    }
                }
            }

            if fresh.len() < wanted {
                break;
            }
        }

        self.metrics.record_drain(processed);
        if processed > 0 || skipped > 0 {
            tracing::info!(processed, skipped, now = %now, "Drained expired stakes");
        }
        Ok(processed)
    }

    /// Drain every stake matured at `now`, one page at a time
    pub fn drain_all_expired(&mut self, now: &Timestamp) -> Result<usize> {
        let page = self.params.drain_page_size;
        let mut total = 0;
        loop {
            let processed = self.drain_expired(now, page)?;
            total += processed;
            if processed < page {
                return Ok(total);
            }
        }
    }

    /// End-of-block hook: drain one page of matured stakes
    pub fn end_block(&mut self, now: &Timestamp) -> Result<usize> {
        self.drain_expired(now, self.params.drain_page_size)
    }

    /// Side of the claim an argument stands on: the type of its first
    /// backing or challenge stake
    fn argument_side(&self, argument_id: u64) -> Result<Option<StakeType>> {
        for stake_id in index::argument_stakes(self.store.as_ref(), argument_id)? {
            let stake_type = records::stake(self.store.as_ref(), stake_id)?.stake_type;
            if stake_type != StakeType::Upvote {
                return Ok(Some(stake_type));
            }
        }
        Ok(None)
    }

    fn expire_stake(&self, entry: &QueueEntry, now: &Timestamp) -> Result<()> {
        let mut txn = WriteTxn::new(self.store.as_ref());

        let mut stake = records::stake_in(&txn, entry.stake_id).map_err(|e| match e {
            Error::StakeNotFound(id) => {
                Error::InvariantViolation(format!("queued stake {} has no record", id))
            }
            other => other,
        })?;
        if stake.expired || stake.end_time != entry.end_time {
            return Err(Error::InvariantViolation(format!(
                "queue entry ({}, {}) does not match stake (expired={}, end_time={})",
                entry.end_time, entry.stake_id, stake.expired, stake.end_time
            )));
        }

        let staked = stake.amount.amount;
        let outcome = self.resolver.resolve(&stake)?;
        let returned = match outcome {
            StakeOutcome::Return { amount } if amount <= staked => amount,
            StakeOutcome::Forfeit { amount } if amount <= staked => staked - amount,
            _ => {
                return Err(Error::InvariantViolation(format!(
                    "outcome {:?} exceeds stake {} of {}",
                    outcome, stake.id, staked
                )))
            }
        };

        let mut recorded = 0;
        if returned > 0 {
            bank::stage_credit(
                &mut txn,
                &stake.creator,
                &Coin::new(stake.amount.denom.clone(), returned),
                stake.stake_type.return_kind(),
                stake.id,
                now,
            )?;
            recorded += 1;
        }

        stake.expired = true;
        records::update_stake(&mut txn, &stake)?;
        ExpiryQueue::remove(&mut txn, stake.id, &stake.end_time)?;
        txn.commit()?;

        self.metrics.record_transactions(recorded);
        tracing::debug!(
            stake_id = stake.id,
            creator = %stake.creator,
            ?outcome,
            returned,
            "Stake expired"
        );
        Ok(())
    }

    /// Argument by ID
    pub fn argument(&self, id: u64) -> Result<Argument> {
        records::argument(self.store.as_ref(), id)
    }

    /// Stake by ID
    pub fn stake(&self, id: u64) -> Result<Stake> {
        records::stake(self.store.as_ref(), id)
    }

    /// Every argument, ascending by ID
    pub fn arguments(&self) -> Result<Vec<Argument>> {
        records::arguments(self.store.as_ref())
    }

    /// Every stake, ascending by ID
    pub fn stakes(&self) -> Result<Vec<Stake>> {
        records::stakes(self.store.as_ref())
    }

    /// Argument IDs of a claim
    pub fn claim_arguments(&self, claim_id: u64) -> Result<Vec<u64>> {
        index::claim_arguments(self.store.as_ref(), claim_id)
    }

    /// Stake IDs on an argument
    pub fn argument_stakes(&self, argument_id: u64) -> Result<Vec<u64>> {
        index::argument_stakes(self.store.as_ref(), argument_id)
    }

    /// Argument IDs written by a user
    pub fn user_arguments(&self, user: &Address) -> Result<Vec<u64>> {
        index::user_arguments(self.store.as_ref(), user)
    }

    /// `(created_time, stake_id)` of a user's stakes, oldest first
    pub fn user_stakes(&self, user: &Address) -> Result<Vec<(Timestamp, u64)>> {
        index::user_stakes(self.store.as_ref(), user)
    }

    /// A user's `limit` newest stakes
    pub fn user_stakes_recent(&self, user: &Address, limit: usize) -> Result<Vec<(Timestamp, u64)>> {
        index::user_stakes_recent(self.store.as_ref(), user, limit)
    }

    /// A user's stakes created in `[from, to]`
    pub fn user_stakes_between(
        &self,
        user: &Address,
        from: &Timestamp,
        to: &Timestamp,
    ) -> Result<Vec<(Timestamp, u64)>> {
        index::user_stakes_between(self.store.as_ref(), user, from, to)
    }

    /// Queue entries matured at `as_of`
    pub fn due(&self, as_of: &Timestamp) -> Result<Vec<QueueEntry>> {
        ExpiryQueue::due(self.store.as_ref(), as_of, None)
    }

    /// Running total of credits received by `address`
    pub fn earned_coins(&self, address: &Address) -> Result<Coins> {
        bank::earned_coins(self.store.as_ref(), address)
    }

    /// Earned coins of every user
    pub fn users_earnings(&self) -> Result<Vec<UserEarnedCoins>> {
        bank::users_earnings(self.store.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::TransactionFilter;
    use crate::store::MemoryStore;
    use crate::types::TransactionKind;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const BODY: &str = "This argument is long enough to pass validation.";

    struct ForfeitHalf;

    impl OutcomeResolver for ForfeitHalf {
        fn resolve(&self, stake: &Stake) -> Result<StakeOutcome> {
            Ok(StakeOutcome::Forfeit {
                amount: stake.amount.amount / 2,
            })
        }
    }

    struct Greedy;

    impl OutcomeResolver for Greedy {
        fn resolve(&self, stake: &Stake) -> Result<StakeOutcome> {
            Ok(StakeOutcome::Return {
                amount: stake.amount.amount + 1,
            })
        }
    }

    /// Fails `failures` times for one stake, then returns it in full
    struct Flaky {
        stake_id: u64,
        failures: AtomicUsize,
    }

    impl Flaky {
        fn new(stake_id: u64, failures: usize) -> Self {
            Self {
                stake_id,
                failures: AtomicUsize::new(failures),
            }
        }
    }

    impl OutcomeResolver for Flaky {
        fn resolve(&self, stake: &Stake) -> Result<StakeOutcome> {
            if stake.id == self.stake_id && self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "outcome source timed out",
                )));
            }
            ReturnInFull.resolve(stake)
        }
    }

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2019, 7, 1, 12, 0, 0).unwrap()
    }

    fn keeper_with<R: OutcomeResolver>(resolver: R) -> StakeKeeper<MemoryStore, ClaimSet, R> {
        StakeKeeper::new(
            Arc::new(MemoryStore::new()),
            ClaimSet::new([1, 2]),
            resolver,
            StakingParams::default(),
        )
        .unwrap()
    }

    fn fund<R: OutcomeResolver>(keeper: &mut StakeKeeper<MemoryStore, ClaimSet, R>, user: &Address, amount: u128) {
        let denom = keeper.params().stake_denom.clone();
        keeper
            .bank_mut()
            .credit(user, &Coin::new(denom, amount), TransactionKind::Registration, 0, &t0())
            .unwrap();
    }

    fn coin(amount: u128) -> Coin {
        Coin::new(crate::config::STAKE_DENOM, amount)
    }

    #[test]
    fn test_create_argument_validation() {
        let mut keeper = keeper_with(ReturnInFull);
        let author = Address::new("cosmos1author");

        assert!(matches!(
            keeper.create_argument(99, &author, BODY, &t0()),
            Err(Error::InvalidClaim(99))
        ));
        assert!(matches!(
            keeper.create_argument(1, &author, "too short", &t0()),
            Err(Error::InvalidArgumentBody(_))
        ));

        let id = keeper.create_argument(1, &author, BODY, &t0()).unwrap();
        assert_eq!(id, 1);
        assert_eq!(keeper.claim_arguments(1).unwrap(), vec![1]);
        assert_eq!(keeper.user_arguments(&author).unwrap(), vec![1]);
        assert_eq!(keeper.argument(1).unwrap().body, BODY);
    }

    #[test]
    fn test_create_stake_validation_order() {
        let mut keeper = keeper_with(ReturnInFull);
        let staker = Address::new("cosmos1staker");
        fund(&mut keeper, &staker, 50);

        assert!(matches!(
            keeper.create_stake(1, &staker, &coin(10), StakeType::Backing, None, &t0()),
            Err(Error::ArgumentNotFound(1))
        ));

        let arg = keeper
            .create_argument(1, &Address::new("cosmos1author"), BODY, &t0())
            .unwrap();

        assert!(matches!(
            keeper.create_stake(arg, &staker, &Coin::new("cred", 0), StakeType::Backing, None, &t0()),
            Err(Error::WrongDenomination { .. })
        ));
        assert!(matches!(
            keeper.create_stake(arg, &staker, &coin(0), StakeType::Backing, None, &t0()),
            Err(Error::ZeroStake)
        ));
        assert!(matches!(
            keeper.create_stake(arg, &staker, &coin(u128::MAX), StakeType::Backing, None, &t0()),
            Err(Error::StakeOutOfRange { .. })
        ));
        assert!(matches!(
            keeper.create_stake(
                arg,
                &staker,
                &coin(10),
                StakeType::Backing,
                Some(Duration::zero()),
                &t0()
            ),
            Err(Error::InvalidDuration(_))
        ));
        assert!(matches!(
            keeper.create_stake(arg, &staker, &coin(51), StakeType::Backing, None, &t0()),
            Err(Error::InsufficientFunds { .. })
        ));

        // Nothing leaked from the failed attempts
        assert!(keeper.stakes().unwrap().is_empty());
        assert!(keeper.argument_stakes(arg).unwrap().is_empty());
        assert!(keeper.due(&(t0() + Duration::days(30))).unwrap().is_empty());
        assert_eq!(keeper.bank().balance(&staker, crate::config::STAKE_DENOM).unwrap().amount, 50);

        let id = keeper
            .create_stake(arg, &staker, &coin(50), StakeType::Challenge, None, &t0())
            .unwrap();
        assert_eq!(id, 1);
        let stake = keeper.stake(id).unwrap();
        assert_eq!(stake.end_time, t0() + Duration::days(7));
        assert_eq!(keeper.metrics().stakes_created.get(), 1);
    }

    #[test]
    fn test_backing_then_drain_returns_funds() {
        let mut keeper = keeper_with(ReturnInFull);
        let (u1, u2) = (Address::new("cosmos1u1"), Address::new("cosmos1u2"));
        fund(&mut keeper, &u2, 1_000);

        let a1 = keeper.create_argument(1, &u1, BODY, &t0()).unwrap();
        let s1 = keeper
            .create_stake(a1, &u2, &coin(100), StakeType::Backing, Some(Duration::hours(1)), &t0())
            .unwrap();

        assert_eq!(keeper.argument_stakes(a1).unwrap(), vec![s1]);
        assert_eq!(keeper.user_stakes(&u2).unwrap(), vec![(t0(), s1)]);
        assert_eq!(keeper.bank().balance(&u2, crate::config::STAKE_DENOM).unwrap().amount, 900);

        let backing = keeper
            .bank()
            .transactions_by_address(&u2, &TransactionFilter::default().kinds([TransactionKind::Backing]))
            .unwrap();
        assert_eq!(backing.len(), 1);
        assert_eq!(backing[0].reference_id, a1);

        // Not matured yet
        assert_eq!(keeper.end_block(&(t0() + Duration::minutes(59))).unwrap(), 0);

        assert_eq!(keeper.end_block(&(t0() + Duration::hours(2))).unwrap(), 1);
        assert!(keeper.stake(s1).unwrap().expired);
        assert!(keeper.due(&(t0() + Duration::days(1))).unwrap().is_empty());
        assert_eq!(keeper.bank().balance(&u2, crate::config::STAKE_DENOM).unwrap().amount, 1_000);

        let returned = keeper
            .bank()
            .transactions_by_address(&u2, &TransactionFilter::default().limit(1))
            .unwrap();
        assert_eq!(returned[0].kind, TransactionKind::BackingReturned);
        assert_eq!(returned[0].reference_id, s1);
        assert_eq!(keeper.earned_coins(&u2).unwrap().amount_of(crate::config::STAKE_DENOM), 1_100);
    }

    #[test]
    fn test_forfeit_burns_part_of_stake() {
        let mut keeper = keeper_with(ForfeitHalf);
        let user = Address::new("cosmos1user");
        fund(&mut keeper, &user, 100);
        let arg = keeper.create_argument(2, &user, BODY, &t0()).unwrap();
        keeper
            .create_stake(arg, &user, &coin(40), StakeType::Upvote, Some(Duration::seconds(1)), &t0())
            .unwrap();

        assert_eq!(keeper.end_block(&(t0() + Duration::seconds(1))).unwrap(), 1);
        assert_eq!(keeper.bank().balance(&user, crate::config::STAKE_DENOM).unwrap().amount, 80);
        let last = keeper
            .bank()
            .transactions_by_address(&user, &TransactionFilter::default().limit(1))
            .unwrap();
        assert_eq!(last[0].kind, TransactionKind::UpvoteReturned);
        assert_eq!(last[0].amount.amount, 20);
    }

    #[test]
    fn test_resolver_cannot_mint() {
        let mut keeper = keeper_with(Greedy);
        let user = Address::new("cosmos1user");
        fund(&mut keeper, &user, 10);
        let arg = keeper.create_argument(1, &user, BODY, &t0()).unwrap();
        let id = keeper
            .create_stake(arg, &user, &coin(10), StakeType::Backing, Some(Duration::seconds(1)), &t0())
            .unwrap();

        let err = keeper.end_block(&(t0() + Duration::hours(1))).unwrap_err();
        assert!(err.is_fatal());
        assert!(!keeper.stake(id).unwrap().expired);
        assert_eq!(keeper.due(&(t0() + Duration::hours(1))).unwrap().len(), 1);
    }

    #[test]
    fn test_drain_is_paged() {
        let params = StakingParams {
            drain_page_size: 2,
            ..StakingParams::default()
        };
        let mut keeper = StakeKeeper::new(
            Arc::new(MemoryStore::new()),
            ClaimSet::new([1]),
            ReturnInFull,
            params,
        )
        .unwrap();
        let user = Address::new("cosmos1user");
        fund(&mut keeper, &user, 1_000);
        let arg = keeper.create_argument(1, &user, BODY, &t0()).unwrap();
        for minutes in [30, 10, 20, 40, 50] {
            keeper
                .create_stake(
                    arg,
                    &user,
                    &coin(10),
                    StakeType::Backing,
                    Some(Duration::minutes(minutes)),
                    &t0(),
                )
                .unwrap();
        }

        let later = t0() + Duration::hours(1);
        assert_eq!(keeper.end_block(&later).unwrap(), 2);
        // Earliest end times went first: stakes 2 (10m) and 3 (20m)
        assert!(keeper.stake(2).unwrap().expired);
        assert!(keeper.stake(3).unwrap().expired);
        assert!(!keeper.stake(1).unwrap().expired);

        assert_eq!(keeper.drain_all_expired(&later).unwrap(), 3);
        assert_eq!(keeper.metrics().stakes_expired.get(), 5);
        assert_eq!(keeper.metrics().active_stakes.get(), 0);
    }

    fn paged_keeper<R: OutcomeResolver>(resolver: R) -> StakeKeeper<MemoryStore, ClaimSet, R> {
        let params = StakingParams {
            drain_page_size: 2,
            ..StakingParams::default()
        };
        StakeKeeper::new(Arc::new(MemoryStore::new()), ClaimSet::new([1]), resolver, params)
            .unwrap()
    }

    fn stake_minutes<R: OutcomeResolver>(
        keeper: &mut StakeKeeper<MemoryStore, ClaimSet, R>,
        minutes: &[i64],
    ) {
        let user = Address::new("cosmos1user");
        fund(keeper, &user, 1_000);
        let arg = keeper.create_argument(1, &user, BODY, &t0()).unwrap();
        for &m in minutes {
            keeper
                .create_stake(arg, &user, &coin(10), StakeType::Backing, Some(Duration::minutes(m)), &t0())
                .unwrap();
        }
    }

    #[test]
    fn test_failed_settlement_does_not_block_queue() {
        let mut keeper = paged_keeper(Flaky::new(1, 1));
        stake_minutes(&mut keeper, &[10, 20, 30]);

        let later = t0() + Duration::hours(1);
        // Stake 1 fails and stays queued; 2 and 3 behind it still settle
        assert_eq!(keeper.end_block(&later).unwrap(), 2);
        assert!(!keeper.stake(1).unwrap().expired);
        assert!(keeper.stake(2).unwrap().expired);
        assert!(keeper.stake(3).unwrap().expired);
        let due: Vec<_> = keeper.due(&later).unwrap().iter().map(|e| e.stake_id).collect();
        assert_eq!(due, vec![1]);

        // Retried on the next block
        assert_eq!(keeper.end_block(&later).unwrap(), 1);
        assert!(keeper.stake(1).unwrap().expired);
        assert!(keeper.due(&later).unwrap().is_empty());
        assert_eq!(keeper.metrics().active_stakes.get(), 0);
    }

    #[test]
    fn test_persistent_failure_is_skipped_every_block() {
        let mut keeper = paged_keeper(Flaky::new(1, usize::MAX));
        stake_minutes(&mut keeper, &[10, 20, 30, 40]);

        let later = t0() + Duration::hours(1);
        assert_eq!(keeper.drain_all_expired(&later).unwrap(), 3);
        assert_eq!(keeper.end_block(&later).unwrap(), 0);
        let due: Vec<_> = keeper.due(&later).unwrap().iter().map(|e| e.stake_id).collect();
        assert_eq!(due, vec![1]);
        assert_eq!(keeper.metrics().active_stakes.get(), 1);
    }

    #[test]
    fn test_jailed_account_cannot_stake() {
        let staker = Address::new("cosmos1jailed");
        let mut keeper = keeper_with(ReturnInFull).with_accounts(JailSet::new([staker.clone()]));
        fund(&mut keeper, &staker, 100);
        let arg = keeper
            .create_argument(1, &Address::new("cosmos1author"), BODY, &t0())
            .unwrap();

        assert!(matches!(
            keeper.create_stake(arg, &staker, &coin(10), StakeType::Backing, None, &t0()),
            Err(Error::Jailed(_))
        ));
        assert!(keeper.stakes().unwrap().is_empty());
        assert_eq!(keeper.bank().balance(&staker, crate::config::STAKE_DENOM).unwrap().amount, 100);
        assert_eq!(keeper.claims().stakes(1), Some(ClaimStakes::default()));

        // Other accounts are unaffected
        let free = Address::new("cosmos1free");
        fund(&mut keeper, &free, 100);
        keeper
            .create_stake(arg, &free, &coin(10), StakeType::Backing, None, &t0())
            .unwrap();
    }

    #[test]
    fn test_stakes_update_claim_totals() {
        let mut keeper = keeper_with(ReturnInFull);
        let user = Address::new("cosmos1user");
        fund(&mut keeper, &user, 1_000);
        let backed = keeper.create_argument(1, &user, BODY, &t0()).unwrap();
        let challenged = keeper.create_argument(1, &user, BODY, &t0()).unwrap();
        let bare = keeper.create_argument(2, &user, BODY, &t0()).unwrap();

        keeper
            .create_stake(backed, &user, &coin(100), StakeType::Backing, None, &t0())
            .unwrap();
        keeper
            .create_stake(challenged, &user, &coin(30), StakeType::Challenge, None, &t0())
            .unwrap();
        // Upvotes count towards the side of the argument they upvote
        keeper
            .create_stake(backed, &user, &coin(5), StakeType::Upvote, None, &t0())
            .unwrap();
        keeper
            .create_stake(challenged, &user, &coin(7), StakeType::Upvote, None, &t0())
            .unwrap();
        keeper
            .create_stake(bare, &user, &coin(9), StakeType::Upvote, None, &t0())
            .unwrap();

        assert_eq!(
            keeper.claims().stakes(1),
            Some(ClaimStakes {
                backing: 105,
                challenge: 37
            })
        );
        assert_eq!(keeper.claims().stakes(2), Some(ClaimStakes::default()));

        // A failed stake leaves the totals alone
        assert!(keeper
            .create_stake(backed, &user, &coin(10_000), StakeType::Backing, None, &t0())
            .is_err());
        assert_eq!(keeper.claims().stakes(1).map(|s| s.backing), Some(105));
    }

    #[test]
    fn test_params_bound_to_store() {
        let store = Arc::new(MemoryStore::new());
        StakeKeeper::new(Arc::clone(&store), ClaimSet::new([1]), ReturnInFull, StakingParams::default())
            .unwrap();
        assert_eq!(
            records::params(store.as_ref()).unwrap(),
            Some(StakingParams::default())
        );

        let changed = StakingParams {
            min_stake_amount: 5,
            ..StakingParams::default()
        };
        assert!(matches!(
            StakeKeeper::new(Arc::clone(&store), ClaimSet::new([1]), ReturnInFull, changed),
            Err(Error::Config(_))
        ));
        StakeKeeper::new(store, ClaimSet::new([1]), ReturnInFull, StakingParams::default()).unwrap();
    }
}
