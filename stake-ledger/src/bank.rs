//! Append-only, typed transaction ledger
//!
//! Every balance change goes through [`stage_credit`] or [`stage_debit`],
//! which check the kind's direction capability, move the balance, append an
//! immutable [`Transaction`] and (for credits) bump the user's earned-coins
//! aggregate, all in the caller's [`WriteTxn`]. [`Bank`] wraps those in
//! single-operation transactions for callers outside the keeper.
//!
//! # Invariants
//!
//! - A kind that is not credit-capable never increases a balance
//! - A kind that is not debit-capable never decreases a balance
//! - Σ credits - Σ debits == Σ balances - Σ initial balances
//! - Transactions are never modified or deleted

use crate::ids::IdAllocator;
use crate::keys::{
    balance_key, balances_prefix, decode_balance_key, decode_earned_coins_key, earned_coins_key,
    trailing_id, transaction_key, user_transaction_key, user_transactions_prefix, KeyPrefix,
};
use crate::metrics::Metrics;
use crate::store::{decode, KeyValueStore, ScanOrder, ScanRange, WriteTxn};
use crate::types::{
    AccountBalance, Address, Coin, Coins, Direction, Timestamp, Transaction, TransactionKind,
    UserEarnedCoins,
};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result ordering for transaction queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Highest transaction ID first
    #[default]
    NewestFirst,
    /// Lowest transaction ID first
    OldestFirst,
}

/// Filter for [`transactions_by_address`]
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    /// Accepted kinds; empty accepts every kind
    pub kinds: Vec<TransactionKind>,
    /// Inclusive lower bound on creation time
    pub since: Option<Timestamp>,
    /// Inclusive upper bound on creation time
    pub until: Option<Timestamp>,
    /// Result order
    pub order: SortOrder,
    /// Matching transactions to skip
    pub offset: usize,
    /// Maximum number of results
    pub limit: Option<usize>,
}

impl TransactionFilter {
    /// Only these kinds
    pub fn kinds(mut self, kinds: impl IntoIterator<Item = TransactionKind>) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    /// Created at or after `t`
    pub fn since(mut self, t: Timestamp) -> Self {
        self.since = Some(t);
        self
    }

    /// Created at or before `t`
    pub fn until(mut self, t: Timestamp) -> Self {
        self.until = Some(t);
        self
    }

    /// Oldest first
    pub fn oldest_first(mut self) -> Self {
        self.order = SortOrder::OldestFirst;
        self
    }

    /// Skip the first `n` matches
    pub fn offset(mut self, n: usize) -> Self {
        self.offset = n;
        self
    }

    /// Return at most `n` matches
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    fn matches(&self, tx: &Transaction) -> bool {
        (self.kinds.is_empty() || self.kinds.contains(&tx.kind))
            && self.since.map_or(true, |t| tx.created_time >= t)
            && self.until.map_or(true, |t| tx.created_time <= t)
    }
}

fn decode_balance(bytes: &[u8]) -> Result<u128> {
    let raw: [u8; 16] = bytes
        .try_into()
        .map_err(|_| Error::InvariantViolation(format!("balance has {} bytes", bytes.len())))?;
    Ok(u128::from_be_bytes(raw))
}

fn staged_balance<S: KeyValueStore + ?Sized>(
    txn: &WriteTxn<'_, S>,
    address: &Address,
    denom: &str,
) -> Result<u128> {
    match txn.get(&balance_key(address, denom)?)? {
        Some(bytes) => decode_balance(&bytes),
        None => Ok(0),
    }
}

fn put_balance<S: KeyValueStore + ?Sized>(
    txn: &mut WriteTxn<'_, S>,
    address: &Address,
    coin: &Coin,
) -> Result<()> {
    let key = balance_key(address, &coin.denom)?;
    if coin.is_zero() {
        txn.delete(key);
    } else {
        txn.put(key, coin.amount.to_be_bytes().to_vec());
    }
    Ok(())
}

fn append_transaction<S: KeyValueStore + ?Sized>(
    txn: &mut WriteTxn<'_, S>,
    address: &Address,
    amount: &Coin,
    kind: TransactionKind,
    reference_id: u64,
    now: &Timestamp,
) -> Result<Transaction> {
    let tx = Transaction {
        id: IdAllocator::next_transaction_id(txn)?,
        kind,
        app_account_address: address.clone(),
        reference_id,
        amount: amount.clone(),
        created_time: *now,
    };
    insert_transaction(txn, &tx)?;
    Ok(tx)
}

fn insert_transaction<S: KeyValueStore + ?Sized>(
    txn: &mut WriteTxn<'_, S>,
    tx: &Transaction,
) -> Result<()> {
    let key = transaction_key(tx.id);
    if txn.contains(&key)? {
        return Err(Error::DuplicateId(format!("transaction {}", tx.id)));
    }
    txn.put_record(key, tx)?;
    txn.put_marker(user_transaction_key(&tx.app_account_address, tx.id)?);
    Ok(())
}

/// Stage a balance increase; `kind` must be credit-capable
pub fn stage_credit<S: KeyValueStore + ?Sized>(
    txn: &mut WriteTxn<'_, S>,
    address: &Address,
    amount: &Coin,
    kind: TransactionKind,
    reference_id: u64,
    now: &Timestamp,
) -> Result<Transaction> {
    if !kind.allows_credit() {
        return Err(Error::IllegalCreditKind(kind.to_string()));
    }

    let current = Coin::new(amount.denom.clone(), staged_balance(txn, address, &amount.denom)?);
    put_balance(txn, address, &current.checked_add(amount)?)?;

    let tx = append_transaction(txn, address, amount, kind, reference_id, now)?;

    let earned_key = earned_coins_key(address)?;
    let mut earned: Coins = txn.get_record(&earned_key)?.unwrap_or_default();
    earned.add(amount)?;
    txn.put_record(earned_key, &earned)?;

    tracing::debug!(
        tx_id = tx.id,
        address = %address,
        amount = %amount,
        kind = %kind,
        reference_id,
        "Credit staged"
    );
    Ok(tx)
}

/// Stage a balance decrease; `kind` must be debit-capable
pub fn stage_debit<S: KeyValueStore + ?Sized>(
    txn: &mut WriteTxn<'_, S>,
    address: &Address,
    amount: &Coin,
    kind: TransactionKind,
    reference_id: u64,
    now: &Timestamp,
) -> Result<Transaction> {
    if !kind.allows_debit() {
        return Err(Error::IllegalDebitKind(kind.to_string()));
    }

    let current = Coin::new(amount.denom.clone(), staged_balance(txn, address, &amount.denom)?);
    put_balance(txn, address, &current.checked_sub(amount)?)?;

    let tx = append_transaction(txn, address, amount, kind, reference_id, now)?;

    tracing::debug!(
        tx_id = tx.id,
        address = %address,
        amount = %amount,
        kind = %kind,
        reference_id,
        "Debit staged"
    );
    Ok(tx)
}

/// Stage a mutation in the direction `kind` is tagged with
pub fn stage_record<S: KeyValueStore + ?Sized>(
    txn: &mut WriteTxn<'_, S>,
    address: &Address,
    amount: &Coin,
    kind: TransactionKind,
    reference_id: u64,
    now: &Timestamp,
) -> Result<Transaction> {
    match kind.direction() {
        Direction::Credit => stage_credit(txn, address, amount, kind, reference_id, now),
        Direction::Debit => stage_debit(txn, address, amount, kind, reference_id, now),
    }
}

/// Stage a balance without a transaction (genesis import)
pub fn stage_import_balance<S: KeyValueStore + ?Sized>(
    txn: &mut WriteTxn<'_, S>,
    balance: &AccountBalance,
) -> Result<()> {
    put_balance(txn, &balance.address, &balance.coin)
}

/// Stage an existing transaction (genesis import)
pub fn stage_import_transaction<S: KeyValueStore + ?Sized>(
    txn: &mut WriteTxn<'_, S>,
    tx: &Transaction,
) -> Result<()> {
    insert_transaction(txn, tx)
}

/// Stage earned coins of a user (genesis import)
pub fn stage_import_earned_coins<S: KeyValueStore + ?Sized>(
    txn: &mut WriteTxn<'_, S>,
    earned: &UserEarnedCoins,
) -> Result<()> {
    txn.put_record(earned_coins_key(&earned.address)?, &earned.coins)
}

/// Balance of `address` in `denom`
pub fn balance<S: KeyValueStore + ?Sized>(store: &S, address: &Address, denom: &str) -> Result<Coin> {
    let amount = match store.get(&balance_key(address, denom)?)? {
        Some(bytes) => decode_balance(&bytes)?,
        None => 0,
    };
    Ok(Coin::new(denom, amount))
}

/// Every non-zero balance of `address`
pub fn balances<S: KeyValueStore + ?Sized>(store: &S, address: &Address) -> Result<Coins> {
    let mut coins = Coins::new();
    for (key, value) in store.prefix_scan(&balances_prefix(address)?)? {
        let (_, denom) = decode_balance_key(&key)?;
        coins.add(&Coin::new(denom, decode_balance(&value)?))?;
    }
    Ok(coins)
}

/// Every non-zero balance in the store, ordered by user then denom
pub fn all_balances<S: KeyValueStore + ?Sized>(store: &S) -> Result<Vec<AccountBalance>> {
    store
        .prefix_scan(&KeyPrefix::Balances.key())?
        .iter()
        .map(|(key, value)| {
            let (address, denom) = decode_balance_key(key)?;
            Ok(AccountBalance {
                address,
                coin: Coin::new(denom, decode_balance(value)?),
            })
        })
        .collect()
}

/// Transaction by ID
pub fn transaction<S: KeyValueStore + ?Sized>(store: &S, id: u64) -> Result<Transaction> {
    let bytes = store
        .get(&transaction_key(id))?
        .ok_or(Error::TransactionNotFound(id))?;
    decode(&bytes)
}

/// Every transaction, ascending by ID
pub fn transactions<S: KeyValueStore + ?Sized>(store: &S) -> Result<Vec<Transaction>> {
    store
        .prefix_scan(&KeyPrefix::Transactions.key())?
        .iter()
        .map(|(_, value)| decode(value))
        .collect()
}

/// Transactions touching `address`, filtered
pub fn transactions_by_address<S: KeyValueStore + ?Sized>(
    store: &S,
    address: &Address,
    filter: &TransactionFilter,
) -> Result<Vec<Transaction>> {
    let order = match filter.order {
        SortOrder::NewestFirst => ScanOrder::Descending,
        SortOrder::OldestFirst => ScanOrder::Ascending,
    };
    let range = ScanRange::prefix(&user_transactions_prefix(address)?);
    let limit = filter.limit.unwrap_or(usize::MAX);

    let mut out = Vec::new();
    let mut skipped = 0;
    for (key, _) in store.scan(&range, order, None)? {
        if out.len() >= limit {
            break;
        }
        let tx = transaction(store, trailing_id(&key)?)?;
        if !filter.matches(&tx) {
            continue;
        }
        if skipped < filter.offset {
            skipped += 1;
            continue;
        }
        out.push(tx);
    }
    Ok(out)
}

/// Running total of credits received by `address`
pub fn earned_coins<S: KeyValueStore + ?Sized>(store: &S, address: &Address) -> Result<Coins> {
    match store.get(&earned_coins_key(address)?)? {
        Some(bytes) => decode(&bytes),
        None => Ok(Coins::new()),
    }
}

/// Earned coins of every user, ordered by key
pub fn users_earnings<S: KeyValueStore + ?Sized>(store: &S) -> Result<Vec<UserEarnedCoins>> {
    store
        .prefix_scan(&KeyPrefix::EarnedCoins.key())?
        .iter()
        .map(|(key, value)| {
            Ok(UserEarnedCoins {
                address: decode_earned_coins_key(key)?,
                coins: decode(value)?,
            })
        })
        .collect()
}

/// Ledger facade committing one mutation per call
pub struct Bank<S: KeyValueStore> {
    store: Arc<S>,
    metrics: Metrics,
}

impl<S: KeyValueStore> Bank<S> {
    /// Bank over `store`
    pub fn new(store: Arc<S>, metrics: Metrics) -> Self {
        Self { store, metrics }
    }

    /// Record a mutation in the direction `kind` is tagged with
    pub fn record(
        &mut self,
        address: &Address,
        amount: &Coin,
        kind: TransactionKind,
        reference_id: u64,
        now: &Timestamp,
    ) -> Result<Transaction> {
        self.commit_one(|txn| stage_record(txn, address, amount, kind, reference_id, now))
    }

    /// Increase a balance (`AddCoin`)
    pub fn credit(
        &mut self,
        address: &Address,
        amount: &Coin,
        kind: TransactionKind,
        reference_id: u64,
        now: &Timestamp,
    ) -> Result<Transaction> {
        self.commit_one(|txn| stage_credit(txn, address, amount, kind, reference_id, now))
    }

    /// Decrease a balance (`SubtractCoin`)
    pub fn debit(
        &mut self,
        address: &Address,
        amount: &Coin,
        kind: TransactionKind,
        reference_id: u64,
        now: &Timestamp,
    ) -> Result<Transaction> {
        self.commit_one(|txn| stage_debit(txn, address, amount, kind, reference_id, now))
    }

    fn commit_one(
        &mut self,
        stage: impl FnOnce(&mut WriteTxn<'_, S>) -> Result<Transaction>,
    ) -> Result<Transaction> {
        let mut txn = WriteTxn::new(self.store.as_ref());
        let tx = stage(&mut txn)?;
        txn.commit()?;
        self.metrics.record_transactions(1);
        Ok(tx)
    }

    /// Balance in one denomination
    pub fn balance(&self, address: &Address, denom: &str) -> Result<Coin> {
        balance(self.store.as_ref(), address, denom)
    }

    /// All balances of an address
    pub fn balances(&self, address: &Address) -> Result<Coins> {
        balances(self.store.as_ref(), address)
    }

    /// Transaction by ID
    pub fn transaction(&self, id: u64) -> Result<Transaction> {
        transaction(self.store.as_ref(), id)
    }

    /// Filtered transactions of an address
    pub fn transactions_by_address(
        &self,
        address: &Address,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>> {
        transactions_by_address(self.store.as_ref(), address, filter)
    }

    /// Earned coins of an address
    pub fn earned_coins(&self, address: &Address) -> Result<Coins> {
        earned_coins(self.store.as_ref(), address)
    }

    /// Check money conservation over the full history.
    ///
    /// `initial` are balances that existed before the first transaction
    /// (genesis grants without a transaction record).
    pub fn check_conservation(&self, initial: &[AccountBalance]) -> Result<bool> {
        let store = self.store.as_ref();
        let mut inflow = Totals::default();
        let mut outflow = Totals::default();
        for tx in transactions(store)? {
            match tx.kind.direction() {
                Direction::Credit => inflow.add(&tx.amount)?,
                Direction::Debit => outflow.add(&tx.amount)?,
            }
        }
        for balance in initial {
            inflow.add(&balance.coin)?;
        }
        for balance in all_balances(store)? {
            outflow.add(&balance.coin)?;
        }
        Ok(inflow == outflow)
    }
}

/// Per-denom sums of u128 amounts, `(carries, low)`, so that the ledger-wide
/// total of a denom may exceed `u128::MAX`. Zero totals are never stored.
#[derive(Debug, Default, PartialEq, Eq)]
struct Totals(BTreeMap<String, (u64, u128)>);

impl Totals {
    fn add(&mut self, coin: &Coin) -> Result<()> {
        if coin.is_zero() {
            return Ok(());
        }
        let (carries, low) = self.0.entry(coin.denom.clone()).or_default();
        let (sum, wrapped) = low.overflowing_add(coin.amount);
        *low = sum;
        if wrapped {
            *carries = carries
                .checked_add(1)
                .ok_or_else(|| Error::Overflow(format!("{} ledger total", coin.denom)))?;
        }
        Ok(())
    }
}
