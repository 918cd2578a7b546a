//! Genesis import and export
//!
//! A genesis file is a full JSON snapshot of the keeper's entities. Import
//! rebuilds every index and queue entry the same way live operations do and
//! moves the ID counters past the highest imported ID.

use crate::bank;
use crate::config::StakingParams;
use crate::ids::{IdAllocator, IdKind, FIRST_ID};
use crate::index;
use crate::keeper::{ClaimRegistry, OutcomeResolver, StakeKeeper};
use crate::queue::ExpiryQueue;
use crate::records;
use crate::store::{KeyValueStore, WriteTxn};
use crate::types::{AccountBalance, Argument, Stake, Transaction, UserEarnedCoins};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Full keeper snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisState {
    /// Staking parameters the snapshot was taken under
    pub params: StakingParams,
    /// Arguments
    pub arguments: Vec<Argument>,
    /// Stakes, expired or not
    pub stakes: Vec<Stake>,
    /// Earned-coins aggregates
    pub users_earnings: Vec<UserEarnedCoins>,
    /// Non-zero balances
    pub balances: Vec<AccountBalance>,
    /// Ledger history
    pub transactions: Vec<Transaction>,
}

impl GenesisState {
    /// Read a JSON genesis file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Write as pretty-printed JSON
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Structural checks run before import
pub fn validate_genesis(genesis: &GenesisState) -> Result<()> {
    genesis.params.validate()?;

    let argument_ids: BTreeSet<u64> = genesis.arguments.iter().map(|a| a.id).collect();
    if argument_ids.len() != genesis.arguments.len() {
        return Err(Error::DuplicateId("argument in genesis".into()));
    }

    let mut stake_ids = BTreeSet::new();
    for stake in &genesis.stakes {
        if !stake_ids.insert(stake.id) {
            return Err(Error::DuplicateId(format!("stake {} in genesis", stake.id)));
        }
        if stake.amount.denom != genesis.params.stake_denom {
            return Err(Error::WrongDenomination {
                expected: genesis.params.stake_denom.clone(),
                actual: stake.amount.denom.clone(),
            });
        }
        if stake.end_time <= stake.created_time {
            return Err(Error::InvalidDuration(format!(
                "stake {} ends at {} before it starts at {}",
                stake.id, stake.end_time, stake.created_time
            )));
        }
        if !argument_ids.contains(&stake.argument_id) {
            return Err(Error::ArgumentNotFound(stake.argument_id));
        }
    }

    let mut accounts = BTreeSet::new();
    for balance in &genesis.balances {
        if !accounts.insert((&balance.address, balance.coin.denom.as_str())) {
            return Err(Error::InvariantViolation(format!(
                "duplicate {} balance for {} in genesis",
                balance.coin.denom, balance.address
            )));
        }
    }

    Ok(())
}

fn next_after(ids: impl Iterator<Item = u64>) -> Result<u64> {
    match ids.max() {
        Some(max) => max
            .checked_add(1)
            .ok_or_else(|| Error::InvariantViolation("imported ID space exhausted".into())),
        None => Ok(FIRST_ID),
    }
}

impl<S: KeyValueStore, C: ClaimRegistry, R: OutcomeResolver> StakeKeeper<S, C, R> {
    /// Import `genesis` into an empty store as one atomic batch
    pub fn load_state(&mut self, genesis: &GenesisState) -> Result<()> {
        validate_genesis(genesis)?;
        if genesis.params != self.params {
            return Err(Error::Config(
                "genesis params differ from the keeper's params".into(),
            ));
        }
        if IdAllocator::initialized(self.store.as_ref())? {
            return Err(Error::InvariantViolation(
                "genesis import into an initialized store".into(),
            ));
        }

        let mut txn = WriteTxn::new(self.store.as_ref());
        records::stage_params(&mut txn, &genesis.params)?;

        for argument in &genesis.arguments {
            records::insert_argument(&mut txn, argument)?;
            index::index_argument(&mut txn, argument)?;
        }

        let mut scheduled = 0;
        for stake in &genesis.stakes {
            records::insert_stake(&mut txn, stake)?;
            index::index_stake(&mut txn, stake)?;
            // Expired stakes were settled before the snapshot
            if !stake.expired {
                ExpiryQueue::schedule(&mut txn, stake.id, &stake.end_time)?;
                scheduled += 1;
            }
        }

        for earned in &genesis.users_earnings {
            bank::stage_import_earned_coins(&mut txn, earned)?;
        }
        for balance in &genesis.balances {
            bank::stage_import_balance(&mut txn, balance)?;
        }
        for tx in &genesis.transactions {
            bank::stage_import_transaction(&mut txn, tx)?;
        }

        IdAllocator::set(
            &mut txn,
            IdKind::Argument,
            next_after(genesis.arguments.iter().map(|a| a.id))?,
        );
        IdAllocator::set(
            &mut txn,
            IdKind::Stake,
            next_after(genesis.stakes.iter().map(|s| s.id))?,
        );
        IdAllocator::set(
            &mut txn,
            IdKind::Transaction,
            next_after(genesis.transactions.iter().map(|t| t.id))?,
        );

        txn.commit()?;
        self.metrics.set_active_stakes(scheduled);

        tracing::info!(
            arguments = genesis.arguments.len(),
            stakes = genesis.stakes.len(),
            scheduled,
            transactions = genesis.transactions.len(),
            "Genesis state loaded"
        );
        Ok(())
    }

    /// Snapshot of every entity
    pub fn dump_state(&self) -> Result<GenesisState> {
        let store = self.store.as_ref();
        Ok(GenesisState {
            params: self.params.clone(),
            arguments: records::arguments(store)?,
            stakes: records::stakes(store)?,
            users_earnings: bank::users_earnings(store)?,
            balances: bank::all_balances(store)?,
            transactions: bank::transactions(store)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::STAKE_DENOM;
    use crate::keeper::{ClaimSet, ReturnInFull};
    use crate::store::MemoryStore;
    use crate::types::{Address, Coin, StakeType, TransactionKind};
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Arc;

    const BODY: &str = "Genesis arguments need a long enough body too.";

    fn keeper() -> StakeKeeper<MemoryStore> {
        StakeKeeper::new(
            Arc::new(MemoryStore::new()),
            ClaimSet::new([1]),
            ReturnInFull,
            StakingParams::default(),
        )
        .unwrap()
    }

    fn populated() -> StakeKeeper<MemoryStore> {
        let t0 = Utc.with_ymd_and_hms(2019, 7, 1, 0, 0, 0).unwrap();
        let mut keeper = keeper();
        let user = Address::new("cosmos1user");
        keeper
            .bank_mut()
            .credit(&user, &Coin::new(STAKE_DENOM, 500), TransactionKind::Registration, 0, &t0)
            .unwrap();
        let arg = keeper.create_argument(1, &user, BODY, &t0).unwrap();
        keeper
            .create_stake(arg, &user, &Coin::new(STAKE_DENOM, 100), StakeType::Backing, Some(Duration::hours(1)), &t0)
            .unwrap();
        keeper
            .create_stake(arg, &user, &Coin::new(STAKE_DENOM, 50), StakeType::Upvote, Some(Duration::days(3)), &t0)
            .unwrap();
        keeper.end_block(&(t0 + Duration::hours(2))).unwrap();
        keeper
    }

    #[test]
    fn test_round_trip() {
        let source = populated();
        let dump = source.dump_state().unwrap();
        assert_eq!(dump.stakes.len(), 2);
        assert!(dump.stakes[0].expired);

        let mut target = keeper();
        target.load_state(&dump).unwrap();
        assert_eq!(target.dump_state().unwrap(), dump);

        // Only the live stake is back in the queue
        let far = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let due: Vec<_> = target.due(&far).unwrap().iter().map(|e| e.stake_id).collect();
        assert_eq!(due, vec![2]);
        assert_eq!(target.metrics().active_stakes.get(), 1);
    }

    #[test]
    fn test_counters_continue_after_import() {
        let dump = populated().dump_state().unwrap();
        let mut target = keeper();
        target.load_state(&dump).unwrap();

        let now = Utc.with_ymd_and_hms(2019, 8, 1, 0, 0, 0).unwrap();
        let user = Address::new("cosmos1user");
        assert_eq!(target.create_argument(1, &user, BODY, &now).unwrap(), 2);
        assert_eq!(
            target
                .create_stake(1, &user, &Coin::new(STAKE_DENOM, 1), StakeType::Challenge, None, &now)
                .unwrap(),
            3
        );
        let last = dump.transactions.last().unwrap().id;
        let tx = target.bank().transaction(last + 1).unwrap();
        assert_eq!(tx.kind, TransactionKind::Challenge);
    }

    #[test]
    fn test_import_rejected_on_initialized_store() {
        let mut source = populated();
        let dump = source.dump_state().unwrap();
        assert!(source.load_state(&dump).unwrap_err().is_fatal());
    }

    #[test]
    fn test_validate_genesis() {
        let mut dump = populated().dump_state().unwrap();
        validate_genesis(&dump).unwrap();

        dump.stakes[1].amount = Coin::new("cred", 50);
        assert!(matches!(
            validate_genesis(&dump),
            Err(Error::WrongDenomination { .. })
        ));

        let mut dump = populated().dump_state().unwrap();
        dump.stakes[0].argument_id = 42;
        assert!(matches!(validate_genesis(&dump), Err(Error::ArgumentNotFound(42))));

        let mut dump = populated().dump_state().unwrap();
        dump.stakes[1].end_time = dump.stakes[1].created_time;
        assert!(matches!(validate_genesis(&dump), Err(Error::InvalidDuration(_))));
    }

    #[test]
    fn test_duplicate_balance_rejected() {
        let mut dump = populated().dump_state().unwrap();
        let mut twin = dump.balances[0].clone();
        twin.coin.amount += 1;
        dump.balances.push(twin);
        assert!(matches!(
            validate_genesis(&dump),
            Err(Error::InvariantViolation(_))
        ));

        // Same address in another denomination is fine
        let mut other = dump.balances[0].clone();
        other.coin.denom = "cred".into();
        dump.balances.pop();
        dump.balances.push(other);
        validate_genesis(&dump).unwrap();
    }

    #[test]
    fn test_unsorted_earnings_are_normalised() {
        let mut dump = populated().dump_state().unwrap();
        let mut json = serde_json::to_value(&dump).unwrap();
        json["users_earnings"][0]["coins"] = serde_json::json!([
            {"denom": STAKE_DENOM, "amount": 7},
            {"denom": "cred", "amount": 3},
            {"denom": STAKE_DENOM, "amount": 1}
        ]);
        dump = serde_json::from_value(json).unwrap();

        let mut target = keeper();
        target.load_state(&dump).unwrap();
        let user = dump.users_earnings[0].address.clone();
        let earned = target.earned_coins(&user).unwrap();
        let denoms: Vec<_> = earned.iter().map(|c| c.denom.as_str()).collect();
        assert_eq!(denoms, vec!["cred", STAKE_DENOM]);
        assert_eq!(earned.amount_of(STAKE_DENOM), 8);
    }

    #[test]
    fn test_json_file_round_trip() {
        let dump = populated().dump_state().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genesis.json");
        dump.to_file(&path).unwrap();
        assert_eq!(GenesisState::from_file(&path).unwrap(), dump);
    }
}
