//! Primary records: arguments and stakes keyed by ID, plus the staking
//! parameters the ledger was initialised with

use crate::config::StakingParams;
use crate::keys::{argument_key, stake_key, KeyPrefix};
use crate::store::{decode, KeyValueStore, WriteTxn};
use crate::types::{Argument, Stake};
use crate::{Error, Result};

/// Stage a new argument; fails if the ID is already taken
pub fn insert_argument<S: KeyValueStore + ?Sized>(
    txn: &mut WriteTxn<'_, S>,
    argument: &Argument,
) -> Result<()> {
    let key = argument_key(argument.id);
    if txn.contains(&key)? {
        return Err(Error::DuplicateId(format!("argument {}", argument.id)));
    }
    txn.put_record(key, argument)
}

/// Stage a new stake; fails if the ID is already taken
pub fn insert_stake<S: KeyValueStore + ?Sized>(
    txn: &mut WriteTxn<'_, S>,
    stake: &Stake,
) -> Result<()> {
    let key = stake_key(stake.id);
    if txn.contains(&key)? {
        return Err(Error::DuplicateId(format!("stake {}", stake.id)));
    }
    txn.put_record(key, stake)
}

/// Stage an update of an existing stake
pub fn update_stake<S: KeyValueStore + ?Sized>(
    txn: &mut WriteTxn<'_, S>,
    stake: &Stake,
) -> Result<()> {
    txn.put_record(stake_key(stake.id), stake)
}

/// Argument by ID
pub fn argument<S: KeyValueStore + ?Sized>(store: &S, id: u64) -> Result<Argument> {
    let bytes = store
        .get(&argument_key(id))?
        .ok_or(Error::ArgumentNotFound(id))?;
    decode(&bytes)
}

/// Stake by ID
pub fn stake<S: KeyValueStore + ?Sized>(store: &S, id: u64) -> Result<Stake> {
    let bytes = store.get(&stake_key(id))?.ok_or(Error::StakeNotFound(id))?;
    decode(&bytes)
}

/// Stake by ID, reading staged writes
pub fn stake_in<S: KeyValueStore + ?Sized>(txn: &WriteTxn<'_, S>, id: u64) -> Result<Stake> {
    txn.get_record(&stake_key(id))?
        .ok_or(Error::StakeNotFound(id))
}

/// Every argument, ascending by ID
pub fn arguments<S: KeyValueStore + ?Sized>(store: &S) -> Result<Vec<Argument>> {
    store
        .prefix_scan(&KeyPrefix::Arguments.key())?
        .iter()
        .map(|(_, value)| decode(value))
        .collect()
}

/// Every stake, ascending by ID
pub fn stakes<S: KeyValueStore + ?Sized>(store: &S) -> Result<Vec<Stake>> {
    store
        .prefix_scan(&KeyPrefix::Stakes.key())?
        .iter()
        .map(|(_, value)| decode(value))
        .collect()
}

/// Staking parameters stored with the ledger, if any
pub fn params<S: KeyValueStore + ?Sized>(store: &S) -> Result<Option<StakingParams>> {
    store
        .get(&KeyPrefix::Params.key())?
        .map(|bytes| decode(&bytes))
        .transpose()
}

/// Stage the staking parameters
pub fn stage_params<S: KeyValueStore + ?Sized>(
    txn: &mut WriteTxn<'_, S>,
    params: &StakingParams,
) -> Result<()> {
    txn.put_record(KeyPrefix::Params.key(), params)
}
