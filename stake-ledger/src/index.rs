//! Secondary indices
//!
//! Marker tables (empty values) recovered by prefix or range scans:
//!
//! - claim -> arguments
//! - argument -> stakes
//! - user -> arguments
//! - user -> stakes, ordered by creation time then stake ID
//!
//! Entries are written in the same [`WriteTxn`] as the primary record and are
//! never deleted on their own.

use crate::keys::{
    argument_stake_key, argument_stakes_prefix, claim_argument_key, claim_arguments_prefix,
    decode_user_stake_key, trailing_id, user_argument_key, user_arguments_prefix,
    user_stake_key, user_stakes_prefix, user_stakes_time_prefix,
};
use crate::store::{KeyValueStore, ScanOrder, ScanRange, WriteTxn};
use crate::types::{Address, Argument, Stake, Timestamp};
use crate::Result;

/// Stage the claim and user entries of a new argument
pub fn index_argument<S: KeyValueStore + ?Sized>(
    txn: &mut WriteTxn<'_, S>,
    argument: &Argument,
) -> Result<()> {
    txn.put_marker(claim_argument_key(argument.claim_id, argument.id));
    txn.put_marker(user_argument_key(&argument.creator, argument.id)?);
    Ok(())
}

/// Stage the argument and user entries of a new stake
pub fn index_stake<S: KeyValueStore + ?Sized>(
    txn: &mut WriteTxn<'_, S>,
    stake: &Stake,
) -> Result<()> {
    txn.put_marker(argument_stake_key(stake.argument_id, stake.id));
    txn.put_marker(user_stake_key(&stake.creator, &stake.created_time, stake.id)?);
    Ok(())
}

fn member_ids<S: KeyValueStore + ?Sized>(store: &S, prefix: &[u8]) -> Result<Vec<u64>> {
    store
        .prefix_scan(prefix)?
        .iter()
        .map(|(key, _)| trailing_id(key))
        .collect()
}

/// Arguments of a claim, ascending by ID
pub fn claim_arguments<S: KeyValueStore + ?Sized>(store: &S, claim_id: u64) -> Result<Vec<u64>> {
    member_ids(store, &claim_arguments_prefix(claim_id))
}

/// Stakes on an argument, ascending by ID
pub fn argument_stakes<S: KeyValueStore + ?Sized>(
    store: &S,
    argument_id: u64,
) -> Result<Vec<u64>> {
    member_ids(store, &argument_stakes_prefix(argument_id))
}

/// Arguments written by a user, ascending by ID
pub fn user_arguments<S: KeyValueStore + ?Sized>(store: &S, user: &Address) -> Result<Vec<u64>> {
    member_ids(store, &user_arguments_prefix(user)?)
}

fn user_stake_entries<S: KeyValueStore + ?Sized>(
    store: &S,
    range: &ScanRange,
    order: ScanOrder,
    limit: Option<usize>,
) -> Result<Vec<(Timestamp, u64)>> {
    store
        .scan(range, order, limit)?
        .iter()
        .map(|(key, _)| decode_user_stake_key(key))
        .collect()
}

/// Stakes of a user, oldest first
pub fn user_stakes<S: KeyValueStore + ?Sized>(
    store: &S,
    user: &Address,
) -> Result<Vec<(Timestamp, u64)>> {
    let range = ScanRange::prefix(&user_stakes_prefix(user)?);
    user_stake_entries(store, &range, ScanOrder::Ascending, None)
}

/// The `limit` most recent stakes of a user, newest first
pub fn user_stakes_recent<S: KeyValueStore + ?Sized>(
    store: &S,
    user: &Address,
    limit: usize,
) -> Result<Vec<(Timestamp, u64)>> {
    let range = ScanRange::prefix(&user_stakes_prefix(user)?);
    user_stake_entries(store, &range, ScanOrder::Descending, Some(limit))
}

/// Stakes of a user created in `[from, to]`, oldest first
pub fn user_stakes_between<S: KeyValueStore + ?Sized>(
    store: &S,
    user: &Address,
    from: &Timestamp,
    to: &Timestamp,
) -> Result<Vec<(Timestamp, u64)>> {
    if from > to {
        return Ok(Vec::new());
    }
    let start = user_stakes_time_prefix(user, from)?;
    let last = user_stake_key(user, to, u64::MAX)?;
    let range = ScanRange::inclusive(start, &last);
    user_stake_entries(store, &range, ScanOrder::Ascending, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{Coin, StakeType};
    use chrono::{Duration, TimeZone, Utc};

    fn stake(id: u64, argument_id: u64, creator: &str, minutes: i64) -> Stake {
        let created = Utc.with_ymd_and_hms(2019, 7, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes);
        Stake {
            id,
            argument_id,
            creator: Address::new(creator),
            amount: Coin::new("trusteak", 5),
            stake_type: StakeType::Upvote,
            created_time: created,
            end_time: created + Duration::days(7),
            expired: false,
        }
    }

    fn index_all(store: &MemoryStore, stakes: &[Stake]) {
        let mut txn = WriteTxn::new(store);
        for s in stakes {
            index_stake(&mut txn, s).unwrap();
        }
        txn.commit().unwrap();
    }

    #[test]
    fn test_claim_arguments_in_id_order() {
        let store = MemoryStore::new();
        let mut txn = WriteTxn::new(&store);
        for id in [300, 2, 1] {
            let arg = Argument {
                id,
                claim_id: 9,
                creator: Address::new("cosmos1a"),
                body: "body".into(),
                created_time: Utc::now(),
            };
            index_argument(&mut txn, &arg).unwrap();
        }
        txn.commit().unwrap();

        assert_eq!(claim_arguments(&store, 9).unwrap(), vec![1, 2, 300]);
        assert_eq!(claim_arguments(&store, 10).unwrap(), Vec::<u64>::new());
        assert_eq!(
            user_arguments(&store, &Address::new("cosmos1a")).unwrap(),
            vec![1, 2, 300]
        );
    }

    #[test]
    fn test_user_stakes_ordered_by_time_then_id() {
        let store = MemoryStore::new();
        index_all(
            &store,
            &[
                stake(3, 1, "cosmos1u", 10),
                stake(1, 1, "cosmos1u", 20),
                stake(2, 2, "cosmos1u", 10),
                stake(4, 2, "cosmos1other", 0),
            ],
        );

        let ids: Vec<_> = user_stakes(&store, &Address::new("cosmos1u"))
            .unwrap()
            .iter()
            .map(|(_, id)| *id)
            .collect();
        assert_eq!(ids, vec![2, 3, 1]);

        let recent: Vec<_> = user_stakes_recent(&store, &Address::new("cosmos1u"), 2)
            .unwrap()
            .iter()
            .map(|(_, id)| *id)
            .collect();
        assert_eq!(recent, vec![1, 3]);

        assert_eq!(argument_stakes(&store, 2).unwrap(), vec![2, 4]);
    }

    #[test]
    fn test_user_stakes_between_is_inclusive() {
        let store = MemoryStore::new();
        let stakes: Vec<_> = (0..5).map(|i| stake(i + 1, 1, "cosmos1u", i as i64 * 10)).collect();
        index_all(&store, &stakes);

        let window = user_stakes_between(
            &store,
            &Address::new("cosmos1u"),
            &stakes[1].created_time,
            &stakes[3].created_time,
        )
        .unwrap();
        let ids: Vec<_> = window.iter().map(|(_, id)| *id).collect();
        assert_eq!(ids, vec![2, 3, 4]);

        let empty = user_stakes_between(
            &store,
            &Address::new("cosmos1u"),
            &stakes[3].created_time,
            &stakes[1].created_time,
        )
        .unwrap();
        assert!(empty.is_empty());
    }
}
