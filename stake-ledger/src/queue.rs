//! Active stake queue ordered by end time
//!
//! Entries are `0x40 | end_time | stake_id -> ()`. Finding matured stakes is
//! one range scan from the queue prefix up to `(as_of, u64::MAX)`, so the
//! cost is proportional to the number of due stakes, not to all stakes.

use crate::keys::{decode_queue_key, queue_key, KeyPrefix};
use crate::store::{KeyValueStore, ScanOrder, ScanRange, WriteTxn};
use crate::types::Timestamp;
use crate::Result;

/// Queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct QueueEntry {
    /// When the stake matures
    pub end_time: Timestamp,
    /// Stake ID
    pub stake_id: u64,
}

/// Expiry queue operations
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpiryQueue;

impl ExpiryQueue {
    /// Stage `(end_time, stake_id)`
    pub fn schedule<S: KeyValueStore + ?Sized>(
        txn: &mut WriteTxn<'_, S>,
        stake_id: u64,
        end_time: &Timestamp,
    ) -> Result<()> {
        txn.put_marker(queue_key(end_time, stake_id)?);
        Ok(())
    }

    /// Stage removal of `(end_time, stake_id)`
    pub fn remove<S: KeyValueStore + ?Sized>(
        txn: &mut WriteTxn<'_, S>,
        stake_id: u64,
        end_time: &Timestamp,
    ) -> Result<()> {
        txn.delete(queue_key(end_time, stake_id)?);
        Ok(())
    }

    /// Entries with `end_time <= as_of`, ascending by end time then stake ID,
    /// at most `limit` of them
    pub fn due<S: KeyValueStore + ?Sized>(
        store: &S,
        as_of: &Timestamp,
        limit: Option<usize>,
    ) -> Result<Vec<QueueEntry>> {
        let last = queue_key(as_of, u64::MAX)?;
        let range = ScanRange::inclusive(KeyPrefix::ActiveStakeQueue.key(), &last);
        Self::decode_all(store.scan(&range, ScanOrder::Ascending, limit)?)
    }

    /// The whole queue, ascending
    pub fn scheduled<S: KeyValueStore + ?Sized>(store: &S) -> Result<Vec<QueueEntry>> {
        Self::decode_all(store.prefix_scan(&KeyPrefix::ActiveStakeQueue.key())?)
    }

    fn decode_all(pairs: Vec<(Vec<u8>, Vec<u8>)>) -> Result<Vec<QueueEntry>> {
        pairs
            .iter()
            .map(|(key, _)| {
                let (end_time, stake_id) = decode_queue_key(key)?;
                Ok(QueueEntry { end_time, stake_id })
            })
            .collect()
    }
}
