//! Persistent ID counters
//!
//! Each counter holds the next ID to hand out. Allocation reads the counter
//! and stages `counter + 1` in the caller's transaction, so an ID is only
//! consumed if the operation that took it commits.

use crate::keys::{encode_id, KeyPrefix};
use crate::store::{KeyValueStore, WriteTxn};
use crate::{Error, Result};

/// First ID of every counter
pub const FIRST_ID: u64 = 1;

/// Entity kinds with their own ID sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    /// Arguments
    Argument,
    /// Stakes
    Stake,
    /// Ledger transactions
    Transaction,
}

impl IdKind {
    fn key(self) -> Vec<u8> {
        match self {
            IdKind::Argument => KeyPrefix::ArgumentId.key(),
            IdKind::Stake => KeyPrefix::StakeId.key(),
            IdKind::Transaction => KeyPrefix::TransactionId.key(),
        }
    }
}

/// ID allocator over the counters in the store
#[derive(Debug, Clone, Copy, Default)]
pub struct IdAllocator;

impl IdAllocator {
    /// Current counter value (the next ID that will be handed out)
    pub fn peek<S: KeyValueStore + ?Sized>(txn: &WriteTxn<'_, S>, kind: IdKind) -> Result<u64> {
        match txn.get(&kind.key())? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    Error::InvariantViolation(format!("{:?} counter has {} bytes", kind, bytes.len()))
                })?;
                Ok(u64::from_be_bytes(raw))
            }
            None => Ok(FIRST_ID),
        }
    }

    /// Return the current value and stage its increment
    pub fn next<S: KeyValueStore + ?Sized>(txn: &mut WriteTxn<'_, S>, kind: IdKind) -> Result<u64> {
        let id = Self::peek(txn, kind)?;
        let next = id
            .checked_add(1)
            .ok_or_else(|| Error::InvariantViolation(format!("{:?} ID space exhausted", kind)))?;
        Self::set(txn, kind, next);
        Ok(id)
    }

    /// Next argument ID
    pub fn next_argument_id<S: KeyValueStore + ?Sized>(txn: &mut WriteTxn<'_, S>) -> Result<u64> {
        Self::next(txn, IdKind::Argument)
    }

    /// Next stake ID
    pub fn next_stake_id<S: KeyValueStore + ?Sized>(txn: &mut WriteTxn<'_, S>) -> Result<u64> {
        Self::next(txn, IdKind::Stake)
    }

    /// Next transaction ID
    pub fn next_transaction_id<S: KeyValueStore + ?Sized>(
        txn: &mut WriteTxn<'_, S>,
    ) -> Result<u64> {
        Self::next(txn, IdKind::Transaction)
    }

    /// Overwrite a counter (genesis import)
    pub fn set<S: KeyValueStore + ?Sized>(txn: &mut WriteTxn<'_, S>, kind: IdKind, next: u64) {
        txn.put(kind.key(), encode_id(next).to_vec());
    }

    /// True once any counter has been written
    pub fn initialized<S: KeyValueStore + ?Sized>(store: &S) -> Result<bool> {
        for kind in [IdKind::Argument, IdKind::Stake, IdKind::Transaction] {
            if store.get(&kind.key())?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_counters_start_at_one_and_increase() {
        let store = MemoryStore::new();
        let mut txn = WriteTxn::new(&store);
        assert_eq!(IdAllocator::next_stake_id(&mut txn).unwrap(), 1);
        assert_eq!(IdAllocator::next_stake_id(&mut txn).unwrap(), 2);
        assert_eq!(IdAllocator::next_argument_id(&mut txn).unwrap(), 1);
        txn.commit().unwrap();

        let mut txn = WriteTxn::new(&store);
        assert_eq!(IdAllocator::next_stake_id(&mut txn).unwrap(), 3);
        assert_eq!(IdAllocator::peek(&txn, IdKind::Transaction).unwrap(), 1);
    }

    #[test]
    fn test_uncommitted_allocation_is_not_consumed() {
        let store = MemoryStore::new();
        {
            let mut txn = WriteTxn::new(&store);
            IdAllocator::next_argument_id(&mut txn).unwrap();
        }
        assert!(!IdAllocator::initialized(&store).unwrap());
        let mut txn = WriteTxn::new(&store);
        assert_eq!(IdAllocator::next_argument_id(&mut txn).unwrap(), 1);
    }

    #[test]
    fn test_set_counter() {
        let store = MemoryStore::new();
        let mut txn = WriteTxn::new(&store);
        IdAllocator::set(&mut txn, IdKind::Stake, 11);
        txn.commit().unwrap();
        assert!(IdAllocator::initialized(&store).unwrap());
        let mut txn = WriteTxn::new(&store);
        assert_eq!(IdAllocator::next_stake_id(&mut txn).unwrap(), 11);
    }
}
