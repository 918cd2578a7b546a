//! Store key layout
//!
//! Every key starts with one [`KeyPrefix`] byte. Components that a scan
//! returns in order are encoded so that byte order equals numeric or
//! chronological order:
//!
//! - IDs: 8 bytes big-endian
//! - times: signed nanoseconds with the sign bit flipped, 8 bytes big-endian
//! - addresses: one length byte followed by the address bytes, so no user's
//!   prefix is a prefix of another user's keys
//!
//! ```text
//! 0x00 | stake_id                        -> Stake
//! 0x01 | argument_id                     -> Argument
//! 0x02 | user                            -> Coins (earned)
//! 0x03                                   -> StakingParams
//! 0x10 / 0x11 / 0x12                     -> next stake / argument / tx id
//! 0x20 | claim_id | argument_id          -> ()
//! 0x21 | argument_id | stake_id          -> ()
//! 0x22 | user | argument_id              -> ()
//! 0x23 | user | created_time | stake_id  -> ()
//! 0x30 | user | denom                    -> u128 balance
//! 0x31 | tx_id                           -> Transaction
//! 0x32 | user | tx_id                    -> ()
//! 0x40 | end_time | stake_id             -> ()
//! ```

use crate::types::{Address, Timestamp};
use crate::{Error, Result};
use chrono::DateTime;

/// Key namespaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum KeyPrefix {
    /// Stake records
    Stakes = 0x00,
    /// Argument records
    Arguments = 0x01,
    /// Per-user earned coins
    EarnedCoins = 0x02,
    /// Staking parameters the ledger was initialised with
    Params = 0x03,
    /// Next stake ID
    StakeId = 0x10,
    /// Next argument ID
    ArgumentId = 0x11,
    /// Next transaction ID
    TransactionId = 0x12,
    /// claim -> arguments
    ClaimArguments = 0x20,
    /// argument -> stakes
    ArgumentStakes = 0x21,
    /// user -> arguments
    UserArguments = 0x22,
    /// user -> stakes by creation time
    UserStakes = 0x23,
    /// Per-user, per-denom balances
    Balances = 0x30,
    /// Transaction records
    Transactions = 0x31,
    /// user -> transactions
    UserTransactions = 0x32,
    /// Active stakes by end time
    ActiveStakeQueue = 0x40,
}

impl KeyPrefix {
    /// Prefix byte
    pub const fn byte(self) -> u8 {
        self as u8
    }

    /// Single-byte key / scan prefix
    pub fn key(self) -> Vec<u8> {
        vec![self.byte()]
    }
}

/// Width of an encoded ID or time component
pub const COMPONENT_LEN: usize = 8;

/// Big-endian ID component
pub fn encode_id(id: u64) -> [u8; COMPONENT_LEN] {
    id.to_be_bytes()
}

/// Order-preserving time component
pub fn encode_time(t: &Timestamp) -> Result<[u8; COMPONENT_LEN]> {
    let nanos = t
        .timestamp_nanos_opt()
        .ok_or_else(|| Error::InvalidTimestamp(t.to_rfc3339()))?;
    Ok(((nanos as u64) ^ (1 << 63)).to_be_bytes())
}

/// Inverse of [`encode_time`]
pub fn decode_time(bytes: &[u8]) -> Result<Timestamp> {
    let raw = u64::from_be_bytes(fixed(bytes)?);
    Ok(DateTime::from_timestamp_nanos((raw ^ (1 << 63)) as i64))
}

fn decode_id(bytes: &[u8]) -> Result<u64> {
    Ok(u64::from_be_bytes(fixed(bytes)?))
}

fn fixed(bytes: &[u8]) -> Result<[u8; COMPONENT_LEN]> {
    bytes
        .try_into()
        .map_err(|_| Error::InvariantViolation(format!("bad key component length {}", bytes.len())))
}

fn push_address(key: &mut Vec<u8>, addr: &Address) -> Result<()> {
    let bytes = addr.as_bytes();
    if bytes.is_empty() || bytes.len() > u8::MAX as usize {
        return Err(Error::InvalidAddress(format!(
            "{:?} (length {})",
            addr.as_str(),
            bytes.len()
        )));
    }
    key.push(bytes.len() as u8);
    key.extend_from_slice(bytes);
    Ok(())
}

/// Reads a length-prefixed address starting at `key[at]`, returning it and
/// the offset just past it.
fn read_address(key: &[u8], at: usize) -> Result<(Address, usize)> {
    let len = *key
        .get(at)
        .ok_or_else(|| Error::InvariantViolation("key truncated before address".into()))?
        as usize;
    let end = at + 1 + len;
    let bytes = key
        .get(at + 1..end)
        .ok_or_else(|| Error::InvariantViolation("key truncated inside address".into()))?;
    let addr = std::str::from_utf8(bytes)
        .map_err(|e| Error::InvariantViolation(format!("address in key is not UTF-8: {}", e)))?;
    Ok((Address::new(addr), end))
}

fn with_id(prefix: KeyPrefix, id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + COMPONENT_LEN);
    key.push(prefix.byte());
    key.extend_from_slice(&encode_id(id));
    key
}

fn with_address(prefix: KeyPrefix, addr: &Address) -> Result<Vec<u8>> {
    let mut key = prefix.key();
    push_address(&mut key, addr)?;
    Ok(key)
}

/// Trailing 8-byte member ID of an index or queue key
pub fn trailing_id(key: &[u8]) -> Result<u64> {
    if key.len() < 1 + COMPONENT_LEN {
        return Err(Error::InvariantViolation(format!(
            "key too short for member id: {} bytes",
            key.len()
        )));
    }
    decode_id(&key[key.len() - COMPONENT_LEN..])
}

// Primary records

/// 0x00 | stake_id
pub fn stake_key(id: u64) -> Vec<u8> {
    with_id(KeyPrefix::Stakes, id)
}

/// 0x01 | argument_id
pub fn argument_key(id: u64) -> Vec<u8> {
    with_id(KeyPrefix::Arguments, id)
}

/// 0x31 | tx_id
pub fn transaction_key(id: u64) -> Vec<u8> {
    with_id(KeyPrefix::Transactions, id)
}

/// 0x02 | user
pub fn earned_coins_key(user: &Address) -> Result<Vec<u8>> {
    with_address(KeyPrefix::EarnedCoins, user)
}

/// User of an earned-coins key
pub fn decode_earned_coins_key(key: &[u8]) -> Result<Address> {
    Ok(read_address(key, 1)?.0)
}

// Associations

/// 0x20 | claim_id
pub fn claim_arguments_prefix(claim_id: u64) -> Vec<u8> {
    with_id(KeyPrefix::ClaimArguments, claim_id)
}

/// 0x20 | claim_id | argument_id
pub fn claim_argument_key(claim_id: u64, argument_id: u64) -> Vec<u8> {
    let mut key = claim_arguments_prefix(claim_id);
    key.extend_from_slice(&encode_id(argument_id));
    key
}

/// 0x21 | argument_id
pub fn argument_stakes_prefix(argument_id: u64) -> Vec<u8> {
    with_id(KeyPrefix::ArgumentStakes, argument_id)
}

/// 0x21 | argument_id | stake_id
pub fn argument_stake_key(argument_id: u64, stake_id: u64) -> Vec<u8> {
    let mut key = argument_stakes_prefix(argument_id);
    key.extend_from_slice(&encode_id(stake_id));
    key
}

/// 0x22 | user
pub fn user_arguments_prefix(user: &Address) -> Result<Vec<u8>> {
    with_address(KeyPrefix::UserArguments, user)
}

/// 0x22 | user | argument_id
pub fn user_argument_key(user: &Address, argument_id: u64) -> Result<Vec<u8>> {
    let mut key = user_arguments_prefix(user)?;
    key.extend_from_slice(&encode_id(argument_id));
    Ok(key)
}

/// 0x23 | user
pub fn user_stakes_prefix(user: &Address) -> Result<Vec<u8>> {
    with_address(KeyPrefix::UserStakes, user)
}

/// 0x23 | user | created_time
pub fn user_stakes_time_prefix(user: &Address, created_time: &Timestamp) -> Result<Vec<u8>> {
    let mut key = user_stakes_prefix(user)?;
    key.extend_from_slice(&encode_time(created_time)?);
    Ok(key)
}

/// 0x23 | user | created_time | stake_id
pub fn user_stake_key(user: &Address, created_time: &Timestamp, stake_id: u64) -> Result<Vec<u8>> {
    let mut key = user_stakes_time_prefix(user, created_time)?;
    key.extend_from_slice(&encode_id(stake_id));
    Ok(key)
}

/// (created_time, stake_id) of a user-stake key
pub fn decode_user_stake_key(key: &[u8]) -> Result<(Timestamp, u64)> {
    decode_time_then_id(key)
}

/// 0x30 | user
pub fn balances_prefix(user: &Address) -> Result<Vec<u8>> {
    with_address(KeyPrefix::Balances, user)
}

/// 0x30 | user | denom
pub fn balance_key(user: &Address, denom: &str) -> Result<Vec<u8>> {
    let mut key = balances_prefix(user)?;
    key.extend_from_slice(denom.as_bytes());
    Ok(key)
}

/// (user, denom) of a balance key
pub fn decode_balance_key(key: &[u8]) -> Result<(Address, String)> {
    let (user, end) = read_address(key, 1)?;
    let denom = std::str::from_utf8(&key[end..])
        .map_err(|e| Error::InvariantViolation(format!("denom in key is not UTF-8: {}", e)))?;
    Ok((user, denom.to_string()))
}

/// 0x32 | user
pub fn user_transactions_prefix(user: &Address) -> Result<Vec<u8>> {
    with_address(KeyPrefix::UserTransactions, user)
}

/// 0x32 | user | tx_id
pub fn user_transaction_key(user: &Address, tx_id: u64) -> Result<Vec<u8>> {
    let mut key = user_transactions_prefix(user)?;
    key.extend_from_slice(&encode_id(tx_id));
    Ok(key)
}

// Expiry queue

/// 0x40 | end_time
pub fn queue_time_prefix(end_time: &Timestamp) -> Result<Vec<u8>> {
    let mut key = KeyPrefix::ActiveStakeQueue.key();
    key.extend_from_slice(&encode_time(end_time)?);
    Ok(key)
}

/// 0x40 | end_time | stake_id
pub fn queue_key(end_time: &Timestamp, stake_id: u64) -> Result<Vec<u8>> {
    let mut key = queue_time_prefix(end_time)?;
    key.extend_from_slice(&encode_id(stake_id));
    Ok(key)
}

/// (end_time, stake_id) of a queue key
pub fn decode_queue_key(key: &[u8]) -> Result<(Timestamp, u64)> {
    decode_time_then_id(key)
}

fn decode_time_then_id(key: &[u8]) -> Result<(Timestamp, u64)> {
    if key.len() < 1 + 2 * COMPONENT_LEN {
        return Err(Error::InvariantViolation(format!(
            "key too short for time and id: {} bytes",
            key.len()
        )));
    }
    let id_at = key.len() - COMPONENT_LEN;
    let time = decode_time(&key[id_at - COMPONENT_LEN..id_at])?;
    Ok((time, decode_id(&key[id_at..])?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn test_time_encoding_preserves_order() {
        let base = Utc.with_ymd_and_hms(2019, 6, 1, 0, 0, 0).unwrap();
        let times = [
            Utc.with_ymd_and_hms(1960, 1, 1, 0, 0, 0).unwrap(),
            base - Duration::nanoseconds(1),
            base,
            base + Duration::nanoseconds(1),
            base + Duration::days(400),
        ];
        for pair in times.windows(2) {
            assert!(encode_time(&pair[0]).unwrap() < encode_time(&pair[1]).unwrap());
        }
        for t in times {
            assert_eq!(decode_time(&encode_time(&t).unwrap()).unwrap(), t);
        }
    }

    #[test]
    fn test_id_suffix_sorts_numerically() {
        // 255 < 256 must hold byte-wise as well
        assert!(claim_argument_key(1, 255) < claim_argument_key(1, 256));
        assert!(argument_stake_key(9, 1) < argument_stake_key(9, 1 << 40));
        assert_eq!(trailing_id(&claim_argument_key(3, 256)).unwrap(), 256);
    }

    #[test]
    fn test_address_prefix_is_unambiguous() {
        let short = user_arguments_prefix(&Address::new("cosmos1ab")).unwrap();
        let long = user_argument_key(&Address::new("cosmos1abc"), 1).unwrap();
        assert!(!long.starts_with(&short));
    }

    #[test]
    fn test_invalid_addresses_rejected() {
        assert!(matches!(
            user_stakes_prefix(&Address::new("")),
            Err(Error::InvalidAddress(_))
        ));
        let huge = Address::new("x".repeat(300));
        assert!(earned_coins_key(&huge).is_err());
    }

    #[test]
    fn test_queue_key_roundtrip_and_order() {
        let t = Utc.with_ymd_and_hms(2019, 6, 1, 12, 0, 0).unwrap();
        let key = queue_key(&t, 42).unwrap();
        assert_eq!(decode_queue_key(&key).unwrap(), (t, 42));
        assert!(queue_key(&t, u64::MAX).unwrap() < queue_key(&(t + Duration::nanoseconds(1)), 0).unwrap());
    }

    #[test]
    fn test_balance_key_decodes() {
        let user = Address::new("cosmos1xyz");
        let key = balance_key(&user, "trusteak").unwrap();
        assert_eq!(
            decode_balance_key(&key).unwrap(),
            (user, "trusteak".to_string())
        );
    }
}
