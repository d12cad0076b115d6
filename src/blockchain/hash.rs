use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use super::block::BlockError;
use super::transaction::Transaction;

/// Computes the content hash of a block from its canonical fields
///
/// The digest covers `index ‖ previous_hash ‖ timestamp ‖ transactions ‖ nonce`
/// where the timestamp is rendered as RFC 3339 with nanoseconds and the
/// transactions as an order-preserving JSON array. Returns 64 lowercase
/// hex characters.
pub fn compute_block_hash(
    index: u64,
    previous_hash: &str,
    timestamp: &DateTime<Utc>,
    transactions: &[Transaction],
    nonce: u64,
) -> Result<String, BlockError> {
    let transactions = serde_json::to_string(transactions)
        .map_err(|e| BlockError::InvalidInput(e.to_string()))?;

    Ok(digest_fields(index, previous_hash, timestamp, &transactions, nonce))
}

/// Digest over already-serialized block fields
pub(crate) fn digest_fields(
    index: u64,
    previous_hash: &str,
    timestamp: &DateTime<Utc>,
    transactions_json: &str,
    nonce: u64,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(index.to_string().as_bytes());
    hasher.update(previous_hash.as_bytes());
    hasher.update(
        timestamp
            .to_rfc3339_opts(SecondsFormat::Nanos, true)
            .as_bytes(),
    );
    hasher.update(transactions_json.as_bytes());
    hasher.update(nonce.to_string().as_bytes());

    hex::encode(hasher.finalize())
}

/// Whether `hash` starts with `difficulty` zero hex characters
pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (DateTime<Utc>, Vec<Transaction>) {
        let timestamp = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        (timestamp, vec![Transaction::new("alice", "bob", 50, 1)])
    }

    #[test]
    fn test_hash_is_deterministic() {
        let (timestamp, transactions) = sample();
        let first = compute_block_hash(1, "abc", &timestamp, &transactions, 7).unwrap();
        let second = compute_block_hash(1, "abc", &timestamp, &transactions, 7).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_every_field_changes_the_hash() {
        let (timestamp, transactions) = sample();
        let base = compute_block_hash(1, "abc", &timestamp, &transactions, 7).unwrap();
        let later = DateTime::from_timestamp_millis(1_700_000_000_001).unwrap();

        assert_ne!(base, compute_block_hash(2, "abc", &timestamp, &transactions, 7).unwrap());
        assert_ne!(base, compute_block_hash(1, "abd", &timestamp, &transactions, 7).unwrap());
        assert_ne!(base, compute_block_hash(1, "abc", &later, &transactions, 7).unwrap());
        assert_ne!(base, compute_block_hash(1, "abc", &timestamp, &[], 7).unwrap());
        assert_ne!(base, compute_block_hash(1, "abc", &timestamp, &transactions, 8).unwrap());
    }

    #[test]
    fn test_sub_millisecond_timestamp_changes_the_hash() {
        let (timestamp, transactions) = sample();
        let base = compute_block_hash(1, "abc", &timestamp, &transactions, 7).unwrap();
        let nudged = timestamp + chrono::Duration::nanoseconds(1);

        assert_ne!(base, compute_block_hash(1, "abc", &nudged, &transactions, 7).unwrap());
    }

    #[test]
    fn test_transaction_order_is_part_of_the_hash() {
        let timestamp = DateTime::from_timestamp_millis(0).unwrap();
        let a = Transaction::new("alice", "bob", 1, 0);
        let b = Transaction::new("carol", "dave", 2, 0);

        let forward = compute_block_hash(1, "0", &timestamp, &[a.clone(), b.clone()], 0).unwrap();
        let reverse = compute_block_hash(1, "0", &timestamp, &[b, a], 0).unwrap();
        assert_ne!(forward, reverse);
    }

    #[test]
    fn test_meets_difficulty() {
        assert!(meets_difficulty("00ab", 2));
        assert!(!meets_difficulty("0a0b", 2));
        assert!(meets_difficulty("abcd", 0));
        assert!(!meets_difficulty("0", 2));
    }
}
