use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;
use thiserror::Error;

use super::block::{Block, BlockError};
use super::hash::{digest_fields, meets_difficulty};

/// How many nonces are tried between two looks at the cancellation flag
pub const CANCEL_CHECK_INTERVAL: u64 = 1_024;

/// Errors that can occur during proof of work
#[derive(Debug, Error)]
pub enum MiningError {
    #[error("Mining cancelled after {attempts} attempts")]
    Cancelled { attempts: u64 },

    #[error("Nonce space exhausted")]
    NonceExhausted,

    #[error("Block error: {0}")]
    BlockError(#[from] BlockError),
}

/// Searches for a nonce whose block hash has `difficulty` leading zero hex digits
///
/// Starts from the candidate's current nonce and increments by one. There is
/// no attempt limit; the search stops early only when `cancel` is raised.
pub fn mine(mut candidate: Block, difficulty: usize, cancel: &AtomicBool) -> Result<Block, MiningError> {
    // Transactions are fixed for the whole search, serialize them once
    let transactions = serde_json::to_string(&candidate.transactions)
        .map_err(|e| BlockError::InvalidInput(e.to_string()))?;

    let start = candidate.nonce;
    let mut nonce = start;

    loop {
        let hash = digest_fields(
            candidate.index,
            &candidate.previous_hash,
            &candidate.timestamp,
            &transactions,
            nonce,
        );

        if meets_difficulty(&hash, difficulty) {
            debug!(
                "Found nonce {} for block {} after {} attempts",
                nonce,
                candidate.index,
                nonce - start + 1
            );
            candidate.nonce = nonce;
            candidate.hash = hash;
            return Ok(candidate);
        }

        nonce = nonce.checked_add(1).ok_or(MiningError::NonceExhausted)?;

        if (nonce - start) % CANCEL_CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
            return Err(MiningError::Cancelled {
                attempts: nonce - start,
            });
        }
    }
}
