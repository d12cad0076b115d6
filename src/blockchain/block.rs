use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::clock;
use super::hash::{compute_block_hash, digest_fields, meets_difficulty};
use super::transaction::Transaction;

/// Previous-hash marker carried by the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Errors that can occur while building or hashing a block
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Index of the block in the chain
    pub index: u64,

    /// Timestamp when the block was created
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub timestamp: DateTime<Utc>,

    /// List of transactions included in this block
    pub transactions: Vec<Transaction>,

    /// Proof of work nonce
    pub nonce: u64,

    /// Hash of the previous block
    pub previous_hash: String,

    /// Hash of the current block
    pub hash: String,
}

impl Block {
    /// Creates an unmined candidate block with nonce 0, stamped now
    pub fn candidate(
        index: u64,
        transactions: Vec<Transaction>,
        previous_hash: String,
    ) -> Result<Self, BlockError> {
        Self::assemble(index, clock::now(), transactions, 0, previous_hash)
    }

    /// Creates the genesis block
    ///
    /// The timestamp is pinned to the UNIX epoch so every node derives the
    /// same genesis hash. Genesis is hashed once and not mined.
    pub fn genesis() -> Self {
        let timestamp = DateTime::<Utc>::UNIX_EPOCH;
        let previous_hash = GENESIS_PREVIOUS_HASH.to_string();
        let hash = digest_fields(0, &previous_hash, &timestamp, "[]", 0);

        Block {
            index: 0,
            timestamp,
            transactions: Vec::new(),
            nonce: 0,
            previous_hash,
            hash,
        }
    }

    fn assemble(
        index: u64,
        timestamp: DateTime<Utc>,
        transactions: Vec<Transaction>,
        nonce: u64,
        previous_hash: String,
    ) -> Result<Self, BlockError> {
        let hash = compute_block_hash(index, &previous_hash, &timestamp, &transactions, nonce)?;

        Ok(Block {
            index,
            timestamp,
            transactions,
            nonce,
            previous_hash,
            hash,
        })
    }

    /// Calculates the hash of the block from its current fields
    pub fn calculate_hash(&self) -> Result<String, BlockError> {
        compute_block_hash(
            self.index,
            &self.previous_hash,
            &self.timestamp,
            &self.transactions,
            self.nonce,
        )
    }

    /// Whether the stored hash matches the block's fields
    pub fn has_valid_hash(&self) -> bool {
        matches!(self.calculate_hash(), Ok(hash) if hash == self.hash)
    }

    pub fn meets_difficulty(&self, difficulty: usize) -> bool {
        meets_difficulty(&self.hash, difficulty)
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }
}
