use std::path::Path;

use log::warn;
use sled::{Db, Tree};
use thiserror::Error;

use super::block::Block;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

/// Persistent block storage
///
/// Blocks are keyed by their big-endian index so iteration yields chain
/// order. The metadata tree tracks the tip hash and height.
pub struct BlockStore {
    db: Db,
    blocks: Tree,
    metadata: Tree,
}

impl std::fmt::Debug for BlockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockStore")
            .field("blocks", &self.blocks.len())
            .finish()
    }
}

impl BlockStore {
    /// Opens (or creates) a block store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::from_db(sled::open(path)?)
    }

    /// Opens a throwaway store that is removed when dropped
    pub fn temporary() -> Result<Self, StorageError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, StorageError> {
        let blocks = db.open_tree("blocks")?;
        let metadata = db.open_tree("metadata")?;

        Ok(Self {
            db,
            blocks,
            metadata,
        })
    }

    /// Saves a block and moves the tip metadata to it
    pub fn save_block(&self, block: &Block) -> Result<(), StorageError> {
        let value = bincode::serialize(block)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        self.blocks.insert(block.index.to_be_bytes(), value)?;
        self.metadata.insert("latest_block_hash", block.hash.as_bytes())?;
        self.metadata.insert("block_height", &block.index.to_be_bytes()[..])?;

        Ok(())
    }

    /// Loads every stored block in index order
    ///
    /// Undecodable entries are skipped with a warning unless nothing at all
    /// could be decoded.
    pub fn load_chain(&self) -> Result<Vec<Block>, StorageError> {
        let mut blocks = Vec::new();
        let mut errors = Vec::new();

        for entry in self.blocks.iter() {
            let (key, value) = entry?;
            match bincode::deserialize::<Block>(&value) {
                Ok(block) => blocks.push(block),
                Err(e) => errors.push(format!("{:?}: {}", key.as_ref(), e)),
            }
        }

        if !errors.is_empty() {
            if blocks.is_empty() {
                return Err(StorageError::DeserializationError(format!(
                    "Failed to deserialize any blocks: {}",
                    errors.join(", ")
                )));
            }
            warn!("Some blocks could not be deserialized: {}", errors.join(", "));
        }

        Ok(blocks)
    }

    /// Hash of the most recently saved block
    pub fn latest_block_hash(&self) -> Result<Option<String>, StorageError> {
        Ok(self
            .metadata
            .get("latest_block_hash")?
            .map(|value| String::from_utf8_lossy(&value).to_string()))
    }

    /// Index of the most recently saved block
    pub fn block_height(&self) -> Result<Option<u64>, StorageError> {
        match self.metadata.get("block_height")? {
            Some(value) => {
                let bytes: [u8; 8] = value.as_ref().try_into().map_err(|_| {
                    StorageError::DeserializationError("Corrupt block height".to_string())
                })?;
                Ok(Some(u64::from_be_bytes(bytes)))
            }
            None => Ok(None),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Flushes all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Transaction;

    #[test]
    fn test_blocks_load_in_index_order() {
        let store = BlockStore::temporary().unwrap();
        assert!(store.is_empty());
        assert_eq!(store.block_height().unwrap(), None);

        let genesis = Block::genesis();
        let next = Block::candidate(
            1,
            vec![Transaction::new("alice", "bob", 5, 1), Transaction::reward("miner", 50)],
            genesis.hash.clone(),
        )
        .unwrap();

        // Saved out of order on purpose
        store.save_block(&next).unwrap();
        store.save_block(&genesis).unwrap();
        store.flush().unwrap();

        let loaded = store.load_chain().unwrap();
        assert_eq!(loaded, vec![genesis.clone(), next]);
        assert_eq!(store.latest_block_hash().unwrap(), Some(genesis.hash));
    }

    #[test]
    fn test_block_height_tracks_last_save() {
        let store = BlockStore::temporary().unwrap();
        let block = Block::candidate(7, Vec::new(), "prev".to_string()).unwrap();

        store.save_block(&block).unwrap();
        assert_eq!(store.block_height().unwrap(), Some(7));
        assert!(!store.is_empty());
    }
}
