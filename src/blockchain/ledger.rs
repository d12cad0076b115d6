use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};
use thiserror::Error;

use super::block::{Block, BlockError};
use super::crypto::Address;
use super::pow::{self, MiningError};
use super::storage::{BlockStore, StorageError};
use super::transaction::Transaction;
use crate::config::LedgerConfig;

/// Errors that can occur during ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Block error: {0}")]
    BlockError(#[from] BlockError),

    #[error("Mining error: {0}")]
    MiningError(#[from] MiningError),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Invalid chain: {0}")]
    InvalidChain(#[from] ChainIntegrityError),

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Chain tip moved from {expected} to {found} while mining")]
    StaleTip { expected: String, found: String },

    #[error("A chain needs at least a genesis block")]
    EmptyChain,
}

/// First integrity violation found while walking the chain
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainIntegrityError {
    #[error("Block {index} has a hash that does not match its contents")]
    HashMismatch { index: u64 },

    #[error("Block {index} does not link to the hash of its predecessor")]
    BrokenLink { index: u64 },

    #[error("Block {index} hash does not meet difficulty {difficulty}")]
    DifficultyNotMet { index: u64, difficulty: usize },
}

/// Outcome of offering a block received from a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockAdmission {
    /// The block extended the local chain
    Appended,

    /// The block was already part of the local chain
    Duplicate,
}

/// Checks every block after genesis for hash, link and difficulty
///
/// Genesis is exempt: it is hashed once and never mined.
pub fn verify_blocks(chain: &[Block], difficulty: usize) -> Result<(), ChainIntegrityError> {
    for pair in chain.windows(2) {
        let (previous, current) = (&pair[0], &pair[1]);

        if !current.has_valid_hash() {
            return Err(ChainIntegrityError::HashMismatch {
                index: current.index,
            });
        }

        if current.previous_hash != previous.hash {
            return Err(ChainIntegrityError::BrokenLink {
                index: current.index,
            });
        }

        if !current.meets_difficulty(difficulty) {
            return Err(ChainIntegrityError::DifficultyNotMet {
                index: current.index,
                difficulty,
            });
        }
    }

    Ok(())
}

/// Chain and pending pool, always mutated together
#[derive(Debug)]
struct LedgerState {
    /// Never empty: index 0 is genesis
    chain: Vec<Block>,

    /// Transactions awaiting inclusion, in admission order
    pending: Vec<Transaction>,

    /// Ids of every pending or chained transaction
    known_ids: HashSet<String>,
}

impl LedgerState {
    fn new(chain: Vec<Block>) -> Self {
        let known_ids = chain
            .iter()
            .flat_map(|block| block.transactions.iter().map(|tx| tx.id.clone()))
            .collect();

        Self {
            chain,
            pending: Vec::new(),
            known_ids,
        }
    }

    fn tip(&self) -> &Block {
        &self.chain[self.chain.len() - 1]
    }

    /// Appends a block and drops exactly its transactions from the pool
    fn commit(&mut self, block: Block) {
        let included: HashSet<&str> = block.transactions.iter().map(|tx| tx.id.as_str()).collect();
        self.pending.retain(|tx| !included.contains(tx.id.as_str()));
        self.known_ids
            .extend(block.transactions.iter().map(|tx| tx.id.clone()));
        self.chain.push(block);
    }
}

/// The ledger: an append-only chain of blocks plus the pending pool
///
/// Cloning yields another handle to the same shared state.
#[derive(Debug, Clone)]
pub struct Ledger {
    state: Arc<Mutex<LedgerState>>,
    config: LedgerConfig,
    storage: Option<Arc<BlockStore>>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(LedgerConfig::default())
    }
}

impl Ledger {
    /// Creates an in-memory ledger holding only the genesis block
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState::new(vec![Self::create_genesis()]))),
            config,
            storage: None,
        }
    }

    /// Creates a ledger backed by a block store at `path`
    ///
    /// A stored chain is loaded and verified; an empty store is seeded with
    /// the genesis block.
    pub fn with_storage<P: AsRef<Path>>(path: P, config: LedgerConfig) -> Result<Self, LedgerError> {
        Self::with_store(BlockStore::open(path)?, config)
    }

    /// Creates a ledger over an already opened block store
    pub fn with_store(store: BlockStore, config: LedgerConfig) -> Result<Self, LedgerError> {
        let chain = store.load_chain()?;

        let chain = if chain.is_empty() {
            info!("No existing chain found in storage, creating genesis block");
            let genesis = Self::create_genesis();
            store.save_block(&genesis)?;
            store.flush()?;
            vec![genesis]
        } else {
            verify_blocks(&chain, config.difficulty)?;
            info!("Loaded {} blocks from storage", chain.len());
            chain
        };

        Ok(Self {
            state: Arc::new(Mutex::new(LedgerState::new(chain))),
            config,
            storage: Some(Arc::new(store)),
        })
    }

    /// Creates an in-memory ledger from existing blocks after verifying them
    pub fn from_chain(chain: Vec<Block>, config: LedgerConfig) -> Result<Self, LedgerError> {
        if chain.is_empty() {
            return Err(LedgerError::EmptyChain);
        }
        verify_blocks(&chain, config.difficulty)?;

        Ok(Self {
            state: Arc::new(Mutex::new(LedgerState::new(chain))),
            config,
            storage: None,
        })
    }

    fn create_genesis() -> Block {
        Block::genesis()
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        // A panic while holding the lock cannot leave the state half-written:
        // every mutation is a single push/retain.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds a transaction to the pending pool
    ///
    /// Checks field shape only: non-empty sender and recipient, positive
    /// amount, non-negative fee. A transaction already pending or chained is
    /// refused so repeated gossip does not duplicate it. Sender balance and
    /// signature are not checked.
    pub fn admit_transaction(&self, transaction: Transaction) -> bool {
        if !transaction.is_well_formed() {
            debug!("Rejected malformed transaction {}", transaction.id);
            return false;
        }

        let mut state = self.state();
        if !state.known_ids.insert(transaction.id.clone()) {
            debug!("Ignored already known transaction {}", transaction.id);
            return false;
        }

        debug!(
            "Admitted transaction {}: {} -> {} ({})",
            transaction.id, transaction.sender, transaction.recipient, transaction.amount
        );
        state.pending.push(transaction);
        true
    }

    /// Mines the pending pool into a new block credited to `miner_id`
    pub fn produce_block(&self, miner_id: &str) -> Result<Block, LedgerError> {
        self.produce_block_with_cancel(miner_id, &AtomicBool::new(false))
    }

    /// Same as [`Ledger::produce_block`], abandoning the search once `cancel` is raised
    ///
    /// Mining runs without holding the lock. Transactions admitted meanwhile
    /// stay pending for the next block. If another block was appended during
    /// the search, the candidate is discarded with [`LedgerError::StaleTip`].
    pub fn produce_block_with_cancel(&self, miner_id: &str, cancel: &AtomicBool) -> Result<Block, LedgerError> {
        let candidate = self.prepare_candidate(miner_id)?;
        let block = pow::mine(candidate, self.config.difficulty, cancel)?;
        self.commit_mined(block)
    }

    fn prepare_candidate(&self, miner_id: &str) -> Result<Block, LedgerError> {
        let (mut transactions, index, previous_hash) = {
            let state = self.state();
            (
                state.pending.clone(),
                state.chain.len() as u64,
                state.tip().hash.clone(),
            )
        };

        transactions.push(Transaction::reward(miner_id, self.config.block_reward));

        Ok(Block::candidate(index, transactions, previous_hash)?)
    }

    fn commit_mined(&self, block: Block) -> Result<Block, LedgerError> {
        let mut state = self.state();

        let tip = state.tip();
        if tip.hash != block.previous_hash {
            return Err(LedgerError::StaleTip {
                expected: block.previous_hash,
                found: tip.hash.clone(),
            });
        }

        self.persist(&block)?;
        state.commit(block.clone());

        info!(
            "Produced block {} with {} transactions ({} still pending)",
            block.index,
            block.transactions.len(),
            state.pending.len()
        );

        Ok(block)
    }

    /// Offers a block received from a peer
    ///
    /// The block must extend the current tip with a correct index, link,
    /// hash, difficulty and well-formed transactions. A block already in the
    /// chain is reported as [`BlockAdmission::Duplicate`].
    pub fn accept_block(&self, block: Block) -> Result<BlockAdmission, LedgerError> {
        let mut state = self.state();

        if state.chain.iter().any(|existing| existing.hash == block.hash) {
            return Ok(BlockAdmission::Duplicate);
        }

        let expected_index = state.chain.len() as u64;
        if block.index != expected_index {
            return Err(LedgerError::InvalidBlock(format!(
                "expected index {}, got {}",
                expected_index, block.index
            )));
        }

        if block.previous_hash != state.tip().hash {
            return Err(LedgerError::InvalidBlock(format!(
                "block {} does not extend tip {}",
                block.index,
                state.tip().hash
            )));
        }

        if !block.has_valid_hash() {
            return Err(LedgerError::InvalidBlock(format!(
                "block {} hash does not match its contents",
                block.index
            )));
        }

        if !block.meets_difficulty(self.config.difficulty) {
            return Err(LedgerError::InvalidBlock(format!(
                "block {} hash does not meet difficulty {}",
                block.index, self.config.difficulty
            )));
        }

        if let Some(bad) = block.transactions.iter().find(|tx| !tx.is_well_formed()) {
            return Err(LedgerError::InvalidBlock(format!(
                "block {} carries malformed transaction {}",
                block.index, bad.id
            )));
        }

        self.check_reward(&block)?;

        self.persist(&block)?;
        info!("Accepted block {} from peer", block.index);
        state.commit(block);

        Ok(BlockAdmission::Appended)
    }

    /// A block pays exactly one reward, last, of the configured amount
    fn check_reward(&self, block: &Block) -> Result<(), LedgerError> {
        let rewards = block.transactions.iter().filter(|tx| tx.is_reward()).count();
        let last = block.transactions.last();

        let valid = rewards == 1
            && last.map_or(false, |tx| {
                tx.is_reward() && tx.amount == self.config.block_reward && tx.fee == 0
            });

        if !valid {
            return Err(LedgerError::InvalidBlock(format!(
                "block {} must end with a single reward of {}",
                block.index, self.config.block_reward
            )));
        }
        Ok(())
    }

    fn persist(&self, block: &Block) -> Result<(), LedgerError> {
        if let Some(storage) = &self.storage {
            storage.save_block(block)?;
            storage.flush()?;
            debug!("Saved block {} to storage", block.index);
        }
        Ok(())
    }

    /// Whether every block passes hash, link and difficulty checks
    pub fn validate_chain(&self) -> bool {
        match self.verify_chain() {
            Ok(()) => true,
            Err(err) => {
                warn!("Chain validation failed: {}", err);
                false
            }
        }
    }

    /// Like [`Ledger::validate_chain`] but reports the first failing block
    pub fn verify_chain(&self) -> Result<(), ChainIntegrityError> {
        verify_blocks(&self.state().chain, self.config.difficulty)
    }

    /// Net balance of `address` over chained transactions
    ///
    /// Senders pay amount plus fee, recipients receive the amount. Pending
    /// transactions do not count. May be negative: admission does not check
    /// funds. Summed in `i128` and clamped to the `i64` range.
    pub fn balance_of(&self, address: &str) -> i64 {
        let address = Address::from(address);
        let state = self.state();
        let mut balance: i128 = 0;

        for tx in state.chain.iter().flat_map(|block| block.transactions.iter()) {
            if tx.sender == address {
                balance -= i128::from(tx.amount) + i128::from(tx.fee);
            }
            if tx.recipient == address {
                balance += i128::from(tx.amount);
            }
        }

        i64::try_from(balance).unwrap_or(if balance < 0 { i64::MIN } else { i64::MAX })
    }

    /// Copy of the whole chain
    pub fn chain_snapshot(&self) -> Vec<Block> {
        self.state().chain.clone()
    }

    /// Copy of the pending pool in admission order
    pub fn pending_snapshot(&self) -> Vec<Transaction> {
        self.state().pending.clone()
    }

    pub fn block_by_hash(&self, hash: &str) -> Option<Block> {
        self.state()
            .chain
            .iter()
            .find(|block| block.hash == hash)
            .cloned()
    }

    /// Last block of the chain
    pub fn tip(&self) -> Block {
        self.state().tip().clone()
    }

    /// Number of blocks, genesis included
    pub fn len(&self) -> usize {
        self.state().chain.len()
    }

    pub fn pending_len(&self) -> usize {
        self.state().pending.len()
    }

    pub fn difficulty(&self) -> usize {
        self.config.difficulty
    }

    pub fn block_reward(&self) -> i64 {
        self.config.block_reward
    }

    pub fn config(&self) -> LedgerConfig {
        self.config
    }
}
