// Blockchain module
//
// This module contains the ledger core:
// - Block and transaction structures
// - Content hashing and the proof of work search
// - The ledger (chain + pending pool)
// - Block persistence
// - The signing capability carried by transactions

pub mod block;
pub mod clock;
pub mod crypto;
pub mod hash;
pub mod ledger;
pub mod pow;
pub mod storage;
pub mod transaction;

// Re-export main components for easier access
pub use block::{Block, BlockError};
pub use crypto::{Address, DigitalSignature, Ed25519Signer, Signer};
pub use ledger::{BlockAdmission, ChainIntegrityError, Ledger, LedgerError};
pub use pow::MiningError;
pub use storage::{BlockStore, StorageError};
pub use transaction::{Transaction, SYSTEM_ADDRESS};
