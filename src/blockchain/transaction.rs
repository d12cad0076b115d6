use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use super::clock;
use super::crypto::{verify_signature, Address, CryptoError, DigitalSignature, Signer};

/// Sender of every block reward transaction
pub const SYSTEM_ADDRESS: &str = "system";

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Transaction not signed")]
    NotSigned,

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// A value transfer between two addresses
///
/// Transactions are immutable once built. The signature is opaque to the
/// ledger: admission checks field shape only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    /// Unique identifier for the transaction
    pub id: String,

    /// Sender's address
    pub sender: Address,

    /// Recipient's address
    pub recipient: Address,

    /// Amount being transferred
    pub amount: i64,

    /// Transaction fee
    pub fee: i64,

    /// Timestamp when the transaction was created
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    pub timestamp: DateTime<Utc>,

    /// Signature supplied by the submitter
    #[serde(default)]
    pub signature: Option<DigitalSignature>,
}

impl Transaction {
    /// Creates a new unsigned transaction stamped with the current time
    pub fn new(sender: impl Into<Address>, recipient: impl Into<Address>, amount: i64, fee: i64) -> Self {
        Transaction {
            id: Uuid::new_v4().to_string(),
            sender: sender.into(),
            recipient: recipient.into(),
            amount,
            fee,
            timestamp: clock::now(),
            signature: None,
        }
    }

    /// Creates the reward transaction paid to a miner
    pub fn reward(miner: impl Into<Address>, amount: i64) -> Self {
        Transaction::new(Address::from(SYSTEM_ADDRESS), miner, amount, 0)
    }

    /// Returns a copy of this transaction carrying `signature`
    pub fn with_signature(self, signature: DigitalSignature) -> Self {
        Transaction {
            signature: Some(signature),
            ..self
        }
    }

    /// Signs the transaction with `signer`, consuming the unsigned value
    pub fn signed_by(self, signer: &dyn Signer) -> Result<Self, TransactionError> {
        let message = self.signing_bytes()?;
        let signature = signer.sign(&message)?;
        Ok(self.with_signature(signature))
    }

    /// Canonical bytes covered by the signature
    pub fn signing_bytes(&self) -> Result<Vec<u8>, TransactionError> {
        let data = serde_json::json!({
            "id": self.id,
            "sender": self.sender.0,
            "recipient": self.recipient.0,
            "amount": self.amount,
            "fee": self.fee,
            "timestamp": self.timestamp,
        });

        serde_json::to_vec(&data)
            .map_err(|e| TransactionError::SerializationError(e.to_string()))
    }

    /// Verifies the signature against the sender address
    ///
    /// Only meaningful when the sender is an ed25519 address.
    pub fn verify_signature(&self) -> Result<bool, TransactionError> {
        let signature = self.signature.as_ref().ok_or(TransactionError::NotSigned)?;
        let message = self.signing_bytes()?;

        Ok(verify_signature(&message, signature, &self.sender)?)
    }

    /// Field-shape validation applied on admission
    ///
    /// The debit `amount + fee` must also fit in an `i64`.
    pub fn is_well_formed(&self) -> bool {
        !self.sender.is_empty()
            && !self.recipient.is_empty()
            && self.amount > 0
            && self.fee >= 0
            && self.amount.checked_add(self.fee).is_some()
    }

    pub fn is_reward(&self) -> bool {
        self.sender.0 == SYSTEM_ADDRESS
    }

    /// Gets the total amount debited from the sender (amount + fee)
    pub fn total_amount(&self) -> i64 {
        self.amount.saturating_add(self.fee)
    }
}
