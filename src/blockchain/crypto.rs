use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use std::fmt;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),
}

/// Identifier of a ledger participant
///
/// Any non-empty string is accepted by the ledger. Addresses produced by
/// [`Ed25519Signer`] are base58-encoded public keys and can be used to
/// verify signatures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct Address(pub String);

impl Address {
    /// Creates a new address from a public key
    pub fn from_public_key(public_key: &VerifyingKey) -> Self {
        let bytes = public_key.as_bytes();
        Address(bs58::encode(bytes).into_string())
    }

    /// Converts the address to a public key
    pub fn to_public_key(&self) -> Result<VerifyingKey, CryptoError> {
        let bytes = bs58::decode(&self.0)
            .into_vec()
            .map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        VerifyingKey::from_bytes(&bytes.try_into().map_err(|_| {
            CryptoError::InvalidPublicKey("Invalid public key bytes".to_string())
        })?)
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Address(value.to_string())
    }
}

impl From<String> for Address {
    fn from(value: String) -> Self {
        Address(value)
    }
}

/// Opaque signature carried by a transaction (base58)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DigitalSignature(pub String);

impl DigitalSignature {
    pub fn from_signature(signature: &Signature) -> Self {
        DigitalSignature(bs58::encode(signature.to_bytes()).into_string())
    }

    pub fn to_signature(&self) -> Result<Signature, CryptoError> {
        let bytes = bs58::decode(&self.0)
            .into_vec()
            .map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        let signature_bytes: [u8; 64] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidSignature("Invalid signature length".to_string())
        })?;

        Ok(Signature::from_bytes(&signature_bytes))
    }
}

/// Signing capability used by transaction submitters
///
/// The ledger never calls into this; it only carries the resulting
/// signature. Deployments that need authenticated transfers must verify
/// with [`verify_signature`] before admission.
pub trait Signer {
    /// Address that signatures from this signer verify against
    fn address(&self) -> &Address;

    /// Signs arbitrary bytes
    fn sign(&self, data: &[u8]) -> Result<DigitalSignature, CryptoError>;
}

/// ed25519 implementation of [`Signer`]
#[derive(Debug, Clone)]
pub struct Ed25519Signer {
    signing_key: SigningKey,
    address: Address,
}

impl Ed25519Signer {
    /// Creates a signer with a fresh random key
    pub fn generate() -> Self {
        let secret: [u8; 32] = rand::random();
        Self::from_bytes(&secret)
    }

    /// Creates a signer from a 32 byte secret key
    pub fn from_secret_key(secret_key_bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; 32] = secret_key_bytes.try_into().map_err(|_| {
            CryptoError::InvalidPrivateKey("Invalid private key length".to_string())
        })?;

        Ok(Self::from_bytes(&bytes))
    }

    /// Creates a signer from a hex-encoded 32 byte secret key
    pub fn from_hex(secret_key_hex: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(secret_key_hex)
            .map_err(|e| CryptoError::DecodingError(e.to_string()))?;
        Self::from_secret_key(&bytes)
    }

    /// Hex encoding accepted by [`Ed25519Signer::from_hex`]
    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    fn from_bytes(bytes: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(bytes);
        let address = Address::from_public_key(&signing_key.verifying_key());

        Self {
            signing_key,
            address,
        }
    }
}

impl Signer for Ed25519Signer {
    fn address(&self) -> &Address {
        &self.address
    }

    fn sign(&self, data: &[u8]) -> Result<DigitalSignature, CryptoError> {
        let signature = self.signing_key.sign(data);
        Ok(DigitalSignature::from_signature(&signature))
    }
}

/// Verifies a signature against a message and the signer's address
pub fn verify_signature(
    message: &[u8],
    signature: &DigitalSignature,
    address: &Address,
) -> Result<bool, CryptoError> {
    let public_key = address.to_public_key()?;
    let signature = signature.to_signature()?;

    Ok(public_key.verify(message, &signature).is_ok())
}
