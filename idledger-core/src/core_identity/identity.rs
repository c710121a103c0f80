//! Identity module
//!
//! Opaque, byte-comparable handle derived from an Ed25519 public key.
//! Every ledger table references identities by these raw bytes.

use ed25519_dalek::VerifyingKey;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use std::fmt;
use thiserror::Error;

/// Algorithm tag for Ed25519-backed identities
pub const ALGO_ED25519: u8 = 0x01;

/// Encoded length of an identity: tag byte + 32-byte verifying key
pub const IDENTITY_LENGTH: usize = 33;

/// Errors raised while decoding stored or imported bytes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodingError {
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("unknown identity algorithm tag 0x{0:02x}")]
    UnknownAlgorithm(u8),

    #[error("invalid public key: {0}")]
    InvalidKey(String),

    #[error("unknown revocation kind {0}")]
    UnknownRevocationKind(i64),

    #[error("malformed encoding: {0}")]
    Malformed(String),
}

/// Public identity handle
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(Vec<u8>);

impl Identity {
    /// Build the identity of an Ed25519 verifying key
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        let mut bytes = Vec::with_capacity(IDENTITY_LENGTH);
        bytes.push(ALGO_ED25519);
        bytes.extend_from_slice(key.as_bytes());
        Identity(bytes)
    }

    /// Decode an identity from its raw encoding
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodingError> {
        if bytes.len() != IDENTITY_LENGTH {
            return Err(DecodingError::InvalidLength {
                expected: IDENTITY_LENGTH,
                actual: bytes.len(),
            });
        }
        if bytes[0] != ALGO_ED25519 {
            return Err(DecodingError::UnknownAlgorithm(bytes[0]));
        }

        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes[1..]);
        VerifyingKey::from_bytes(&key).map_err(|e| DecodingError::InvalidKey(e.to_string()))?;

        Ok(Identity(bytes.to_vec()))
    }

    /// Raw encoding, as stored in the database
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Signature verification key carried by this identity
    pub fn verifying_key(&self) -> Result<VerifyingKey, DecodingError> {
        let mut key = [0u8; 32];
        key.copy_from_slice(&self.0[1..]);
        VerifyingKey::from_bytes(&key).map_err(|e| DecodingError::InvalidKey(e.to_string()))
    }

    /// Parse from base58 string
    pub fn from_string(s: &str) -> Result<Self, DecodingError> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| DecodingError::Malformed(format!("invalid base58: {}", e)))?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(&self.0).into_string())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Identity").field(&self.to_string()).finish()
    }
}

impl ToSql for Identity {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(ValueRef::Blob(&self.0)))
    }
}

impl FromSql for Identity {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Identity::from_bytes(value.as_blob()?).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}
