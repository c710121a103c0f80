//! Fixed-length identifiers used by the ledger

use crate::core_identity::identity::DecodingError;
use rand::RngCore;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! uid_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            /// Draw a new identifier from the given random source
            pub fn random(rng: &mut dyn RngCore) -> Self {
                let mut id = [0u8; 32];
                rng.fill_bytes(&mut id);
                $name(id)
            }

            /// Create from bytes
            pub fn from_bytes(bytes: [u8; 32]) -> Self {
                $name(bytes)
            }

            /// Decode a stored column, checking its length
            pub fn from_slice(bytes: &[u8]) -> Result<Self, DecodingError> {
                let arr: [u8; 32] = bytes.try_into().map_err(|_| DecodingError::InvalidLength {
                    expected: 32,
                    actual: bytes.len(),
                })?;
                Ok($name(arr))
            }

            /// Get bytes representation
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Parse from hex string
            pub fn from_hex(s: &str) -> Result<Self, DecodingError> {
                let bytes = hex::decode(s)
                    .map_err(|e| DecodingError::Malformed(format!("invalid hex: {}", e)))?;
                Self::from_slice(&bytes)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(self.0))
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                $name(bytes)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::Borrowed(ValueRef::Blob(&self.0)))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                $name::from_slice(value.as_blob()?).map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

uid_type!(
    /// Identifies one device of an owned identity
    DeviceUid
);

uid_type!(
    /// Identifies a contact group, scoped by its owned identity
    GroupUid
);

uid_type!(
    /// Primary key of a pre-key, drawn at random on issuance
    PreKeyId
);
