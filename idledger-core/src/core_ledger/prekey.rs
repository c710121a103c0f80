//! Device pre-keys
//!
//! Short-lived X25519 keys announced to the server for session bootstrap.
//! The public half travels inside a signed dictionary:
//!
//! ```text
//! encoded_signed_pre_key = bincode((dictionary_bytes, signature))
//! dictionary_bytes       = bincode(BTreeMap {
//!     "capabilities" => bincode(Vec<String>),
//!     "prekey"       => bincode((key_id, public_key, device_uid, expiration)),
//! })
//! ```
//!
//! The signature covers `dictionary_bytes` under
//! [`SignatureContext::DevicePreKey`]. Several keys per owner may be live at
//! once so messages encrypted to an older key stay decryptable until it is
//! purged.

use crate::config::PreKeyConfig;
use crate::core_identity::{
    DecodingError, DeviceUid, Identity, IdentityCrypto, PreKeyId, PrivateIdentity, SignatureContext,
};
use crate::core_ledger::errors::{LedgerError, LedgerResult};
use crate::core_ledger::unit_of_work::UnitOfWork;
use crate::metrics;
use rand::RngCore;
use rusqlite::{params, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Dictionary entry holding the encoded prekey tuple
pub const DICT_KEY_PREKEY: &str = "prekey";

/// Dictionary entry holding the encoded capability list
pub const DICT_KEY_CAPABILITIES: &str = "capabilities";

/// Protocol capabilities announced with every issued pre-key
pub const CURRENT_CAPABILITIES: &[&str] = &["one_to_one_contacts", "groups_v2", "webrtc_continuous_ice"];

type PreKeyTuple = (PreKeyId, [u8; 32], DeviceUid, i64);

/// Decoded content of a signed pre-key dictionary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreKeyContents {
    pub key_id: PreKeyId,
    pub public_key: [u8; 32],
    pub device_uid: DeviceUid,
    pub expiration_timestamp: i64,
    pub capabilities: Vec<String>,
}

/// Signed dictionary as published to the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPreKey {
    dictionary: Vec<u8>,
    signature: Vec<u8>,
}

impl SignedPreKey {
    fn build(contents: &PreKeyContents) -> LedgerResult<Vec<u8>> {
        let tuple: PreKeyTuple = (
            contents.key_id,
            contents.public_key,
            contents.device_uid,
            contents.expiration_timestamp,
        );

        let mut dictionary: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        dictionary.insert(DICT_KEY_PREKEY.to_string(), bincode::serialize(&tuple)?);
        dictionary.insert(DICT_KEY_CAPABILITIES.to_string(), bincode::serialize(&contents.capabilities)?);

        Ok(bincode::serialize(&dictionary)?)
    }

    /// Parse `(dictionary_bytes, signature)`
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodingError> {
        let (dictionary, signature): (Vec<u8>, Vec<u8>) = bincode::deserialize(bytes)
            .map_err(|e| DecodingError::Malformed(format!("signed pre-key: {}", e)))?;
        Ok(Self { dictionary, signature })
    }

    pub fn encode(&self) -> LedgerResult<Vec<u8>> {
        Ok(bincode::serialize(&(&self.dictionary, &self.signature))?)
    }

    /// Exact bytes the signature covers
    pub fn dictionary_bytes(&self) -> &[u8] {
        &self.dictionary
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Decode the dictionary without checking the signature
    pub fn contents(&self) -> Result<PreKeyContents, DecodingError> {
        let dictionary: BTreeMap<String, Vec<u8>> = bincode::deserialize(&self.dictionary)
            .map_err(|e| DecodingError::Malformed(format!("pre-key dictionary: {}", e)))?;

        let tuple_bytes = dictionary
            .get(DICT_KEY_PREKEY)
            .ok_or_else(|| DecodingError::Malformed("missing prekey entry".to_string()))?;
        let (key_id, public_key, device_uid, expiration_timestamp): PreKeyTuple =
            bincode::deserialize(tuple_bytes)
                .map_err(|e| DecodingError::Malformed(format!("prekey tuple: {}", e)))?;

        let capabilities = match dictionary.get(DICT_KEY_CAPABILITIES) {
            Some(bytes) => bincode::deserialize(bytes)
                .map_err(|e| DecodingError::Malformed(format!("capabilities: {}", e)))?,
            None => Vec::new(),
        };

        Ok(PreKeyContents {
            key_id,
            public_key,
            device_uid,
            expiration_timestamp,
            capabilities,
        })
    }

    /// Check the signature against `owner` and return the decoded contents
    pub fn verify(&self, crypto: &dyn IdentityCrypto, owner: &Identity) -> LedgerResult<PreKeyContents> {
        crypto.verify(SignatureContext::DevicePreKey, &self.dictionary, owner, &self.signature)?;
        Ok(self.contents()?)
    }
}

/// Stored pre-key of an owned identity
#[derive(Clone)]
pub struct PreKey {
    key_id: PreKeyId,
    owner: Identity,
    expiration_timestamp: i64,
    private_key: Zeroizing<[u8; 32]>,
    encoded_signed_pre_key: Vec<u8>,
}

impl fmt::Debug for PreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreKey")
            .field("key_id", &self.key_id)
            .field("owner", &self.owner)
            .field("expiration_timestamp", &self.expiration_timestamp)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

const PRE_KEY_COLUMNS: &str =
    "key_id, owned_identity, expiration_timestamp, private_key, encoded_signed_pre_key";

impl PreKey {
    pub fn key_id(&self) -> &PreKeyId {
        &self.key_id
    }

    pub fn owner(&self) -> &Identity {
        &self.owner
    }

    /// Unix millis after which the key may be purged
    pub fn expiration_timestamp(&self) -> i64 {
        self.expiration_timestamp
    }

    /// X25519 decryption key (use carefully!)
    pub fn private_key(&self) -> &[u8; 32] {
        &self.private_key
    }

    /// `bincode((dictionary_bytes, signature))`, ready for upload
    pub fn encoded_signed_pre_key(&self) -> &[u8] {
        &self.encoded_signed_pre_key
    }

    pub fn signed_pre_key(&self) -> Result<SignedPreKey, DecodingError> {
        SignedPreKey::decode(&self.encoded_signed_pre_key)
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            key_id: row.get(0)?,
            owner: row.get(1)?,
            expiration_timestamp: row.get(2)?,
            private_key: Zeroizing::new(row.get::<_, [u8; 32]>(3)?),
            encoded_signed_pre_key: row.get(4)?,
        })
    }

    fn insert(&self, uow: &UnitOfWork) -> LedgerResult<()> {
        uow.connection().execute(
            &format!("INSERT INTO owned_pre_key ({}) VALUES (?, ?, ?, ?, ?)", PRE_KEY_COLUMNS),
            params![
                &self.key_id,
                &self.owner,
                self.expiration_timestamp,
                &self.private_key[..],
                &self.encoded_signed_pre_key
            ],
        )?;
        Ok(())
    }

    pub fn get(uow: &UnitOfWork, key_id: &PreKeyId) -> LedgerResult<Option<Self>> {
        let key = uow
            .connection()
            .query_row(
                &format!("SELECT {} FROM owned_pre_key WHERE key_id = ?", PRE_KEY_COLUMNS),
                params![key_id],
                Self::from_row,
            )
            .optional()?;
        Ok(key)
    }

    /// Key with the greatest expiration timestamp
    pub fn get_latest(uow: &UnitOfWork, owner: &Identity) -> LedgerResult<Option<Self>> {
        let key = uow
            .connection()
            .query_row(
                &format!(
                    "SELECT {} FROM owned_pre_key WHERE owned_identity = ?
                     ORDER BY expiration_timestamp DESC LIMIT 1",
                    PRE_KEY_COLUMNS
                ),
                params![owner],
                Self::from_row,
            )
            .optional()?;
        Ok(key)
    }

    /// Every key of `owner`, soonest expiration first; undecodable rows are skipped
    pub fn get_all(uow: &UnitOfWork, owner: &Identity) -> LedgerResult<Vec<Self>> {
        let mut stmt = uow.connection().prepare(&format!(
            "SELECT {} FROM owned_pre_key WHERE owned_identity = ? ORDER BY expiration_timestamp",
            PRE_KEY_COLUMNS
        ))?;
        let rows = stmt.query_map(params![owner], Self::from_row)?;

        let mut keys = Vec::new();
        for row in rows {
            match row {
                Ok(key) => keys.push(key),
                Err(e) => {
                    warn!(owner = %owner, error = %e, "Skipping undecodable pre-key row");
                    metrics::record_row_skipped();
                }
            }
        }
        Ok(keys)
    }

    pub fn delete(uow: &UnitOfWork, key_id: &PreKeyId) -> LedgerResult<bool> {
        let deleted =
            uow.connection().execute("DELETE FROM owned_pre_key WHERE key_id = ?", params![key_id])?;
        Ok(deleted > 0)
    }

    /// Purge keys with `expiration_timestamp < now`; a key expiring exactly at `now` is kept
    pub fn delete_expired(uow: &UnitOfWork, owner: &Identity, now: i64) -> LedgerResult<usize> {
        let deleted = uow.connection().execute(
            "DELETE FROM owned_pre_key WHERE owned_identity = ? AND expiration_timestamp < ?",
            params![owner, now],
        )?;
        if deleted > 0 {
            metrics::record_prekeys_expired(deleted as u64);
            info!(owner = %owner, deleted, "Purged expired pre-keys");
        }
        Ok(deleted)
    }
}

/// Generates, signs and stores device pre-keys
#[derive(Clone)]
pub struct PreKeyIssuer {
    crypto: Arc<dyn IdentityCrypto>,
    config: PreKeyConfig,
}

impl PreKeyIssuer {
    pub fn new(crypto: Arc<dyn IdentityCrypto>, config: PreKeyConfig) -> Self {
        Self { crypto, config }
    }

    pub fn config(&self) -> &PreKeyConfig {
        &self.config
    }

    /// Issue a new pre-key for `device_uid`, valid until `expiration_timestamp`
    ///
    /// Nothing is written when key generation or signing fails. A key id
    /// collision surfaces as a retryable `ConstraintViolation`; retry with
    /// fresh randomness.
    pub fn issue(
        &self,
        uow: &UnitOfWork,
        owner: &Identity,
        private_identity: &PrivateIdentity,
        device_uid: &DeviceUid,
        expiration_timestamp: i64,
        rng: &mut dyn RngCore,
    ) -> LedgerResult<PreKey> {
        if private_identity.identity() != owner {
            return Err(LedgerError::InvalidInput(format!(
                "private identity does not belong to {}",
                owner
            )));
        }

        let key_id = PreKeyId::random(rng);
        let key_pair = self.crypto.generate_encryption_key_pair(rng)?;

        let contents = PreKeyContents {
            key_id,
            public_key: *key_pair.public_key(),
            device_uid: *device_uid,
            expiration_timestamp,
            capabilities: CURRENT_CAPABILITIES.iter().map(|c| c.to_string()).collect(),
        };
        let dictionary = SignedPreKey::build(&contents)?;
        let signature = self.crypto.sign(SignatureContext::DevicePreKey, &dictionary, private_identity)?;
        let signed = SignedPreKey { dictionary, signature };

        let pre_key = PreKey {
            key_id,
            owner: owner.clone(),
            expiration_timestamp,
            private_key: Zeroizing::new(*key_pair.secret_key()),
            encoded_signed_pre_key: signed.encode()?,
        };
        pre_key.insert(uow)?;

        metrics::record_prekey_issued();
        debug!(owner = %owner, key_id = %key_id, device = %device_uid, expiration_timestamp, "Issued pre-key");
        Ok(pre_key)
    }

    /// Whether the latest key of `owner` expires within the renewal margin
    pub fn needs_renewal(&self, uow: &UnitOfWork, owner: &Identity, now: i64) -> LedgerResult<bool> {
        let margin = self.config.renewal_margin.as_millis() as i64;
        Ok(match PreKey::get_latest(uow, owner)? {
            Some(latest) => latest.expiration_timestamp.saturating_sub(now) <= margin,
            None => true,
        })
    }

    /// Issue a key valid for the configured lifetime when renewal is due.
    /// Older keys are left in place until [`PreKey::delete_expired`].
    pub fn rotate_if_needed(
        &self,
        uow: &UnitOfWork,
        owner: &Identity,
        private_identity: &PrivateIdentity,
        device_uid: &DeviceUid,
        now: i64,
        rng: &mut dyn RngCore,
    ) -> LedgerResult<Option<PreKey>> {
        if !self.needs_renewal(uow, owner, now)? {
            return Ok(None);
        }
        let expiration = now.saturating_add(self.config.lifetime.as_millis() as i64);
        self.issue(uow, owner, private_identity, device_uid, expiration, rng).map(Some)
    }
}
