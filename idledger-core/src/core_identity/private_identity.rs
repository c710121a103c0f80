//! Private identity module
//!
//! Signing half of an owned identity. The Ed25519 secret is zeroized on drop
//! (ed25519-dalek's `zeroize` feature) and never printed.

use crate::core_identity::identity::{DecodingError, Identity};
use ed25519_dalek::SigningKey;
use rand::RngCore;
use std::fmt;

/// Owned identity signing key together with its public handle
#[derive(Clone)]
pub struct PrivateIdentity {
    identity: Identity,
    signing_key: SigningKey,
}

impl PrivateIdentity {
    /// Generate a fresh identity from the given random source
    pub fn generate(rng: &mut dyn RngCore) -> Self {
        let mut seed = [0u8; 32];
        rng.fill_bytes(&mut seed);
        let identity = Self::from_secret_bytes(&seed);
        zeroize::Zeroize::zeroize(&mut seed);
        identity
    }

    /// Rebuild from a 32-byte Ed25519 seed
    pub fn from_secret_bytes(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let identity = Identity::from_verifying_key(&signing_key.verifying_key());
        PrivateIdentity { identity, signing_key }
    }

    /// Rebuild from a hex encoded seed
    pub fn from_hex(s: &str) -> Result<Self, DecodingError> {
        let bytes = hex::decode(s).map_err(|e| DecodingError::Malformed(format!("invalid hex: {}", e)))?;
        let seed: [u8; 32] = bytes.as_slice().try_into().map_err(|_| DecodingError::InvalidLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        Ok(Self::from_secret_bytes(&seed))
    }

    /// Public identity of this key
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Hex export of the secret seed (use carefully!)
    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

impl fmt::Debug for PrivateIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateIdentity")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .finish()
    }
}
