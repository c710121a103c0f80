//! Crypto capability
//!
//! The ledger never touches primitives directly. Key generation, signing and
//! verification go through [`IdentityCrypto`] so the production backend
//! (ed25519-dalek / x25519-dalek) can be swapped for test doubles.

use crate::core_identity::identity::Identity;
use crate::core_identity::private_identity::PrivateIdentity;
use ed25519_dalek::{Signature, Signer};
use rand::RngCore;
use std::fmt;
use thiserror::Error;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Errors from the crypto capability
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("signature verification failed: {0}")]
    Verification(String),
}

/// Signature domains. The prefix is mixed into every signed message so a
/// signature produced for one purpose never verifies for another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureContext {
    /// Signed dictionary of a device pre-key
    DevicePreKey,
}

impl SignatureContext {
    /// Fixed domain-separation prefix
    pub fn prefix(&self) -> &'static [u8] {
        match self {
            SignatureContext::DevicePreKey => b"idledger/signature/device-pre-key/v1",
        }
    }

    fn bind(&self, message: &[u8]) -> Vec<u8> {
        let prefix = self.prefix();
        let mut bound = Vec::with_capacity(prefix.len() + message.len());
        bound.extend_from_slice(prefix);
        bound.extend_from_slice(message);
        bound
    }
}

/// X25519 key pair used to decrypt messages addressed to a pre-key
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKeyPair {
    public: [u8; 32],
    secret: [u8; 32],
}

impl EncryptionKeyPair {
    /// Compact encoding of the public key
    pub fn public_key(&self) -> &[u8; 32] {
        &self.public
    }

    /// Private decryption key (use carefully!)
    pub fn secret_key(&self) -> &[u8; 32] {
        &self.secret
    }
}

impl fmt::Debug for EncryptionKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKeyPair")
            .field("public", &hex::encode(self.public))
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Cryptographic operations the ledger depends on
pub trait IdentityCrypto: Send + Sync {
    /// Generate a fresh asymmetric encryption key pair
    fn generate_encryption_key_pair(
        &self,
        rng: &mut dyn RngCore,
    ) -> Result<EncryptionKeyPair, CryptoError>;

    /// Sign `message` with the owner's signing key, bound to `context`
    fn sign(
        &self,
        context: SignatureContext,
        message: &[u8],
        signer: &PrivateIdentity,
    ) -> Result<Vec<u8>, CryptoError>;

    /// Verify a signature produced by [`IdentityCrypto::sign`]
    fn verify(
        &self,
        context: SignatureContext,
        message: &[u8],
        identity: &Identity,
        signature: &[u8],
    ) -> Result<(), CryptoError>;
}

/// Production backend on ed25519-dalek and x25519-dalek
#[derive(Debug, Clone, Copy, Default)]
pub struct DalekCrypto;

impl IdentityCrypto for DalekCrypto {
    fn generate_encryption_key_pair(
        &self,
        rng: &mut dyn RngCore,
    ) -> Result<EncryptionKeyPair, CryptoError> {
        let mut secret_bytes = [0u8; 32];
        rng.fill_bytes(&mut secret_bytes);

        let secret = StaticSecret::from(secret_bytes);
        secret_bytes.zeroize();
        let public = X25519PublicKey::from(&secret);

        if public.as_bytes().iter().all(|b| *b == 0) {
            return Err(CryptoError::KeyGeneration("degenerate public key".to_string()));
        }

        Ok(EncryptionKeyPair {
            public: public.to_bytes(),
            secret: secret.to_bytes(),
        })
    }

    fn sign(
        &self,
        context: SignatureContext,
        message: &[u8],
        signer: &PrivateIdentity,
    ) -> Result<Vec<u8>, CryptoError> {
        let signature = signer
            .signing_key()
            .try_sign(&context.bind(message))
            .map_err(|e| CryptoError::Signing(e.to_string()))?;
        Ok(signature.to_bytes().to_vec())
    }

    fn verify(
        &self,
        context: SignatureContext,
        message: &[u8],
        identity: &Identity,
        signature: &[u8],
    ) -> Result<(), CryptoError> {
        let verifying_key = identity
            .verifying_key()
            .map_err(|e| CryptoError::Verification(e.to_string()))?;
        let signature =
            Signature::from_slice(signature).map_err(|e| CryptoError::Verification(e.to_string()))?;

        verifying_key
            .verify_strict(&context.bind(message), &signature)
            .map_err(|e| CryptoError::Verification(e.to_string()))
    }
}
