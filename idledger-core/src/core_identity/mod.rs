//! Identity primitives
//!
//! - [`Identity`]: public, byte-comparable handle used as a foreign key everywhere
//! - [`PrivateIdentity`]: signing half of an owned identity
//! - [`IdentityCrypto`]: capability interface for key generation and signatures

mod crypto;
mod identity;
mod ids;
mod private_identity;

pub use crypto::{CryptoError, DalekCrypto, EncryptionKeyPair, IdentityCrypto, SignatureContext};
pub use identity::{DecodingError, Identity, ALGO_ED25519, IDENTITY_LENGTH};
pub use ids::{DeviceUid, GroupUid, PreKeyId};
pub use private_identity::PrivateIdentity;
