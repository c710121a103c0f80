//! Pre-key issuance, rotation and expiry tests

use super::helpers::*;
use crate::config::PreKeyConfig;
use crate::core_identity::{
    CryptoError, DalekCrypto, DeviceUid, EncryptionKeyPair, Identity, IdentityCrypto, PrivateIdentity,
    SignatureContext,
};
use crate::core_ledger::entities::OwnedIdentity;
use crate::core_ledger::errors::LedgerError;
use crate::core_ledger::prekey::{PreKey, PreKeyIssuer, SignedPreKey, CURRENT_CAPABILITIES};
use rand::RngCore;
use std::sync::Arc;
use std::time::Duration;

const DAY_MS: i64 = 24 * 3600 * 1000;
const NOW: i64 = 1_700_000_000_000;

fn issuer() -> PreKeyIssuer {
    PreKeyIssuer::new(Arc::new(DalekCrypto), PreKeyConfig::default())
}

fn device() -> DeviceUid {
    DeviceUid::from_bytes([0xD0; 32])
}

/// Crypto double failing at a chosen step
struct FailingCrypto {
    fail_keygen: bool,
}

impl IdentityCrypto for FailingCrypto {
    fn generate_encryption_key_pair(&self, rng: &mut dyn RngCore) -> Result<EncryptionKeyPair, CryptoError> {
        if self.fail_keygen {
            return Err(CryptoError::KeyGeneration("entropy exhausted".to_string()));
        }
        DalekCrypto.generate_encryption_key_pair(rng)
    }

    fn sign(
        &self,
        _context: SignatureContext,
        _message: &[u8],
        _signer: &PrivateIdentity,
    ) -> Result<Vec<u8>, CryptoError> {
        Err(CryptoError::Signing("hardware key unavailable".to_string()))
    }

    fn verify(
        &self,
        context: SignatureContext,
        message: &[u8],
        identity: &Identity,
        signature: &[u8],
    ) -> Result<(), CryptoError> {
        DalekCrypto.verify(context, message, identity, signature)
    }
}

#[test]
fn test_issue_persists_signed_key() {
    let store = test_store();
    let uow = store.begin().unwrap();
    let owner = seed_owner(&uow, 1);
    let mut rng = test_rng(1);

    let key = issuer()
        .issue(&uow, owner.identity(), &owner, &device(), NOW + DAY_MS, &mut rng)
        .unwrap();

    let stored = PreKey::get(&uow, key.key_id()).unwrap().unwrap();
    assert_eq!(stored.owner(), owner.identity());
    assert_eq!(stored.expiration_timestamp(), NOW + DAY_MS);
    assert_eq!(stored.private_key(), key.private_key());
    assert_eq!(stored.encoded_signed_pre_key(), key.encoded_signed_pre_key());

    let signed = stored.signed_pre_key().unwrap();
    let contents = signed.verify(&DalekCrypto, owner.identity()).unwrap();
    assert_eq!(contents.key_id, *key.key_id());
    assert_eq!(contents.device_uid, device());
    assert_eq!(contents.expiration_timestamp, NOW + DAY_MS);
    assert_eq!(contents.capabilities, CURRENT_CAPABILITIES.to_vec());
}

#[test]
fn test_signed_public_key_matches_private_key() {
    let store = test_store();
    let uow = store.begin().unwrap();
    let owner = seed_owner(&uow, 1);
    let key = issuer()
        .issue(&uow, owner.identity(), &owner, &device(), NOW, &mut test_rng(2))
        .unwrap();

    let contents = key.signed_pre_key().unwrap().contents().unwrap();
    let secret = x25519_dalek::StaticSecret::from(*key.private_key());
    let public = x25519_dalek::PublicKey::from(&secret);
    assert_eq!(contents.public_key, public.to_bytes());
}

#[test]
fn test_signature_rejected_for_other_identity() {
    let store = test_store();
    let uow = store.begin().unwrap();
    let owner = seed_owner(&uow, 1);
    let key = issuer()
        .issue(&uow, owner.identity(), &owner, &device(), NOW, &mut test_rng(3))
        .unwrap();

    let signed = key.signed_pre_key().unwrap();
    let result = signed.verify(&DalekCrypto, &test_identity(2));
    assert!(matches!(result, Err(LedgerError::Crypto(CryptoError::Verification(_)))));
}

#[test]
fn test_tampered_dictionary_fails_verification() {
    let store = test_store();
    let uow = store.begin().unwrap();
    let owner = seed_owner(&uow, 1);
    let key = issuer()
        .issue(&uow, owner.identity(), &owner, &device(), NOW, &mut test_rng(4))
        .unwrap();

    let signed = key.signed_pre_key().unwrap();
    let mut dictionary = signed.dictionary_bytes().to_vec();
    let last = dictionary.len() - 1;
    dictionary[last] ^= 0x01;
    let tampered = bincode::serialize(&(dictionary, signed.signature().to_vec())).unwrap();

    let tampered = SignedPreKey::decode(&tampered).unwrap();
    assert!(tampered.verify(&DalekCrypto, owner.identity()).is_err());
}

#[test]
fn test_two_issues_yield_distinct_keys() {
    let store = test_store();
    let uow = store.begin().unwrap();
    let owner = seed_owner(&uow, 1);
    let issuer = issuer();

    let a = issuer
        .issue(&uow, owner.identity(), &owner, &device(), NOW + DAY_MS, &mut test_rng(10))
        .unwrap();
    let b = issuer
        .issue(&uow, owner.identity(), &owner, &device(), NOW + DAY_MS, &mut test_rng(11))
        .unwrap();

    assert_ne!(a.key_id(), b.key_id());
    assert!(PreKey::get(&uow, a.key_id()).unwrap().is_some());
    assert!(PreKey::get(&uow, b.key_id()).unwrap().is_some());
    assert_eq!(PreKey::get_all(&uow, owner.identity()).unwrap().len(), 2);
}

#[test]
fn test_get_latest_ignores_insertion_order() {
    let store = test_store();
    let uow = store.begin().unwrap();
    let owner = seed_owner(&uow, 1);
    let issuer = issuer();
    let mut rng = test_rng(20);

    let later = issuer
        .issue(&uow, owner.identity(), &owner, &device(), NOW + 10 * DAY_MS, &mut rng)
        .unwrap();
    issuer
        .issue(&uow, owner.identity(), &owner, &device(), NOW + 2 * DAY_MS, &mut rng)
        .unwrap();

    let latest = PreKey::get_latest(&uow, owner.identity()).unwrap().unwrap();
    assert_eq!(latest.key_id(), later.key_id());
}

#[test]
fn test_delete_expired_boundary() {
    let store = test_store();
    let uow = store.begin().unwrap();
    let owner = seed_owner(&uow, 1);
    let issuer = issuer();
    let mut rng = test_rng(30);

    let expired = issuer
        .issue(&uow, owner.identity(), &owner, &device(), NOW - 1, &mut rng)
        .unwrap();
    let at_now = issuer
        .issue(&uow, owner.identity(), &owner, &device(), NOW, &mut rng)
        .unwrap();
    let future = issuer
        .issue(&uow, owner.identity(), &owner, &device(), NOW + 1, &mut rng)
        .unwrap();

    assert_eq!(PreKey::delete_expired(&uow, owner.identity(), NOW).unwrap(), 1);
    assert!(PreKey::get(&uow, expired.key_id()).unwrap().is_none());
    assert!(PreKey::get(&uow, at_now.key_id()).unwrap().is_some());
    assert!(PreKey::get(&uow, future.key_id()).unwrap().is_some());
}

#[test]
fn test_delete_expired_only_touches_owner() {
    let store = test_store();
    let uow = store.begin().unwrap();
    let alice = seed_owner(&uow, 1);
    let bob = seed_owner(&uow, 2);
    let issuer = issuer();
    let mut rng = test_rng(31);

    let bobs = issuer
        .issue(&uow, bob.identity(), &bob, &device(), NOW - DAY_MS, &mut rng)
        .unwrap();
    issuer
        .issue(&uow, alice.identity(), &alice, &device(), NOW - DAY_MS, &mut rng)
        .unwrap();

    assert_eq!(PreKey::delete_expired(&uow, alice.identity(), NOW).unwrap(), 1);
    assert!(PreKey::get(&uow, bobs.key_id()).unwrap().is_some());
}

#[test]
fn test_keygen_failure_writes_nothing() {
    let store = test_store();
    let uow = store.begin().unwrap();
    let owner = seed_owner(&uow, 1);
    let issuer = PreKeyIssuer::new(Arc::new(FailingCrypto { fail_keygen: true }), PreKeyConfig::default());

    let result = issuer.issue(&uow, owner.identity(), &owner, &device(), NOW, &mut test_rng(40));
    assert!(matches!(result, Err(LedgerError::Crypto(CryptoError::KeyGeneration(_)))));
    assert!(PreKey::get_all(&uow, owner.identity()).unwrap().is_empty());
}

#[test]
fn test_signing_failure_writes_nothing() {
    let store = test_store();
    let uow = store.begin().unwrap();
    let owner = seed_owner(&uow, 1);
    let issuer = PreKeyIssuer::new(Arc::new(FailingCrypto { fail_keygen: false }), PreKeyConfig::default());

    let result = issuer.issue(&uow, owner.identity(), &owner, &device(), NOW, &mut test_rng(41));
    assert!(matches!(result, Err(LedgerError::Crypto(CryptoError::Signing(_)))));
    assert!(PreKey::get_latest(&uow, owner.identity()).unwrap().is_none());
}

#[test]
fn test_issue_rejects_foreign_private_identity() {
    let store = test_store();
    let uow = store.begin().unwrap();
    let owner = seed_owner(&uow, 1);
    let intruder = test_private_identity(9);

    let result = issuer().issue(&uow, owner.identity(), &intruder, &device(), NOW, &mut test_rng(42));
    assert!(matches!(result, Err(LedgerError::InvalidInput(_))));
}

#[test]
fn test_issue_for_unknown_owner_is_foreign_key_violation() {
    let store = test_store();
    let uow = store.begin().unwrap();
    let stranger = test_private_identity(8);

    let result = issuer().issue(&uow, stranger.identity(), &stranger, &device(), NOW, &mut test_rng(43));
    assert!(matches!(result, Err(LedgerError::ConstraintViolation { .. })));
}

#[test]
fn test_rotation_overlaps_old_key() {
    let store = test_store();
    let uow = store.begin().unwrap();
    let owner = seed_owner(&uow, 1);
    let config = PreKeyConfig {
        lifetime: Duration::from_secs(10 * 24 * 3600),
        renewal_margin: Duration::from_secs(2 * 24 * 3600),
    };
    let issuer = PreKeyIssuer::new(Arc::new(DalekCrypto), config);
    let mut rng = test_rng(50);

    let first = issuer
        .rotate_if_needed(&uow, owner.identity(), &owner, &device(), NOW, &mut rng)
        .unwrap()
        .expect("no key yet, must issue");
    assert_eq!(first.expiration_timestamp(), NOW + 10 * DAY_MS);

    // well inside the lifetime
    let none = issuer
        .rotate_if_needed(&uow, owner.identity(), &owner, &device(), NOW + 5 * DAY_MS, &mut rng)
        .unwrap();
    assert!(none.is_none());

    // inside the renewal margin: a second key coexists with the first
    let second = issuer
        .rotate_if_needed(&uow, owner.identity(), &owner, &device(), NOW + 9 * DAY_MS, &mut rng)
        .unwrap()
        .expect("renewal due");
    assert_eq!(PreKey::get_all(&uow, owner.identity()).unwrap().len(), 2);
    assert_eq!(
        PreKey::get_latest(&uow, owner.identity()).unwrap().unwrap().key_id(),
        second.key_id()
    );

    PreKey::delete_expired(&uow, owner.identity(), NOW + 11 * DAY_MS).unwrap();
    assert!(PreKey::get(&uow, first.key_id()).unwrap().is_none());
    assert!(PreKey::get(&uow, second.key_id()).unwrap().is_some());
}

#[test]
fn test_renewal_check_with_extreme_timestamps() {
    let store = test_store();
    let uow = store.begin().unwrap();
    let owner = seed_owner(&uow, 1);
    let issuer = issuer();
    let mut rng = test_rng(51);

    issuer
        .issue(&uow, owner.identity(), &owner, &device(), i64::MIN, &mut rng)
        .unwrap();
    assert!(issuer.needs_renewal(&uow, owner.identity(), i64::MAX).unwrap());

    issuer
        .issue(&uow, owner.identity(), &owner, &device(), i64::MAX, &mut rng)
        .unwrap();
    assert!(!issuer.needs_renewal(&uow, owner.identity(), i64::MIN).unwrap());
}

#[test]
fn test_owner_delete_cascades_to_prekeys() {
    let store = test_store();
    let uow = store.begin().unwrap();
    let owner = seed_owner(&uow, 1);
    let key = issuer()
        .issue(&uow, owner.identity(), &owner, &device(), NOW, &mut test_rng(60))
        .unwrap();

    assert!(OwnedIdentity::delete(&uow, owner.identity()).unwrap());
    assert!(PreKey::get(&uow, key.key_id()).unwrap().is_none());
}

#[test]
fn test_corrupt_private_key_is_decoding_error() {
    let store = test_store();
    let uow = store.begin().unwrap();
    let owner = seed_owner(&uow, 1);
    let key = issuer()
        .issue(&uow, owner.identity(), &owner, &device(), NOW, &mut test_rng(70))
        .unwrap();
    uow.connection()
        .execute("UPDATE owned_pre_key SET private_key = X'0102' WHERE key_id = ?", [key.key_id()])
        .unwrap();

    assert!(matches!(PreKey::get(&uow, key.key_id()), Err(LedgerError::Decoding(_))));
    assert!(PreKey::get_all(&uow, owner.identity()).unwrap().is_empty());
}

#[test]
fn test_decode_rejects_garbage() {
    assert!(SignedPreKey::decode(&[0xFF; 3]).is_err());
}
