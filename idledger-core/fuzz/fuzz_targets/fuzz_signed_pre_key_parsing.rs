#![no_main]

use idledger_core::core_identity::{DalekCrypto, PrivateIdentity};
use idledger_core::core_ledger::SignedPreKey;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Stored signed pre-keys come back from disk; malformed blobs must
    // surface as decoding errors
    if let Ok(signed) = SignedPreKey::decode(data) {
        let _ = signed.contents();

        let owner = PrivateIdentity::from_secret_bytes(&[7u8; 32]);
        let _ = signed.verify(&DalekCrypto, owner.identity());
    }
});
