#![no_main]

use idledger_core::core_ledger::backup::{self, GroupMemberBackup, VersionedDetailsBackup};
use idledger_core::core_ledger::{DetailsScope, LedgerStore, VersionedDetails};
use idledger_core::core_identity::PrivateIdentity;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(json) = std::str::from_utf8(data) else {
        return;
    };

    let _ = backup::from_json::<GroupMemberBackup>(json);

    // Restore re-validates everything the record claims
    if let Ok(record) = backup::from_json::<VersionedDetailsBackup>(json) {
        let store = match LedgerStore::memory() {
            Ok(store) => store,
            Err(_) => return,
        };
        let owner = PrivateIdentity::from_secret_bytes(&[9u8; 32]).identity().clone();
        if let Ok(uow) = store.begin() {
            let _ = VersionedDetails::restore(&uow, &DetailsScope::owned(owner), &record);
        }
    }
});
