//! Revocation record tests

use super::helpers::*;
use crate::core_ledger::entities::KeycloakServer;
use crate::core_ledger::errors::{ConstraintKind, LedgerError};
use crate::core_ledger::revocation::{RevocationKind, RevocationRecord};

const SERVER: &str = "https://keycloak.example/realms/corp";

#[test]
fn test_records_by_server_and_identity() {
    let store = test_store();
    let uow = store.begin().unwrap();
    let owner = seed_owner(&uow, 1);
    KeycloakServer::create(&uow, owner.identity(), SERVER).unwrap();
    let mallory = test_identity(2);
    let bob = test_identity(3);

    RevocationRecord::create(&uow, owner.identity(), SERVER, &mallory, RevocationKind::Compromised, 300).unwrap();
    RevocationRecord::create(&uow, owner.identity(), SERVER, &bob, RevocationKind::LeftOrganization, 100).unwrap();
    RevocationRecord::create(&uow, owner.identity(), SERVER, &mallory, RevocationKind::LeftOrganization, 200)
        .unwrap();

    let all = RevocationRecord::get_for_server(&uow, owner.identity(), SERVER).unwrap();
    let timestamps: Vec<i64> = all.iter().map(|r| r.revocation_timestamp()).collect();
    assert_eq!(timestamps, vec![100, 200, 300]);

    let about_mallory =
        RevocationRecord::get_for_identity(&uow, owner.identity(), SERVER, &mallory).unwrap();
    let kinds: Vec<RevocationKind> = about_mallory.iter().map(|r| r.kind()).collect();
    assert_eq!(kinds, vec![RevocationKind::LeftOrganization, RevocationKind::Compromised]);
    assert!(about_mallory.iter().all(|r| r.revoked_identity() == &mallory));
}

#[test]
fn test_prune_is_strictly_older_than() {
    let store = test_store();
    let uow = store.begin().unwrap();
    let owner = seed_owner(&uow, 1);
    KeycloakServer::create(&uow, owner.identity(), SERVER).unwrap();
    for ts in [10, 20, 30] {
        RevocationRecord::create(&uow, owner.identity(), SERVER, &test_identity(2), RevocationKind::Compromised, ts)
            .unwrap();
    }

    assert_eq!(RevocationRecord::prune(&uow, 20).unwrap(), 1);
    let left: Vec<i64> = RevocationRecord::get_for_server(&uow, owner.identity(), SERVER)
        .unwrap()
        .iter()
        .map(|r| r.revocation_timestamp())
        .collect();
    assert_eq!(left, vec![20, 30]);
}

#[test]
fn test_server_delete_cascades() {
    let store = test_store();
    let uow = store.begin().unwrap();
    let owner = seed_owner(&uow, 1);
    KeycloakServer::create(&uow, owner.identity(), SERVER).unwrap();
    RevocationRecord::create(&uow, owner.identity(), SERVER, &test_identity(2), RevocationKind::Compromised, 1)
        .unwrap();

    assert!(KeycloakServer::delete(&uow, owner.identity(), SERVER).unwrap());
    assert!(RevocationRecord::get_for_server(&uow, owner.identity(), SERVER).unwrap().is_empty());
}

#[test]
fn test_record_requires_server() {
    let store = test_store();
    let uow = store.begin().unwrap();
    let owner = seed_owner(&uow, 1);

    let result =
        RevocationRecord::create(&uow, owner.identity(), SERVER, &test_identity(2), RevocationKind::Compromised, 1);
    assert!(matches!(
        result,
        Err(LedgerError::ConstraintViolation { kind: ConstraintKind::ForeignKey, .. })
    ));
}

#[test]
fn test_unknown_kind_row_is_skipped() {
    let store = test_store();
    let uow = store.begin().unwrap();
    let owner = seed_owner(&uow, 1);
    KeycloakServer::create(&uow, owner.identity(), SERVER).unwrap();
    RevocationRecord::create(&uow, owner.identity(), SERVER, &test_identity(2), RevocationKind::Compromised, 1)
        .unwrap();
    uow.connection()
        .execute(
            "INSERT INTO keycloak_revoked_identity
                 (owned_identity, server_url, revoked_identity, revocation_type, revocation_timestamp)
             VALUES (?, ?, ?, 9, 2)",
            rusqlite::params![owner.identity(), SERVER, test_identity(3)],
        )
        .unwrap();

    let records = RevocationRecord::get_for_server(&uow, owner.identity(), SERVER).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(RevocationKind::from_code(9).unwrap_err().to_string(), "unknown revocation kind 9");
}
