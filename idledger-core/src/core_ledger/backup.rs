//! Backup records
//!
//! Flat per-entity JSON records. Unknown fields are ignored on read and
//! optional fields default to absent, so older and newer writers can share
//! backups. Restore goes through the same insert paths as live operation and
//! re-validates every invariant.

use crate::core_identity::{DecodingError, GroupUid, Identity};
use crate::core_ledger::details::{DetailsFields, DetailsScope, VersionedDetails};
use crate::core_ledger::errors::{LedgerError, LedgerResult};
use crate::core_ledger::membership::GroupMembership;
use crate::core_ledger::unit_of_work::UnitOfWork;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// One details version
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionedDetailsBackup {
    pub version: i64,
    pub serialized_details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_server_label: Option<String>,
    /// Hex encoded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_server_key: Option<String>,
}

/// One membership row of a group
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupMemberBackup {
    /// Base58 encoded identity
    pub contact_identity: String,
}

/// Serialize a backup record
pub fn to_json<T: Serialize>(record: &T) -> LedgerResult<String> {
    Ok(serde_json::to_string(record)?)
}

/// Parse a backup record
pub fn from_json<T: DeserializeOwned>(json: &str) -> LedgerResult<T> {
    Ok(serde_json::from_str(json)?)
}

impl VersionedDetails {
    pub fn to_backup(&self) -> VersionedDetailsBackup {
        let (label, key) = match self.photo_server_label_and_key() {
            Some((label, key)) => (Some(label.to_string()), Some(hex::encode(key))),
            None => (None, None),
        };
        VersionedDetailsBackup {
            version: self.version(),
            serialized_details: self.serialized_details().to_string(),
            photo_url: self.photo_url().map(str::to_string),
            photo_server_label: label,
            photo_server_key: key,
        }
    }

    /// Re-insert a backed up version under `scope` at its original version
    pub fn restore(
        uow: &UnitOfWork,
        scope: &DetailsScope,
        backup: &VersionedDetailsBackup,
    ) -> LedgerResult<Self> {
        let key = backup
            .photo_server_key
            .as_deref()
            .map(hex::decode)
            .transpose()
            .map_err(|e| DecodingError::Malformed(format!("photo server key: {}", e)))?;

        let label_and_key = match (backup.photo_server_label.as_deref(), key.as_deref()) {
            (Some(label), Some(key)) => Some((label, key)),
            (None, None) => None,
            _ => {
                return Err(LedgerError::InvalidInput(
                    "photo server label and key must be both present or both absent".to_string(),
                ))
            }
        };

        VersionedDetails::insert(
            uow,
            scope,
            backup.version,
            DetailsFields {
                serialized_details: &backup.serialized_details,
                photo_url: backup.photo_url.as_deref(),
                photo_server_label_and_key: label_and_key,
            },
        )
    }
}

impl GroupMembership {
    pub fn to_backup(&self) -> GroupMemberBackup {
        GroupMemberBackup {
            contact_identity: self.member().to_string(),
        }
    }

    /// Re-add a backed up member; queues `group-member-added` like a live add
    pub fn restore(
        uow: &mut UnitOfWork,
        group_uid: &GroupUid,
        owner: &Identity,
        backup: &GroupMemberBackup,
    ) -> LedgerResult<Self> {
        let member = Identity::from_string(&backup.contact_identity)?;
        GroupMembership::add(uow, group_uid, owner, &member)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_fields_ignored() {
        let backup: VersionedDetailsBackup =
            from_json(r#"{"version":3,"serialized_details":"{}","future_field":true}"#).unwrap();
        assert_eq!(backup.version, 3);
        assert!(backup.photo_url.is_none());
        assert!(backup.photo_server_key.is_none());
    }

    #[test]
    fn test_absent_optionals_not_serialized() {
        let backup = VersionedDetailsBackup {
            version: 1,
            serialized_details: "{}".to_string(),
            ..Default::default()
        };
        let json = to_json(&backup).unwrap();
        assert!(!json.contains("photo_url"));
    }

    #[test]
    fn test_garbage_json_is_serialization_error() {
        let result: LedgerResult<GroupMemberBackup> = from_json("not json");
        assert!(matches!(result, Err(LedgerError::Serialization(_))));
    }
}
