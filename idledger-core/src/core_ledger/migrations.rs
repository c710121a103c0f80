//! Database migrations for the identity ledger
//!
//! Each migration is applied atomically and tracked in `ledger_schema_version`.

use crate::core_ledger::errors::LedgerResult;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

/// Current schema version of the ledger
pub const CURRENT_LEDGER_SCHEMA_VERSION: i32 = 2;

/// Migration descriptor
pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub up_sql: &'static str,
}

/// All available migrations in order
pub fn get_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Identities, versioned details, pre-keys and group membership",
            up_sql: r#"
                CREATE TABLE IF NOT EXISTS owned_identity (
                    identity BLOB PRIMARY KEY,              -- Identity (tag + key)
                    published_details_version INTEGER NOT NULL DEFAULT 0,
                    latest_details_version INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS contact_identity (
                    contact_identity BLOB NOT NULL,
                    owned_identity BLOB NOT NULL,
                    published_details_version INTEGER NOT NULL DEFAULT 0,
                    trusted_details_version INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (contact_identity, owned_identity),
                    FOREIGN KEY (owned_identity) REFERENCES owned_identity(identity) ON DELETE CASCADE
                );

                CREATE INDEX IF NOT EXISTS idx_contact_identity_owner ON contact_identity(owned_identity);

                CREATE TABLE IF NOT EXISTS contact_group (
                    group_uid BLOB NOT NULL,                -- GroupUid (32 bytes)
                    owned_identity BLOB NOT NULL,
                    created_at INTEGER NOT NULL,
                    PRIMARY KEY (group_uid, owned_identity),
                    FOREIGN KEY (owned_identity) REFERENCES owned_identity(identity) ON DELETE CASCADE
                );

                CREATE TABLE IF NOT EXISTS owned_identity_details (
                    owned_identity BLOB NOT NULL,
                    version INTEGER NOT NULL CHECK(version >= 1),
                    serialized_details TEXT NOT NULL,
                    photo_url TEXT,
                    photo_server_label TEXT,
                    photo_server_key BLOB,
                    PRIMARY KEY (owned_identity, version),
                    CHECK((photo_server_label IS NULL) = (photo_server_key IS NULL))
                );

                CREATE TABLE IF NOT EXISTS contact_identity_details (
                    contact_identity BLOB NOT NULL,
                    owned_identity BLOB NOT NULL,
                    version INTEGER NOT NULL CHECK(version >= 1),
                    serialized_details TEXT NOT NULL,
                    photo_url TEXT,
                    photo_server_label TEXT,
                    photo_server_key BLOB,
                    PRIMARY KEY (contact_identity, owned_identity, version),
                    CHECK((photo_server_label IS NULL) = (photo_server_key IS NULL))
                );

                CREATE INDEX IF NOT EXISTS idx_contact_details_owner ON contact_identity_details(owned_identity);

                CREATE TABLE IF NOT EXISTS owned_pre_key (
                    key_id BLOB PRIMARY KEY,                -- PreKeyId (32 bytes)
                    owned_identity BLOB NOT NULL,
                    expiration_timestamp INTEGER NOT NULL,
                    private_key BLOB NOT NULL,
                    encoded_signed_pre_key BLOB NOT NULL,
                    FOREIGN KEY (owned_identity) REFERENCES owned_identity(identity) ON DELETE CASCADE
                );

                CREATE INDEX IF NOT EXISTS idx_owned_pre_key_expiration
                    ON owned_pre_key(owned_identity, expiration_timestamp);

                CREATE TABLE IF NOT EXISTS contact_group_members_join (
                    group_uid BLOB NOT NULL,
                    owned_identity BLOB NOT NULL,
                    contact_identity BLOB NOT NULL,
                    PRIMARY KEY (group_uid, owned_identity, contact_identity),
                    FOREIGN KEY (group_uid, owned_identity)
                        REFERENCES contact_group(group_uid, owned_identity) ON DELETE CASCADE,
                    FOREIGN KEY (contact_identity, owned_identity)
                        REFERENCES contact_identity(contact_identity, owned_identity) ON DELETE CASCADE
                );

                CREATE INDEX IF NOT EXISTS idx_group_members_contact
                    ON contact_group_members_join(contact_identity, owned_identity);
            "#,
        },
        Migration {
            version: 2,
            description: "Keycloak servers and revoked identities",
            up_sql: r#"
                CREATE TABLE IF NOT EXISTS keycloak_server (
                    server_url TEXT NOT NULL,
                    owned_identity BLOB NOT NULL,
                    PRIMARY KEY (server_url, owned_identity),
                    FOREIGN KEY (owned_identity) REFERENCES owned_identity(identity) ON DELETE CASCADE
                );

                CREATE TABLE IF NOT EXISTS keycloak_revoked_identity (
                    row_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    owned_identity BLOB NOT NULL,
                    server_url TEXT NOT NULL,
                    revoked_identity BLOB NOT NULL,
                    revocation_type INTEGER NOT NULL,
                    revocation_timestamp INTEGER NOT NULL,
                    FOREIGN KEY (server_url, owned_identity)
                        REFERENCES keycloak_server(server_url, owned_identity) ON DELETE CASCADE
                );

                CREATE INDEX IF NOT EXISTS idx_revoked_identity_lookup
                    ON keycloak_revoked_identity(owned_identity, server_url, revoked_identity);
                CREATE INDEX IF NOT EXISTS idx_revoked_identity_timestamp
                    ON keycloak_revoked_identity(revocation_timestamp);
            "#,
        },
    ]
}

fn ensure_version_table(conn: &Connection) -> LedgerResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS ledger_schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;
    Ok(())
}

/// Get current schema version from database
pub fn get_current_version(conn: &Connection) -> LedgerResult<i32> {
    ensure_version_table(conn)?;

    let version: Option<i32> = conn
        .query_row(
            "SELECT version FROM ledger_schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    Ok(version.unwrap_or(0))
}

/// Run all pending migrations
pub fn migrate(pool: &Pool<SqliteConnectionManager>) -> LedgerResult<()> {
    let conn = pool.get()?;
    let current_version = get_current_version(&conn)?;

    let pending_migrations: Vec<_> =
        get_migrations().into_iter().filter(|m| m.version > current_version).collect();

    for migration in pending_migrations {
        let tx = conn.unchecked_transaction()?;

        tx.execute_batch(migration.up_sql)?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();

        tx.execute(
            "INSERT INTO ledger_schema_version (version, applied_at) VALUES (?, ?)",
            params![migration.version, now],
        )?;

        tx.commit()?;

        info!(
            version = migration.version,
            description = migration.description,
            "Applied ledger migration"
        );
    }

    Ok(())
}

/// Get the latest migration version available
pub fn get_latest_version() -> i32 {
    get_migrations().iter().map(|m| m.version).max().unwrap_or(0)
}
