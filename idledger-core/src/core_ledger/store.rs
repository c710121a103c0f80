//! Ledger store
//!
//! Owns the connection pool and the notification sink, runs migrations on
//! open and hands out [`UnitOfWork`] handles.

use crate::config::StoreConfig;
use crate::core_ledger::dispatcher::{NotificationSink, NullSink};
use crate::core_ledger::errors::{LedgerError, LedgerResult};
use crate::core_ledger::migrations;
use crate::core_ledger::unit_of_work::UnitOfWork;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// SQL-backed identity ledger
#[derive(Clone)]
pub struct LedgerStore {
    pool: Pool<SqliteConnectionManager>,
    sink: Arc<dyn NotificationSink>,
}

fn with_pragmas(manager: SqliteConnectionManager, busy_timeout: Duration) -> SqliteConnectionManager {
    manager.with_init(move |conn| {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
    })
}

impl LedgerStore {
    /// Create a store on an existing pool; runs pending migrations
    pub fn new(
        pool: Pool<SqliteConnectionManager>,
        sink: Arc<dyn NotificationSink>,
    ) -> LedgerResult<Self> {
        migrations::migrate(&pool)?;
        Ok(Self { pool, sink })
    }

    /// Open the store described by `config`
    pub fn open(config: &StoreConfig, sink: Arc<dyn NotificationSink>) -> LedgerResult<Self> {
        match &config.database_path {
            Some(path) => {
                let manager = with_pragmas(SqliteConnectionManager::file(path), config.busy_timeout);
                let pool = Pool::builder().max_size(config.pool_max_size).build(manager)?;
                {
                    let conn = pool.get()?;
                    let mode: String =
                        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
                    if !mode.eq_ignore_ascii_case("wal") {
                        warn!(journal_mode = %mode, "WAL journal mode unavailable");
                    }
                }
                info!(path = %path.display(), "Opening identity ledger");
                Self::new(pool, sink)
            }
            None => Self::memory_with_sink(sink),
        }
    }

    /// In-memory store. A single pooled connection keeps every unit-of-work
    /// on the same database.
    pub fn memory_with_sink(sink: Arc<dyn NotificationSink>) -> LedgerResult<Self> {
        let manager = with_pragmas(SqliteConnectionManager::memory(), Duration::from_secs(5));
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| LedgerError::Storage(format!("Failed to create pool: {}", e)))?;
        Self::new(pool, sink)
    }

    /// In-memory store discarding notifications
    pub fn memory() -> LedgerResult<Self> {
        Self::memory_with_sink(Arc::new(NullSink))
    }

    /// Open a new unit-of-work
    pub fn begin(&self) -> LedgerResult<UnitOfWork> {
        let conn = self.pool.get()?;
        UnitOfWork::begin(conn, self.sink.clone())
    }

    /// Run `f` in its own unit-of-work: commit on `Ok`, roll back on `Err`
    pub fn run<T>(
        &self,
        f: impl FnOnce(&mut UnitOfWork) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let mut uow = self.begin()?;
        match f(&mut uow) {
            Ok(value) => {
                uow.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = uow.rollback() {
                    warn!(error = %rollback_err, "Rollback failed after operation error");
                }
                Err(e)
            }
        }
    }

    /// Applied schema version
    pub fn schema_version(&self) -> LedgerResult<i32> {
        let conn = self.pool.get()?;
        migrations::get_current_version(&conn)
    }
}
