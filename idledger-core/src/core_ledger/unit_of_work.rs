//! Unit-of-work handle
//!
//! One SQLite transaction on one pooled connection, plus the commit-hook
//! dispatcher collecting the notifications its mutations produced. Every
//! ledger operation takes the handle explicitly.
//!
//! `commit` makes the writes durable and only then posts the queued
//! notifications, synchronously, before returning. `rollback`, a failed
//! commit, or dropping the handle undoes the writes and discards the queue.

use crate::core_ledger::dispatcher::{ChangeMask, CommitHookDispatcher, HookKey, NotificationSink};
use crate::core_ledger::errors::LedgerResult;
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::sync::Arc;
use tracing::{debug, warn};

/// Open transaction plus its pending notifications
pub struct UnitOfWork {
    conn: PooledConnection<SqliteConnectionManager>,
    dispatcher: CommitHookDispatcher,
    sink: Arc<dyn NotificationSink>,
    finished: bool,
}

impl UnitOfWork {
    pub(crate) fn begin(
        conn: PooledConnection<SqliteConnectionManager>,
        sink: Arc<dyn NotificationSink>,
    ) -> LedgerResult<Self> {
        // Take the write lock up front so "read max, write max+1" cannot interleave
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Self {
            conn,
            dispatcher: CommitHookDispatcher::new(),
            sink,
            finished: false,
        })
    }

    /// Connection the transaction runs on
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Queue a notification; only call after the write statement succeeded
    pub(crate) fn register(&mut self, key: HookKey, mask: ChangeMask) {
        self.dispatcher.register(key, mask);
    }

    /// Number of entity instances with queued notifications
    pub fn pending_notifications(&self) -> usize {
        self.dispatcher.pending_count()
    }

    /// Accumulated change mask of an instance in this unit-of-work
    pub fn pending_mask(&self, key: &HookKey) -> ChangeMask {
        self.dispatcher.mask_for(key)
    }

    /// Commit, then post every queued notification exactly once.
    /// Returns the number of notifications posted.
    pub fn commit(mut self) -> LedgerResult<usize> {
        self.finished = true;

        if let Err(e) = self.conn.execute_batch("COMMIT") {
            warn!(error = %e, "Commit failed, rolling back unit-of-work");
            if !self.conn.is_autocommit() {
                let _ = self.conn.execute_batch("ROLLBACK");
            }
            self.dispatcher.discard();
            return Err(e.into());
        }

        Ok(self.dispatcher.dispatch(self.sink.as_ref()))
    }

    /// Undo every write and drop the queued notifications
    pub fn rollback(mut self) -> LedgerResult<()> {
        self.finished = true;
        self.dispatcher.discard();
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        debug!("Unit-of-work dropped without commit, rolling back");
        self.dispatcher.discard();
        if !self.conn.is_autocommit() {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!(error = %e, "Rollback of abandoned unit-of-work failed");
            }
        }
    }
}
