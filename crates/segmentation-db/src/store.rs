use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Transaction, TransactionBehavior};
use segmentation_common::{Error, Result};
use segmentation_config::DatabaseConfig;
use tracing::{debug, info, warn};

use crate::migrations::MIGRATIONS;

/// Pooled SQLite persistence for users, segments, assignments and history.
///
/// All access goes through [`SegmentStore::read`] or [`SegmentStore::write`],
/// which run a closure inside a transaction that commits only when the closure
/// returns `Ok`.
#[derive(Clone)]
pub struct SegmentStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SegmentStore {
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        let db_path = config.path.as_path();
        info!("opening segment store at {}", db_path.display());

        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let manager = SqliteConnectionManager::file(db_path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        });

        let pool = Pool::builder()
            .max_size(config.pool_size)
            .build(manager)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        let store = Self { pool };
        store.run_migrations()?;
        Ok(store)
    }

    /// Single-connection in-memory store. The connection is never recycled,
    /// otherwise the database would vanish with it.
    pub fn in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys=ON;"));

        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        let store = Self { pool };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.connection()?;
        for migration in MIGRATIONS {
            conn.execute_batch(migration.sql).map_err(|e| {
                Error::Database(format!("migration {} failed: {e}", migration.name))
            })?;
            debug!(
                version = migration.version,
                name = migration.name,
                "schema applied"
            );
        }
        Ok(())
    }

    fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| Error::Database(format!("failed to acquire connection: {e}")))
    }

    /// Run `f` in a deferred transaction. Used for snapshot-consistent reads.
    pub fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        self.in_transaction(TransactionBehavior::Deferred, f)
    }

    /// Run `f` in an immediate (write-locking) transaction.
    pub fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        self.in_transaction(TransactionBehavior::Immediate, f)
    }

    fn in_transaction<T, F>(&self, behavior: TransactionBehavior, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.connection()?;
        let tx = conn
            .transaction_with_behavior(behavior)
            .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;

        match f(&tx) {
            Ok(value) => {
                tx.commit()
                    .map_err(|e| Error::Database(format!("failed to commit transaction: {e}")))?;
                Ok(value)
            }
            Err(e) => {
                debug!("rolling back transaction: {e}");
                if let Err(rollback_err) = tx.rollback() {
                    warn!("failed to roll back transaction: {rollback_err}");
                }
                Err(e)
            }
        }
    }
}

/// True when a statement failed on a UNIQUE or PRIMARY KEY constraint.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        }
        _ => false,
    }
}
