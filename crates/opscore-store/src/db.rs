// crates/opscore-store/src/db.rs
// ============================================================================
// Module: Transactional Store
// Description: Pooled SQLite connections, transaction helpers, and advisory
//              locks.
// Purpose: Give every write path in the workspace one place to open a
//          transaction and guarantee commit-or-rollback.
// Dependencies: rusqlite, std::sync
// ============================================================================

//! ## Overview
//! [`Database`] hands out pooled [`rusqlite::Connection`]s to a thread-per-
//! request caller. `with_tx` is the only sanctioned way to mutate state that
//! feeds a projector: it opens a transaction, runs the closure, and commits
//! only if the closure returns `Ok`. Advisory locks are emulated in-process
//! (SQLite has no server-side advisory lock primitive) via
//! [`AdvisoryLockGuard`], released deterministically on `Drop`.

use std::collections::HashSet;
use std::collections::VecDeque;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::Transaction;
use thiserror::Error;

/// Errors surfaced by the transactional store.
///
/// # Invariants
/// - Variants are stable for programmatic handling by callers mapping to
///   contract reason codes.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite error.
    #[error("store db error: {0}")]
    Db(#[from] rusqlite::Error),
    /// I/O error opening or configuring the database file.
    #[error("store io error: {0}")]
    Io(String),
    /// The connection pool was exhausted within the configured wait timeout.
    #[error("store pool exhausted after waiting {waited_ms}ms")]
    PoolExhausted {
        /// How long the caller waited before giving up.
        waited_ms: u64,
    },
}

/// Configuration for the pooled SQLite store.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    pub path: PathBuf,
    /// Number of pooled connections.
    pub pool_size: usize,
    /// Busy-timeout applied to every pooled connection (ms).
    pub busy_timeout_ms: u64,
    /// Maximum time a caller waits for a free connection before failing.
    pub pool_wait_timeout: Duration,
}

impl DatabaseConfig {
    /// Builds a config pointed at `path` with sensible defaults.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            pool_size: 4,
            busy_timeout_ms: 5_000,
            pool_wait_timeout: Duration::from_secs(5),
        }
    }
}

struct Pool {
    idle: Mutex<VecDeque<Connection>>,
    available: Condvar,
    wait_timeout: Duration,
}

/// Pooled, transactional handle to the SQLite-backed store.
///
/// Cloning shares the underlying pool (`Database` is a cheap `Arc` handle).
#[derive(Clone)]
pub struct Database {
    pool: Arc<Pool>,
    advisory_locks: Arc<Mutex<HashSet<(i64, String)>>>,
}

/// A connection checked out of the pool; returned to the pool on `Drop`.
struct PooledConnection<'p> {
    pool: &'p Pool,
    conn: Option<Connection>,
}

impl std::ops::Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl std::ops::DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let mut idle = self.pool.idle.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            idle.push_back(conn);
            self.pool.available.notify_one();
        }
    }
}

impl Database {
    /// Opens (creating if needed) the database at `config.path` and fills a
    /// connection pool of `config.pool_size` entries, each in WAL mode with
    /// the configured busy timeout.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the file cannot be opened or pragmas fail.
    pub fn open(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let mut idle = VecDeque::with_capacity(config.pool_size);
        for _ in 0..config.pool_size {
            let conn = Connection::open_with_flags(
                &config.path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            conn.pragma_update(None, "journal_mode", "wal")?;
            conn.pragma_update(None, "synchronous", "normal")?;
            conn.pragma_update(None, "foreign_keys", true)?;
            conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
            idle.push_back(conn);
        }
        Ok(Self {
            pool: Arc::new(Pool {
                idle: Mutex::new(idle),
                available: Condvar::new(),
                wait_timeout: config.pool_wait_timeout,
            }),
            advisory_locks: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Opens an in-memory database; useful for tests and the CLI's
    /// ephemeral mode.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the in-memory database cannot be opened.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let mut idle = VecDeque::with_capacity(1);
        idle.push_back(conn);
        Ok(Self {
            pool: Arc::new(Pool {
                idle: Mutex::new(idle),
                available: Condvar::new(),
                wait_timeout: Duration::from_secs(5),
            }),
            advisory_locks: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    fn checkout(&self) -> Result<PooledConnection<'_>, StoreError> {
        let mut idle = self.pool.idle.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        loop {
            if let Some(conn) = idle.pop_front() {
                return Ok(PooledConnection { pool: &self.pool, conn: Some(conn) });
            }
            let (guard, timed_out) = self
                .pool
                .available
                .wait_timeout(idle, self.pool.wait_timeout)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            idle = guard;
            if timed_out.timed_out() && idle.is_empty() {
                return Err(StoreError::PoolExhausted {
                    waited_ms: self.pool.wait_timeout.as_millis() as u64,
                });
            }
        }
    }

    /// Runs `f` inside a transaction on a pooled connection, committing if
    /// `f` returns `Ok` and rolling back (via `Transaction`'s `Drop`)
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when a connection cannot be checked out, the
    /// transaction cannot be opened/committed, or propagates `E` from `f`.
    pub fn with_tx<T, E>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut conn = self.checkout().map_err(E::from)?;
        let tx = conn.transaction().map_err(|e| E::from(StoreError::Db(e)))?;
        let result = f(&tx)?;
        tx.commit().map_err(|e| E::from(StoreError::Db(e)))?;
        Ok(result)
    }

    /// Runs `f` with a plain (non-transactional) connection; used for
    /// read-only query paths.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when a connection cannot be checked out or `f`
    /// fails.
    pub fn with_conn<T, E>(&self, f: impl FnOnce(&Connection) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let conn = self.checkout().map_err(E::from)?;
        f(&conn)
    }

    /// Attempts to acquire an advisory lock scoped to `(namespace, key)`.
    /// Returns `None` if already held by another caller in this process.
    /// The lock is released when the returned guard is dropped.
    #[must_use]
    pub fn try_advisory_lock(&self, namespace: i64, key: impl Into<String>) -> Option<AdvisoryLockGuard> {
        let key = key.into();
        let mut locks = self.advisory_locks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if locks.insert((namespace, key.clone())) {
            Some(AdvisoryLockGuard { locks: Arc::clone(&self.advisory_locks), namespace, key })
        } else {
            None
        }
    }
}

/// Scoped acquisition for an in-process advisory lock; releases on `Drop`
/// regardless of the exit path (panic unwinding, early return, or success).
pub struct AdvisoryLockGuard {
    locks: Arc<Mutex<HashSet<(i64, String)>>>,
    namespace: i64,
    key: String,
}

impl Drop for AdvisoryLockGuard {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        locks.remove(&(self.namespace, self.key.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::Database;
    use super::DatabaseConfig;

    #[test]
    fn open_persists_across_reopen_of_the_same_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ops.sqlite3");

        let db = Database::open(&DatabaseConfig::new(&path)).expect("open");
        db.with_conn::<_, super::StoreError>(|conn| {
            conn.execute_batch("CREATE TABLE t (v INTEGER)")?;
            conn.execute("INSERT INTO t (v) VALUES (1)", [])?;
            Ok(())
        })
        .expect("seed table");
        drop(db);

        let reopened = Database::open(&DatabaseConfig::new(&path)).expect("reopen");
        let count: i64 = reopened
            .with_conn::<_, super::StoreError>(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))?))
            .expect("count");
        assert_eq!(count, 1);
    }

    #[test]
    fn advisory_lock_excludes_concurrent_holder() {
        let db = Database::open_in_memory().expect("open");
        let first = db.try_advisory_lock(215, "run_1").expect("first acquire");
        assert!(db.try_advisory_lock(215, "run_1").is_none());
        drop(first);
        assert!(db.try_advisory_lock(215, "run_1").is_some());
    }

    #[test]
    fn advisory_lock_is_scoped_by_namespace_and_key() {
        let db = Database::open_in_memory().expect("open");
        let _a = db.try_advisory_lock(215, "run_1").expect("acquire a");
        assert!(db.try_advisory_lock(216, "run_1").is_some());
        assert!(db.try_advisory_lock(215, "run_2").is_some());
    }

    #[test]
    fn with_tx_rolls_back_on_error() {
        let db = Database::open_in_memory().expect("open");
        db.with_conn::<_, super::StoreError>(|conn| {
            conn.execute_batch("CREATE TABLE t (v INTEGER)")?;
            Ok(())
        })
        .expect("create table");

        let result: Result<(), super::StoreError> = db.with_tx(|tx| {
            tx.execute("INSERT INTO t (v) VALUES (1)", [])?;
            Err(super::StoreError::Io("boom".into()))
        });
        assert!(result.is_err());

        let count: i64 = db
            .with_conn::<_, super::StoreError>(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))?)
            })
            .expect("count");
        assert_eq!(count, 0);
    }
}
