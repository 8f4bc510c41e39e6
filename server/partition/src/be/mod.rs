//! The backing store. Every table of a partition lives in one SQLite
//! database. Tables are ordered key/value maps whose ordering is the byte
//! order of the encoded keys, so SQLite's own b-tree does the ordered
//! positioning that cursors and range counts need.
//!
//! A transaction is held open on the connection at all times. Mutations
//! accumulate in it until [`Db::sync`] commits and opens the next one.

use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{Connection, OpenFlags};

use crate::prelude::*;

pub mod codec;
pub mod dbentry;
pub mod index;
pub mod master;
pub mod table;

#[allow(clippy::needless_pass_by_value)] // needs to accept value from `map_err`
pub(crate) fn sqlite_error(e: rusqlite::Error) -> OperationError {
    admin_error!(?e, "SQLite Error");
    OperationError::SqliteError
}

#[allow(clippy::needless_pass_by_value)] // needs to accept value from `map_err`
pub(crate) fn serde_json_error(e: serde_json::Error) -> OperationError {
    admin_error!(?e, "Serde JSON Error");
    OperationError::SerdeJsonError
}

/// A shared handle to the partition database.
#[derive(Debug, Clone)]
pub struct Db {
    conn: Arc<Mutex<Option<Connection>>>,
    path: Arc<str>,
}

impl Db {
    /// Open the database at `path`. An empty path gives a private in memory
    /// database.
    pub fn open(path: &str) -> Result<Self, OperationError> {
        let conn = if path.is_empty() {
            Connection::open_in_memory().map_err(sqlite_error)?
        } else {
            let flags = OpenFlags::default();
            let conn = Connection::open_with_flags(path, flags).map_err(sqlite_error)?;
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;
                 PRAGMA synchronous=NORMAL;",
            )
            .map_err(sqlite_error)?;
            conn
        };

        conn.execute("BEGIN TRANSACTION", []).map_err(sqlite_error)?;
        admin_debug!(?path, "opened partition database");

        Ok(Db {
            conn: Arc::new(Mutex::new(Some(conn))),
            path: Arc::from(path),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>, OperationError> {
        self.conn.lock().map_err(|_| {
            admin_error!("partition database mutex poisoned");
            OperationError::BackendEngine
        })
    }

    /// Run `f` against the connection. The lock is held only for the
    /// duration of `f`.
    pub(crate) fn with_conn<T, F>(&self, f: F) -> Result<T, OperationError>
    where
        F: FnOnce(&Connection) -> Result<T, OperationError>,
    {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or_else(|| {
            admin_error!("partition database is closed");
            OperationError::InvalidState
        })?;
        f(conn)
    }

    /// Commit everything written so far and begin a new transaction.
    #[instrument(level = "debug", name = "db::sync", skip_all)]
    pub fn sync(&self) -> Result<(), OperationError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "COMMIT TRANSACTION;
                 BEGIN TRANSACTION;",
            )
            .map_err(|e| {
                admin_error!(?e, "CRITICAL: failed to commit sqlite txn");
                OperationError::BackendEngine
            })
        })
    }

    /// Commit and close. Further use of any handle to this database fails.
    pub fn close(&self) -> Result<(), OperationError> {
        let mut guard = self.lock()?;
        match guard.take() {
            Some(conn) => {
                conn.execute("COMMIT TRANSACTION", []).map_err(sqlite_error)?;
                conn.close().map_err(|(_conn, e)| sqlite_error(e))
            }
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().map(|g| g.is_none()).unwrap_or(true)
    }
}
