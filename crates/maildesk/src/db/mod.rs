//! SQLite persistence for tickets, replies, attachments, and sync audit rows.
//!
//! A single [`Database`] handle owns the connection behind `Arc<Mutex<..>>`;
//! SQLite serializes writers anyway, so one guarded connection keeps the
//! concurrency story simple. Files open in WAL mode so readers are not
//! blocked mid-run.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, Transaction};

pub mod attachment_repo;
pub mod error;
pub mod migrations;
pub mod reply_repo;
pub mod sync_run_repo;
pub mod ticket_repo;

pub use error::DatabaseError;

/// Cheap-to-clone handle over the one shared connection. Migrations run on
/// open, so a handle always sees the latest schema.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (creating if needed) the database file, bootstrapping its
    /// parent directory first.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        log::info!("ticket database at {}", path.display());
        Self::finish_open(conn)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::finish_open(conn)
    }

    fn finish_open(conn: Connection) -> Result<Self, DatabaseError> {
        migrations::run_all(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` with the locked connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }

    /// Runs `f` inside a transaction: commit on `Ok`, rollback (via drop)
    /// on `Err`. The error type is generic so one closure can mix repo
    /// calls with other fallible steps and still abort as a unit.
    pub fn with_tx<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Transaction) -> Result<T, E>,
        E: From<DatabaseError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| E::from(DatabaseError::LockPoisoned))?;
        let tx = conn
            .transaction()
            .map_err(|e| E::from(DatabaseError::from(e)))?;
        let result = f(&tx)?;
        tx.commit().map_err(|e| E::from(DatabaseError::from(e)))?;
        Ok(result)
    }
}
