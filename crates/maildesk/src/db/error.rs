use std::path::PathBuf;
use thiserror::Error;

/// Error type shared by the whole db layer.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Filesystem work around the database file (parent directories etc).
    #[error("io error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("migration v{version} failed: {reason}")]
    Migration { version: u32, reason: String },

    /// One day's ticket-number sequence ran out of retry room.
    #[error("could not allocate a ticket number for {date}")]
    TicketNumberExhausted { date: String },

    #[error("database mutex poisoned")]
    LockPoisoned,
}
