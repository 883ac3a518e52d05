use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Rejection for a run started while another is in flight.
    #[error("A sync run is already in progress")]
    AlreadyRunning,

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Mailbox error: {0}")]
    Email(#[from] crate::email::EmailError),

    #[error("Storage error: {0}")]
    Storage(#[from] crate::error::StorageError),
}

pub type Result<T> = std::result::Result<T, SyncError>;
