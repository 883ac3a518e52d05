use std::path::PathBuf;
use thiserror::Error;

/// Top-level error: everything a library caller can see rolls up here.
#[derive(Error, Debug)]
pub enum MaildeskError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("mailbox: {0}")]
    Email(#[from] crate::email::EmailError),

    #[error("attachment storage: {0}")]
    Storage(#[from] StorageError),

    #[error("sync: {0}")]
    Sync(#[from] crate::sync::SyncError),

    #[error("database: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config is not valid JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("invalid config: {message}")]
    Validation { message: String },

    /// The file is valid JSON but violates the config schema.
    #[error("config rejected by schema: {errors}")]
    SchemaValidation { errors: String },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("could not create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not write attachment '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not remove '{path}': {source}")]
    RemoveFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, MaildeskError>;
