pub mod config;
pub mod db;
pub mod email;
pub mod error;
pub mod maintenance;
pub mod secrets;
pub mod storage;
pub mod sync;

pub use config::{load_config, Config};
pub use db::Database;
pub use email::{EmailParser, MailboxClient, ParsedEmail};
pub use error::{ConfigError, MaildeskError, Result, StorageError};
pub use maintenance::{cleanup_archived, CleanupReport};
pub use secrets::SecretError;
pub use storage::AttachmentStore;
pub use sync::{ConnectionReport, RunStatus, SyncEngine, SyncError, SyncReport};
