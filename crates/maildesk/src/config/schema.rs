use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::secrets::expand_home;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub version: String,
    pub mailbox: MailboxConfig,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_root: Option<String>,
}

impl Config {
    /// Database location, falling back to `~/.maildesk/data/maildesk.db`
    /// when the config does not name one.
    pub fn resolve_database_path(&self) -> PathBuf {
        match &self.database_path {
            Some(p) => PathBuf::from(expand_home(p)),
            None => default_data_dir().join("maildesk.db"),
        }
    }

    /// Attachment storage root, falling back to `~/.maildesk/attachments`.
    pub fn resolve_attachment_root(&self) -> PathBuf {
        match &self.attachment_root {
            Some(p) => PathBuf::from(expand_home(p)),
            None => default_base_dir().join("attachments"),
        }
    }
}

fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .map(|p| p.join(".maildesk"))
        .unwrap_or_else(|| PathBuf::from(".maildesk"))
}

fn default_data_dir() -> PathBuf {
    default_base_dir().join("data")
}

/// IMAP mailbox connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxConfig {
    /// IMAP server to poll, e.g. "imap.fastmail.com".
    pub host: String,

    /// Defaults to 993 (IMAPS).
    #[serde(default = "default_imap_port")]
    pub port: u16,

    /// Plaintext connections are refused, so this only exists to make the
    /// refusal explicit in the config.
    #[serde(default = "default_true")]
    pub use_tls: bool,

    /// Login name, usually the support address itself.
    pub username: String,

    /// Where the password comes from.
    #[serde(default)]
    pub auth: AuthSettings,

    /// Folder to poll; "INBOX" unless the provider files support mail
    /// elsewhere.
    #[serde(default = "default_inbox")]
    pub folder: String,
}

/// Password sources for the mailbox login. At least one must be set;
/// [`resolve_password`](AuthSettings::resolve_password) tries them in the
/// order insecure > file > env var.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSettings {
    /// Name of an environment variable holding the password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env_var: Option<String>,

    /// File whose contents are the password (Docker/systemd secrets).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_file: Option<String>,

    /// The password itself, in the config file. Named to discourage use
    /// anywhere but local testing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_insecure: Option<String>,
}

/// Knobs for a single sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    /// Maximum number of messages to process per run (default: 50).
    /// Anything beyond the cap is picked up by the next run.
    #[serde(default = "default_max_messages")]
    pub max_messages_per_run: u32,

    /// Soft per-run timeout in seconds, checked between messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_timeout_secs: Option<u64>,

    /// Set \Seen on the remote copy once its ticket is committed (default: off).
    #[serde(default)]
    pub mark_seen: bool,

    /// Attachments larger than this many bytes are skipped (default: 10 MiB).
    #[serde(default = "default_max_attachment_size")]
    pub max_attachment_size: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_messages_per_run: default_max_messages(),
            run_timeout_secs: None,
            mark_seen: false,
            max_attachment_size: default_max_attachment_size(),
        }
    }
}

fn default_imap_port() -> u16 {
    993
}

fn default_true() -> bool {
    true
}

fn default_inbox() -> String {
    "INBOX".to_string()
}

fn default_max_messages() -> u32 {
    50
}

fn default_max_attachment_size() -> u64 {
    10_485_760 // 10 MiB
}
