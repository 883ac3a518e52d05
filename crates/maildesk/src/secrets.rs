//! Mailbox password resolution.
//!
//! The auth block of a mailbox config names where the password lives rather
//! than (usually) the password itself. Sources are tried in a fixed order:
//! an inline value first (local testing), then a file (Docker / systemd
//! credentials), then an environment variable (the production default).
//! Whatever wins is wrapped in a [`SecretString`] so it never lands in
//! Debug output or logs.

use secrecy::SecretString;
use std::fs;

use crate::config::AuthSettings;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("no password source configured; set passwordEnvVar, passwordFile, or passwordInsecure")]
    NoSource,

    #[error("could not read password file '{path}': {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("environment variable '{0}' is not set")]
    EnvMissing(String),

    #[error("environment variable '{0}' is not valid UTF-8")]
    EnvNotUnicode(String),
}

impl AuthSettings {
    /// Resolves the mailbox password from the first usable source.
    ///
    /// File contents and env var values are trimmed; a secret manager or
    /// `echo` without `-n` leaves a trailing newline behind, and no IMAP
    /// password legitimately ends in one.
    pub fn resolve_password(&self) -> Result<SecretString, SecretError> {
        if let Some(value) = non_empty(&self.password_insecure) {
            return Ok(SecretString::from(value));
        }

        if let Some(path) = non_empty(&self.password_file) {
            let expanded = expand_home(path);
            let content = fs::read_to_string(&expanded)
                .map_err(|source| SecretError::FileRead { path: expanded, source })?;
            return Ok(SecretString::from(content.trim()));
        }

        if let Some(name) = non_empty(&self.password_env_var) {
            return match std::env::var(name) {
                Ok(value) => Ok(SecretString::from(value.trim())),
                Err(std::env::VarError::NotPresent) => Err(SecretError::EnvMissing(name.into())),
                Err(std::env::VarError::NotUnicode(_)) => {
                    Err(SecretError::EnvNotUnicode(name.into()))
                }
            };
        }

        Err(SecretError::NoSource)
    }

    /// True when at least one password source is set to a non-empty value.
    /// Config validation rejects mailboxes where this is false, so
    /// [`resolve_password`](Self::resolve_password) failures at connect time
    /// mean the source itself is broken, not absent.
    pub fn has_source(&self) -> bool {
        [
            &self.password_insecure,
            &self.password_file,
            &self.password_env_var,
        ]
        .into_iter()
        .any(|s| non_empty(s).is_some())
    }
}

fn non_empty(opt: &Option<String>) -> Option<&str> {
    opt.as_deref().filter(|s| !s.is_empty())
}

/// Expands a leading `~` to the user's home directory. `~user/...` is left
/// alone; use absolute paths for other accounts.
pub(crate) fn expand_home(path: &str) -> String {
    match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match dirs::home_dir() {
            Some(home) => format!("{}{}", home.display(), rest),
            None => path.to_string(),
        },
        _ => path.to_string(),
    }
}
