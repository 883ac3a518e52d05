use thiserror::Error;

/// Failures while talking to the mail server or decoding what it sent.
#[derive(Error, Debug)]
pub enum EmailError {
    #[error("could not reach the IMAP server: {0}")]
    ConnectionFailed(String),

    #[error("TLS handshake failed: {0}")]
    TlsError(String),

    #[error("login rejected: {0}")]
    AuthenticationFailed(String),

    /// The configured password source exists but did not yield a value.
    #[error("mailbox password unavailable: {0}")]
    CredentialsNotFound(String),

    #[error("IMAP protocol error: {0}")]
    ProtocolError(String),

    #[error("message did not parse: {0}")]
    ParseError(String),

    #[error("folder '{0}' does not exist on the server")]
    FolderNotFound(String),

    /// The message disappeared between UID SEARCH and UID FETCH
    /// (expunged by another client).
    #[error("UID {0} vanished before it could be fetched")]
    MessageNotFound(u32),

    #[error("mailbox config rejected: {0}")]
    ConfigError(String),

    #[error("io: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<async_native_tls::Error> for EmailError {
    fn from(err: async_native_tls::Error) -> Self {
        EmailError::TlsError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EmailError>;
