//! IMAP access to the support mailbox.
//!
//! One [`MailboxClient`] lives for one sync run: connect, EXAMINE, list,
//! fetch, then disconnect on every exit path. All fetches use BODY.PEEK[]
//! so polling never flips \Seen behind the operators' backs.

use async_imap::Session;
use async_native_tls::TlsConnector;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use log::{debug, info, warn};
use secrecy::{ExposeSecret, SecretString};

use crate::config::MailboxConfig;

use super::error::{EmailError, Result};

type AsyncTcpStream = async_io::Async<std::net::TcpStream>;
type TlsStream = async_native_tls::TlsStream<AsyncTcpStream>;

fn proto<E: std::fmt::Display>(e: E) -> EmailError {
    EmailError::ProtocolError(e.to_string())
}

/// A message as fetched from the server, before parsing. Owned by the
/// pipeline for the duration of one ingestion attempt.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub uid: u32,
    pub bytes: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

pub struct MailboxClient {
    session: Option<Session<TlsStream>>,
    config: MailboxConfig,
    current_folder: Option<String>,
    current_uidvalidity: Option<u32>,
}

impl MailboxClient {
    pub fn new(config: MailboxConfig) -> Self {
        Self {
            session: None,
            config,
            current_folder: None,
            current_uidvalidity: None,
        }
    }

    /// Dials the server, performs the TLS handshake, and logs in. A second
    /// call on an open session is a no-op.
    pub async fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            debug!("IMAP session already open");
            return Ok(());
        }

        if !self.config.use_tls {
            return Err(EmailError::ConfigError(
                "plaintext IMAP is not supported; set useTls to true".to_string(),
            ));
        }

        // Resolve credentials before touching the network; a broken
        // password source should fail without a dial.
        let password = self.get_password()?;

        let stream = self.open_tls_stream().await?;
        let client = async_imap::Client::new(stream);

        let session = client
            .login(&self.config.username, password.expose_secret())
            .await
            .map_err(|(e, _)| EmailError::AuthenticationFailed(e.to_string()))?;

        info!(
            "authenticated to {} as {}",
            self.config.host, self.config.username
        );
        self.session = Some(session);
        Ok(())
    }

    /// TCP via async-io over a std socket, then TLS against the configured
    /// hostname.
    async fn open_tls_stream(&self) -> Result<TlsStream> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        info!("connecting to {}", addr);

        let tcp = std::net::TcpStream::connect(&addr)
            .and_then(|s| {
                s.set_nonblocking(true)?;
                async_io::Async::new(s)
            })
            .map_err(|e| EmailError::ConnectionFailed(e.to_string()))?;

        Ok(TlsConnector::new().connect(&self.config.host, tcp).await?)
    }

    fn get_password(&self) -> Result<SecretString> {
        if self.config.auth.password_insecure.is_some() {
            warn!(
                "passwordInsecure is set; prefer passwordEnvVar or passwordFile \
                 outside of local testing"
            );
        }
        self.config
            .auth
            .resolve_password()
            .map_err(|e| EmailError::CredentialsNotFound(e.to_string()))
    }

    fn session_mut(&mut self) -> Result<&mut Session<TlsStream>> {
        self.session
            .as_mut()
            .ok_or_else(|| EmailError::ConnectionFailed("not connected".to_string()))
    }

    /// Opens a folder read-only via EXAMINE (never SELECT, which would let
    /// the server count the poll as a read) and returns its UIDVALIDITY.
    pub async fn examine_folder(&mut self, folder: &str) -> Result<u32> {
        let session = self.session_mut()?;
        info!("opening folder {} read-only", folder);

        let mailbox = session.examine(folder).await.map_err(|e| {
            let text = e.to_string();
            if text.contains("Mailbox doesn't exist") || text.contains("NO") {
                EmailError::FolderNotFound(folder.to_string())
            } else {
                EmailError::ProtocolError(text)
            }
        })?;

        let uidvalidity = mailbox.uid_validity.ok_or_else(|| {
            EmailError::ProtocolError("server did not report UIDVALIDITY".to_string())
        })?;

        self.current_folder = Some(folder.to_string());
        self.current_uidvalidity = Some(uidvalidity);

        debug!("{}: UIDVALIDITY {}", folder, uidvalidity);
        Ok(uidvalidity)
    }

    /// UIDVALIDITY of the folder opened by the last `examine_folder`.
    pub fn uidvalidity(&self) -> Option<u32> {
        self.current_uidvalidity
    }

    /// Lists UIDs strictly greater than the watermark, ascending.
    pub async fn list_since(&mut self, watermark: u32) -> Result<Vec<u32>> {
        let session = self.session_mut()?;

        let query = format!("UID {}:*", watermark.saturating_add(1));
        debug!("UID SEARCH {}", query);

        let uids = session.uid_search(&query).await.map_err(proto)?;

        // Servers resolve "n:*" to include the highest-UID message even
        // when its UID is below n, so filter explicitly.
        let mut uid_list: Vec<u32> = uids.into_iter().filter(|&uid| uid > watermark).collect();
        uid_list.sort_unstable();

        debug!("{} message(s) above UID {}", uid_list.len(), watermark);
        Ok(uid_list)
    }

    /// Fetches one message by UID with BODY.PEEK[] so no flags are set.
    pub async fn fetch_raw(&mut self, uid: u32) -> Result<RawMessage> {
        let session = self.session_mut()?;
        debug!("UID FETCH {}", uid);

        let mut messages = session
            .uid_fetch(uid.to_string(), "BODY.PEEK[]")
            .await
            .map_err(proto)?;

        let message = messages
            .next()
            .await
            .ok_or(EmailError::MessageNotFound(uid))?
            .map_err(proto)?;

        // Drain trailing untagged responses so the session is ready for
        // the next command.
        while let Some(extra) = messages.next().await {
            extra.map_err(proto)?;
        }

        let body = message
            .body()
            .ok_or_else(|| EmailError::ProtocolError("fetch returned no body".to_string()))?;

        Ok(RawMessage {
            uid,
            bytes: body.to_vec(),
            fetched_at: Utc::now(),
        })
    }

    /// Sets \Seen on a message. Only safe to call after the message has
    /// been durably persisted locally.
    pub async fn mark_seen(&mut self, uid: u32) -> Result<()> {
        let session = self.session_mut()?;
        debug!("UID STORE {} +FLAGS (\\Seen)", uid);

        let mut updates = session
            .uid_store(uid.to_string(), "+FLAGS (\\Seen)")
            .await
            .map_err(proto)?;

        while let Some(update) = updates.next().await {
            update.map_err(proto)?;
        }

        Ok(())
    }

    /// All folder names visible to the account, sorted.
    pub async fn list_folders(&mut self) -> Result<Vec<String>> {
        let session = self.session_mut()?;

        let mut names = session.list(Some(""), Some("*")).await.map_err(proto)?;

        let mut folders = Vec::new();
        while let Some(name) = names.next().await {
            folders.push(name.map_err(proto)?.name().to_string());
        }
        folders.sort();

        Ok(folders)
    }

    /// LOGOUT and drop the session. Safe to call when not connected.
    pub async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut session) = self.session.take() {
            debug!("logging out of {}", self.config.host);
            session.logout().await.map_err(proto)?;
        }
        self.current_folder = None;
        self.current_uidvalidity = None;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }
}

impl Drop for MailboxClient {
    fn drop(&mut self) {
        if self.session.is_some() {
            warn!("MailboxClient dropped with an open session; LOGOUT was skipped");
        }
    }
}
