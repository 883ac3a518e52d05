//! Drives one sync run end to end: open the mailbox, list new messages,
//! and ingest each one inside its own transaction.
//!
//! A run moves through connecting, listing, per-message processing, and
//! finalizing, with each phase visible as a tracing span. Message-level
//! failures are recorded and skipped; only connection, folder and listing
//! errors abort the run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use rusqlite::Connection;
use tracing::{debug, error, info, info_span, warn};

use crate::config::Config;
use crate::db::attachment_repo::{self, NewAttachment};
use crate::db::reply_repo::{self, NewReply, ReplyInsert};
use crate::db::sync_run_repo::{self, RunTotals};
use crate::db::ticket_repo::{self, NewTicket, TicketInsert};
use crate::db::Database;
use crate::email::{EmailParser, MailboxClient, ParsedEmail};
use crate::storage::AttachmentStore;

use super::error::{Result, SyncError};
use super::report::{ConnectionReport, FailedMessage, RunStatus, SyncReport};
use super::resolver::{self, Resolution};

/// Source channel recorded on every ticket and reply this pipeline creates.
const SOURCE_EMAIL: &str = "email";

/// What happened to a single message once its transaction committed.
enum MessageOutcome {
    TicketCreated(String),
    ReplyAppended(String),
    Duplicate,
}

/// Mutable state threaded through one run.
struct RunContext {
    run_id: i64,
    folder: String,
    started: Instant,
    totals: RunTotals,
    failures: Vec<FailedMessage>,
    watermark: u32,
}

pub struct SyncEngine {
    config: Config,
    db: Database,
    store: AttachmentStore,
    parser: EmailParser,
    running: AtomicBool,
    stop_flag: AtomicBool,
}

impl SyncEngine {
    pub fn new(config: Config, db: Database) -> Self {
        let store = AttachmentStore::new(config.resolve_attachment_root());
        let parser = EmailParser::new(config.sync.max_attachment_size);
        Self {
            config,
            db,
            store,
            parser,
            running: AtomicBool::new(false),
            stop_flag: AtomicBool::new(false),
        }
    }

    /// Requests that the current run stop at the next message boundary.
    /// The message being processed still runs to completion.
    pub fn request_stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    /// Executes one sync run. At most one run may be active per engine;
    /// a second call while one is in flight returns [`SyncError::AlreadyRunning`].
    ///
    /// Mailbox-level failures do not surface as `Err` here: they are
    /// recorded in the audit trail and returned as a report with
    /// [`RunStatus::Failure`]. `Err` means the run could not be recorded
    /// at all.
    pub async fn run(&self) -> Result<SyncReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::AlreadyRunning);
        }
        self.stop_flag.store(false, Ordering::SeqCst);

        let result = self.run_inner().await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn run_inner(&self) -> Result<SyncReport> {
        let folder = self.config.mailbox.folder.clone();
        let _span = info_span!("sync_run", folder = %folder).entered();

        info!("Starting sync run for folder '{}'", folder);
        let run_id = sync_run_repo::start(&self.db, &folder, &Utc::now().to_rfc3339())?;

        let mut ctx = RunContext {
            run_id,
            folder,
            started: Instant::now(),
            totals: RunTotals::default(),
            failures: Vec::new(),
            watermark: 0,
        };

        let mut client = MailboxClient::new(self.config.mailbox.clone());
        let outcome = self.process_mailbox(&mut client, &mut ctx).await;

        // The session is released on every exit path.
        if let Err(e) = client.disconnect().await {
            debug!("Disconnect after run returned: {}", e);
        }

        let (status, error) = match outcome {
            Ok(()) if ctx.totals.messages_failed > 0 => (RunStatus::Partial, None),
            Ok(()) => (RunStatus::Success, None),
            Err(e) => {
                error!("Sync run failed: {}", e);
                (RunStatus::Failure, Some(e.to_string()))
            }
        };

        let duration_ms = ctx.started.elapsed().as_millis() as u64;
        sync_run_repo::finish(
            &self.db,
            ctx.run_id,
            status.as_str(),
            error.as_deref(),
            duration_ms as i64,
            ctx.watermark,
            &ctx.totals,
        )?;

        info!(
            "Sync run finished with status '{}': {} fetched, {} tickets created, {} replies appended, {} duplicates, {} failed",
            status.as_str(),
            ctx.totals.messages_fetched,
            ctx.totals.tickets_created,
            ctx.totals.replies_appended,
            ctx.totals.duplicates_skipped,
            ctx.totals.messages_failed,
        );

        Ok(SyncReport {
            status,
            folder: ctx.folder,
            messages_fetched: ctx.totals.messages_fetched,
            tickets_created: ctx.totals.tickets_created,
            replies_appended: ctx.totals.replies_appended,
            duplicates_skipped: ctx.totals.duplicates_skipped,
            messages_failed: ctx.totals.messages_failed,
            degraded_dedup: ctx.totals.degraded_dedup,
            final_watermark: ctx.watermark,
            duration_ms,
            failures: ctx.failures,
            error,
        })
    }

    /// Everything between connect and disconnect. Errors returned here
    /// abort the run; per-message failures are absorbed into the context.
    async fn process_mailbox(
        &self,
        client: &mut MailboxClient,
        ctx: &mut RunContext,
    ) -> Result<()> {
        let uidvalidity = {
            let _span = info_span!("connecting").entered();
            client.connect().await?;
            client.examine_folder(&ctx.folder).await?
        };
        sync_run_repo::set_uidvalidity(&self.db, ctx.run_id, uidvalidity)?;

        // Resume from the last recorded watermark, unless the folder's
        // UIDVALIDITY changed, which invalidates every UID we ever saw.
        let resume = match sync_run_repo::last_state(&self.db, &ctx.folder)? {
            Some(state) if state.uidvalidity == uidvalidity => state.watermark,
            Some(state) => {
                warn!(
                    "UIDVALIDITY for '{}' changed from {} to {}, refetching from the beginning",
                    ctx.folder, state.uidvalidity, uidvalidity
                );
                0
            }
            None => 0,
        };
        ctx.watermark = resume;

        let uids = {
            let _span = info_span!("listing", resume_watermark = resume).entered();
            client.list_since(resume).await?
        };
        let pending = uids.len();
        let cap = self.config.sync.max_messages_per_run as usize;
        let batch: Vec<u32> = uids.into_iter().take(cap).collect();

        if batch.is_empty() {
            info!("No new messages in '{}' above UID {}", ctx.folder, resume);
            return Ok(());
        }
        if pending > batch.len() {
            info!(
                "Found {} new messages, processing {} this run",
                pending,
                batch.len()
            );
        } else {
            info!("Found {} new messages", pending);
        }

        for uid in batch {
            if self.stop_flag.load(Ordering::SeqCst) {
                info!("Stop requested, ending run at message boundary");
                break;
            }
            if let Some(limit) = self.config.sync.run_timeout_secs {
                if ctx.started.elapsed() >= Duration::from_secs(limit) {
                    warn!("Run exceeded {}s, ending at message boundary", limit);
                    break;
                }
            }

            let _span = info_span!("process_message", uid = uid).entered();
            match self.process_message(client, ctx, uid).await {
                Ok(()) => {
                    ctx.watermark = uid;
                    if self.config.sync.mark_seen {
                        // Only after the commit, so a crash never leaves a
                        // message seen but unprocessed.
                        if let Err(e) = client.mark_seen(uid).await {
                            warn!("Failed to mark UID {} as seen: {}", uid, e);
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to process message UID {}: {}", uid, e);
                    ctx.totals.messages_failed += 1;
                    ctx.failures.push(FailedMessage {
                        uid,
                        reason: e.to_string(),
                    });
                    // A poison message must not wedge the run: later runs
                    // would only refetch it and fail the same way.
                    ctx.watermark = uid;
                }
            }
        }

        Ok(())
    }

    async fn process_message(
        &self,
        client: &mut MailboxClient,
        ctx: &mut RunContext,
        uid: u32,
    ) -> Result<()> {
        let raw = client.fetch_raw(uid).await?;
        ctx.totals.messages_fetched += 1;

        let parsed = self.parser.parse(&raw)?;
        let degraded = parsed.degraded_dedup;

        match self.persist_message(ctx.run_id, uid, &parsed)? {
            MessageOutcome::TicketCreated(number) => {
                info!("Created ticket {} from UID {}", number, uid);
                ctx.totals.tickets_created += 1;
            }
            MessageOutcome::ReplyAppended(number) => {
                info!("Appended reply to ticket {} from UID {}", number, uid);
                ctx.totals.replies_appended += 1;
            }
            MessageOutcome::Duplicate => {
                debug!("UID {} already ingested, skipping", uid);
                ctx.totals.duplicates_skipped += 1;
            }
        }
        if degraded {
            ctx.totals.degraded_dedup += 1;
        }
        Ok(())
    }

    /// Writes one message's rows and files inside a single transaction.
    /// Attachment files land on disk mid-transaction; content-addressed
    /// names make a rolled-back write harmless on retry.
    fn persist_message(
        &self,
        run_id: i64,
        uid: u32,
        email: &ParsedEmail,
    ) -> Result<MessageOutcome> {
        let now = Utc::now().to_rfc3339();
        self.db.with_tx(|tx| -> Result<MessageOutcome> {
            let outcome = match resolver::resolve(tx, SOURCE_EMAIL, email)? {
                Resolution::AlreadyProcessed => MessageOutcome::Duplicate,
                Resolution::AppendReply(ticket) => {
                    let reply = NewReply {
                        ticket_id: ticket.id,
                        source: SOURCE_EMAIL.to_string(),
                        source_id: email.source_id.clone(),
                        sender_email: email.sender_email.clone(),
                        sender_name: email.sender_name.clone(),
                        body_text: email.body_text.clone(),
                        body_html: email.body_html.clone(),
                        headers: email.headers.to_string(),
                        received_at: email.received_at.to_rfc3339(),
                        created_at: now.clone(),
                    };
                    match reply_repo::insert(tx, &reply)? {
                        ReplyInsert::Created(reply_id) => {
                            ticket_repo::touch_updated_at(tx, ticket.id, &now)?;
                            self.store_attachments(
                                tx,
                                email,
                                ticket.id,
                                &ticket.ticket_number,
                                Some(reply_id),
                                &now,
                            )?;
                            MessageOutcome::ReplyAppended(ticket.ticket_number)
                        }
                        ReplyInsert::DuplicateSourceId => MessageOutcome::Duplicate,
                    }
                }
                Resolution::CreateTicket => {
                    let new_ticket = NewTicket {
                        source: SOURCE_EMAIL.to_string(),
                        source_id: email.source_id.clone(),
                        subject: email
                            .subject
                            .clone()
                            .unwrap_or_else(|| "No Subject".to_string()),
                        body_text: email.body_text.clone(),
                        body_html: email.body_html.clone(),
                        sender_email: email.sender_email.clone(),
                        sender_name: email.sender_name.clone(),
                        recipient_email: email.recipient_email.clone(),
                        cc_emails: serde_json::Value::from(email.cc_emails.clone()).to_string(),
                        headers: email.headers.to_string(),
                        received_at: email.received_at.to_rfc3339(),
                        created_at: now.clone(),
                    };
                    match ticket_repo::insert(tx, &new_ticket)? {
                        TicketInsert::Created { id, ticket_number } => {
                            self.store_attachments(tx, email, id, &ticket_number, None, &now)?;
                            MessageOutcome::TicketCreated(ticket_number)
                        }
                        TicketInsert::DuplicateSourceId => MessageOutcome::Duplicate,
                    }
                }
            };
            sync_run_repo::advance_watermark(tx, run_id, uid)?;
            Ok(outcome)
        })
    }

    fn store_attachments(
        &self,
        conn: &Connection,
        email: &ParsedEmail,
        ticket_id: i64,
        ticket_number: &str,
        reply_id: Option<i64>,
        now: &str,
    ) -> Result<()> {
        for part in &email.attachments {
            let stored = self.store.store(ticket_number, &part.filename, &part.content)?;
            attachment_repo::insert(
                conn,
                &NewAttachment {
                    ticket_id,
                    reply_id,
                    filename: part.filename.clone(),
                    content_type: part.content_type.clone(),
                    size_bytes: stored.size_bytes as i64,
                    sha256: stored.sha256.clone(),
                    storage_path: stored.relative_path.clone(),
                    content_id: part.content_id.clone(),
                    is_inline: part.inline,
                    created_at: now.to_string(),
                },
            )?;
            debug!(
                "Stored attachment {} for ticket {}",
                stored.relative_path, ticket_number
            );
        }
        Ok(())
    }

    /// Verifies the mailbox is reachable without writing anything.
    pub async fn test_connection(&self) -> Result<ConnectionReport> {
        let folder = self.config.mailbox.folder.clone();
        let mut client = MailboxClient::new(self.config.mailbox.clone());
        let result = self.probe_mailbox(&mut client, &folder).await;
        if let Err(e) = client.disconnect().await {
            debug!("Disconnect after connection test returned: {}", e);
        }
        result
    }

    async fn probe_mailbox(
        &self,
        client: &mut MailboxClient,
        folder: &str,
    ) -> Result<ConnectionReport> {
        client.connect().await?;
        let uidvalidity = client.examine_folder(folder).await?;
        let watermark = match sync_run_repo::last_state(&self.db, folder)? {
            Some(state) if state.uidvalidity == uidvalidity => state.watermark,
            _ => 0,
        };
        let pending_messages = client.list_since(watermark).await?.len() as u32;
        let folders = client.list_folders().await?;
        Ok(ConnectionReport {
            host: self.config.mailbox.host.clone(),
            folder: folder.to_string(),
            uidvalidity,
            watermark,
            pending_messages,
            folders,
        })
    }
}
