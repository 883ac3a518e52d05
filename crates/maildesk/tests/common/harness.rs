//! Test harness for isolated ingestion runs.
//!
//! `TestHarness` owns a throwaway database and attachment directory and
//! pushes raw messages through the same parse, resolve and persist steps
//! the sync engine performs, minus the IMAP session.

#![allow(dead_code)]

use std::path::Path;

use chrono::Utc;
use tempfile::TempDir;

use maildesk::db::attachment_repo::{self, AttachmentRow, NewAttachment};
use maildesk::db::reply_repo::{self, NewReply, ReplyInsert, ReplyRow};
use maildesk::db::sync_run_repo;
use maildesk::db::ticket_repo::{self, NewTicket, TicketInsert, TicketRow};
use maildesk::db::DatabaseError;
use maildesk::email::{EmailParser, ParsedEmail, RawMessage};
use maildesk::storage::AttachmentStore;
use maildesk::sync::{resolve, Resolution, SyncError};
use maildesk::Database;

/// What one ingested message turned into.
#[derive(Debug, Clone, PartialEq)]
pub enum Ingested {
    Ticket(String),
    Reply(String),
    Duplicate,
}

impl Ingested {
    pub fn ticket_number(&self) -> &str {
        match self {
            Ingested::Ticket(number) | Ingested::Reply(number) => number,
            Ingested::Duplicate => panic!("duplicate outcome has no ticket number"),
        }
    }
}

pub struct TestHarness {
    temp_dir: TempDir,
    pub db: Database,
    pub store: AttachmentStore,
    pub parser: EmailParser,
    pub run_id: i64,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open_in_memory().expect("Failed to open database");
        let store = AttachmentStore::new(temp_dir.path());
        let parser = EmailParser::new(10 * 1024 * 1024);

        let run_id = sync_run_repo::start(&db, "INBOX", &Utc::now().to_rfc3339())
            .expect("Failed to record run start");
        sync_run_repo::set_uidvalidity(&db, run_id, 1).expect("Failed to set uidvalidity");

        Self {
            temp_dir,
            db,
            store,
            parser,
            run_id,
        }
    }

    pub fn attachment_root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Parses raw bytes and applies the result in one transaction, the
    /// way the engine handles a fetched message.
    pub fn ingest(&self, raw: &RawMessage) -> maildesk::Result<Ingested> {
        let email = self.parser.parse(raw)?;
        Ok(self.apply(raw.uid, &email)?)
    }

    /// Applies an already-parsed message: resolve, insert ticket or
    /// reply, store attachments, advance the watermark.
    pub fn apply(&self, uid: u32, email: &ParsedEmail) -> Result<Ingested, SyncError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_tx(|tx| -> Result<Ingested, SyncError> {
            let outcome = match resolve(tx, "email", email)? {
                Resolution::AlreadyProcessed => Ingested::Duplicate,
                Resolution::AppendReply(ticket) => {
                    match reply_repo::insert(tx, &new_reply(email, ticket.id, &now))? {
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
                            Ingested::Reply(ticket.ticket_number)
                        }
                        ReplyInsert::DuplicateSourceId => Ingested::Duplicate,
                    }
                }
                Resolution::CreateTicket => {
                    match ticket_repo::insert(tx, &new_ticket(email, &now))? {
                        TicketInsert::Created { id, ticket_number } => {
                            self.store_attachments(tx, email, id, &ticket_number, None, &now)?;
                            Ingested::Ticket(ticket_number)
                        }
                        TicketInsert::DuplicateSourceId => Ingested::Duplicate,
                    }
                }
            };
            sync_run_repo::advance_watermark(tx, self.run_id, uid)?;
            Ok(outcome)
        })
    }

    fn store_attachments(
        &self,
        conn: &rusqlite::Connection,
        email: &ParsedEmail,
        ticket_id: i64,
        ticket_number: &str,
        reply_id: Option<i64>,
        now: &str,
    ) -> Result<(), SyncError> {
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
        }
        Ok(())
    }

    pub fn ticket_count(&self) -> i64 {
        self.count("tickets")
    }

    pub fn reply_count(&self) -> i64 {
        self.count("ticket_replies")
    }

    fn count(&self, table: &str) -> i64 {
        self.db
            .with_conn(|conn| {
                conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                    row.get(0)
                })
                .map_err(DatabaseError::from)
            })
            .expect("count query failed")
    }

    /// Resume watermark as the next run would compute it.
    pub fn watermark(&self) -> u32 {
        sync_run_repo::last_state(&self.db, "INBOX")
            .expect("last_state query failed")
            .map(|state| state.watermark)
            .unwrap_or(0)
    }

    pub fn ticket_by_source_id(&self, source_id: &str) -> Option<TicketRow> {
        let ticket_ref = self
            .db
            .with_conn(|conn| ticket_repo::find_by_source_id(conn, "email", source_id))
            .expect("find_by_source_id failed")?;
        ticket_repo::get_by_id(&self.db, ticket_ref.id).expect("get_by_id failed")
    }

    pub fn ticket_by_number(&self, ticket_number: &str) -> TicketRow {
        let id = self
            .db
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT id FROM tickets WHERE ticket_number = ?1",
                    rusqlite::params![ticket_number],
                    |row| row.get::<_, i64>(0),
                )
                .map_err(DatabaseError::from)
            })
            .expect("ticket number lookup failed");
        ticket_repo::get_by_id(&self.db, id)
            .expect("get_by_id failed")
            .expect("ticket should exist")
    }

    pub fn replies_for(&self, ticket_id: i64) -> Vec<ReplyRow> {
        reply_repo::list_for_ticket(&self.db, ticket_id).expect("list_for_ticket failed")
    }

    pub fn attachments_for(&self, ticket_id: i64) -> Vec<AttachmentRow> {
        attachment_repo::list_for_ticket(&self.db, ticket_id).expect("list_for_ticket failed")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn new_ticket(email: &ParsedEmail, now: &str) -> NewTicket {
    NewTicket {
        source: "email".to_string(),
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
        created_at: now.to_string(),
    }
}

fn new_reply(email: &ParsedEmail, ticket_id: i64, now: &str) -> NewReply {
    NewReply {
        ticket_id,
        source: "email".to_string(),
        source_id: email.source_id.clone(),
        sender_email: email.sender_email.clone(),
        sender_name: email.sender_name.clone(),
        body_text: email.body_text.clone(),
        body_html: email.body_html.clone(),
        headers: email.headers.to_string(),
        received_at: email.received_at.to_rfc3339(),
        created_at: now.to_string(),
    }
}
