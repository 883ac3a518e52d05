//! Attachment repository — metadata rows for stored attachment files.

use rusqlite::{params, Connection};
use serde::Serialize;

use super::{Database, DatabaseError};

/// Fields for a new attachment row. `storage_path` must already point at
/// durably written bytes.
#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub ticket_id: i64,
    /// Set when the attachment arrived on a reply rather than the
    /// opening message.
    pub reply_id: Option<i64>,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub sha256: String,
    pub storage_path: String,
    pub content_id: Option<String>,
    pub is_inline: bool,
    pub created_at: String,
}

/// Inserts an attachment row and returns its id.
pub fn insert(conn: &Connection, new: &NewAttachment) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO attachments (ticket_id, reply_id, filename, content_type, size_bytes,
         sha256, storage_path, content_id, is_inline, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            new.ticket_id,
            new.reply_id,
            new.filename,
            new.content_type,
            new.size_bytes,
            new.sha256,
            new.storage_path,
            new.content_id,
            new.is_inline,
            new.created_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// A full attachment row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRow {
    pub id: i64,
    pub ticket_id: i64,
    pub reply_id: Option<i64>,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub sha256: String,
    pub storage_path: String,
    pub content_id: Option<String>,
    pub is_inline: bool,
    pub created_at: String,
}

/// Lists a ticket's attachments in insertion order.
pub fn list_for_ticket(
    db: &Database,
    ticket_id: i64,
) -> Result<Vec<AttachmentRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, ticket_id, reply_id, filename, content_type, size_bytes,
             sha256, storage_path, content_id, is_inline, created_at
             FROM attachments WHERE ticket_id = ?1 ORDER BY id",
        )?;
        let rows: Vec<AttachmentRow> = stmt
            .query_map(params![ticket_id], |row| {
                Ok(AttachmentRow {
                    id: row.get(0)?,
                    ticket_id: row.get(1)?,
                    reply_id: row.get(2)?,
                    filename: row.get(3)?,
                    content_type: row.get(4)?,
                    size_bytes: row.get(5)?,
                    sha256: row.get(6)?,
                    storage_path: row.get(7)?,
                    content_id: row.get(8)?,
                    is_inline: row.get(9)?,
                    created_at: row.get(10)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ticket_repo::{self, NewTicket, TicketInsert};

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn insert_ticket(db: &Database) -> i64 {
        let new = NewTicket {
            source: "email".to_string(),
            source_id: "<root@example.com>".to_string(),
            subject: "Subject".to_string(),
            body_text: None,
            body_html: None,
            sender_email: "alice@example.com".to_string(),
            sender_name: None,
            recipient_email: None,
            cc_emails: "[]".to_string(),
            headers: "{}".to_string(),
            received_at: "2026-03-01T09:00:00Z".to_string(),
            created_at: "2026-03-01T09:00:05Z".to_string(),
        };
        db.with_conn(|conn| ticket_repo::insert(conn, &new))
            .map(|outcome| match outcome {
                TicketInsert::Created { id, .. } => id,
                TicketInsert::DuplicateSourceId => panic!("unexpected duplicate"),
            })
            .unwrap()
    }

    fn sample_attachment(ticket_id: i64, filename: &str) -> NewAttachment {
        NewAttachment {
            ticket_id,
            reply_id: None,
            filename: filename.to_string(),
            content_type: "application/pdf".to_string(),
            size_bytes: 1024,
            sha256: "ab".repeat(32),
            storage_path: format!("/tmp/att/{}", filename),
            content_id: None,
            is_inline: false,
            created_at: "2026-03-01T09:00:05Z".to_string(),
        }
    }

    #[test]
    fn test_insert_and_list() {
        let db = test_db();
        let ticket_id = insert_ticket(&db);

        db.with_conn(|conn| insert(conn, &sample_attachment(ticket_id, "report.pdf")))
            .unwrap();
        db.with_conn(|conn| insert(conn, &sample_attachment(ticket_id, "invoice.pdf")))
            .unwrap();

        let rows = list_for_ticket(&db, ticket_id).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].filename, "report.pdf");
        assert_eq!(rows[1].filename, "invoice.pdf");
        assert_eq!(rows[0].size_bytes, 1024);
        assert!(!rows[0].is_inline);
        assert_eq!(rows[0].reply_id, None);
    }

    #[test]
    fn test_inline_attachment_with_content_id() {
        let db = test_db();
        let ticket_id = insert_ticket(&db);

        let mut att = sample_attachment(ticket_id, "logo.png");
        att.content_type = "image/png".to_string();
        att.content_id = Some("logo123@mailer".to_string());
        att.is_inline = true;
        db.with_conn(|conn| insert(conn, &att)).unwrap();

        let rows = list_for_ticket(&db, ticket_id).unwrap();
        assert_eq!(rows[0].content_id.as_deref(), Some("logo123@mailer"));
        assert!(rows[0].is_inline);
    }

    #[test]
    fn test_rows_cascade_with_ticket() {
        let db = test_db();
        let ticket_id = insert_ticket(&db);
        db.with_conn(|conn| insert(conn, &sample_attachment(ticket_id, "report.pdf")))
            .unwrap();

        ticket_repo::delete_by_ids(&db, &[ticket_id]).unwrap();

        let count: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM attachments", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }
}
