//! Ticket reply repository — persistence for the `ticket_replies` table.

use rusqlite::{params, Connection};
use serde::Serialize;

use super::{Database, DatabaseError};

/// Fields for a new reply row.
#[derive(Debug, Clone)]
pub struct NewReply {
    pub ticket_id: i64,
    pub source: String,
    pub source_id: String,
    pub sender_email: String,
    pub sender_name: Option<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    /// JSON object of the original header fields.
    pub headers: String,
    pub received_at: String,
    pub created_at: String,
}

/// Outcome of a reply insert.
#[derive(Debug, Clone)]
pub enum ReplyInsert {
    Created(i64),
    /// Another writer committed the same (source, source_id) first.
    DuplicateSourceId,
}

/// Inserts a reply row. A duplicate (source, source_id) is reported as
/// [`ReplyInsert::DuplicateSourceId`], not an error.
pub fn insert(conn: &Connection, new: &NewReply) -> Result<ReplyInsert, DatabaseError> {
    let result = conn.execute(
        "INSERT INTO ticket_replies (ticket_id, source, source_id, sender_email, sender_name,
         body_text, body_html, headers, received_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            new.ticket_id,
            new.source,
            new.source_id,
            new.sender_email,
            new.sender_name,
            new.body_text,
            new.body_html,
            new.headers,
            new.received_at,
            new.created_at,
        ],
    );

    match result {
        Ok(_) => Ok(ReplyInsert::Created(conn.last_insert_rowid())),
        Err(rusqlite::Error::SqliteFailure(e, Some(msg)))
            if e.code == rusqlite::ErrorCode::ConstraintViolation
                && msg.contains("ticket_replies.source") =>
        {
            Ok(ReplyInsert::DuplicateSourceId)
        }
        Err(e) => Err(DatabaseError::Sqlite(e)),
    }
}

/// Finds the ticket owning a reply with the given source identifier.
pub fn find_ticket_id_by_source_id(
    conn: &Connection,
    source: &str,
    source_id: &str,
) -> Result<Option<i64>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT ticket_id FROM ticket_replies WHERE source = ?1 AND source_id = ?2",
    )?;
    let mut rows = stmt.query_map(params![source, source_id], |row| row.get::<_, i64>(0))?;
    match rows.next() {
        Some(Ok(val)) => Ok(Some(val)),
        Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
        None => Ok(None),
    }
}

/// A full reply row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRow {
    pub id: i64,
    pub ticket_id: i64,
    pub source: String,
    pub source_id: String,
    pub sender_email: String,
    pub sender_name: Option<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub headers: String,
    pub received_at: String,
    pub created_at: String,
}

/// Lists a ticket's replies in insertion order.
pub fn list_for_ticket(db: &Database, ticket_id: i64) -> Result<Vec<ReplyRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, ticket_id, source, source_id, sender_email, sender_name,
             body_text, body_html, headers, received_at, created_at
             FROM ticket_replies WHERE ticket_id = ?1 ORDER BY id",
        )?;
        let rows: Vec<ReplyRow> = stmt
            .query_map(params![ticket_id], |row| {
                Ok(ReplyRow {
                    id: row.get(0)?,
                    ticket_id: row.get(1)?,
                    source: row.get(2)?,
                    source_id: row.get(3)?,
                    sender_email: row.get(4)?,
                    sender_name: row.get(5)?,
                    body_text: row.get(6)?,
                    body_html: row.get(7)?,
                    headers: row.get(8)?,
                    received_at: row.get(9)?,
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

    fn insert_ticket(db: &Database, source_id: &str) -> i64 {
        let new = NewTicket {
            source: "email".to_string(),
            source_id: source_id.to_string(),
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

    fn sample_reply(ticket_id: i64, source_id: &str) -> NewReply {
        NewReply {
            ticket_id,
            source: "email".to_string(),
            source_id: source_id.to_string(),
            sender_email: "bob@example.com".to_string(),
            sender_name: Some("Bob".to_string()),
            body_text: Some("Me too.".to_string()),
            body_html: None,
            headers: "{}".to_string(),
            received_at: "2026-03-01T10:00:00Z".to_string(),
            created_at: "2026-03-01T10:00:05Z".to_string(),
        }
    }

    #[test]
    fn test_insert_and_list() {
        let db = test_db();
        let ticket_id = insert_ticket(&db, "<root@example.com>");

        let outcome = db
            .with_conn(|conn| insert(conn, &sample_reply(ticket_id, "<r1@example.com>")))
            .unwrap();
        assert!(matches!(outcome, ReplyInsert::Created(_)));

        db.with_conn(|conn| insert(conn, &sample_reply(ticket_id, "<r2@example.com>")))
            .unwrap();

        let replies = list_for_ticket(&db, ticket_id).unwrap();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].source_id, "<r1@example.com>");
        assert_eq!(replies[1].source_id, "<r2@example.com>");
        assert_eq!(replies[0].sender_email, "bob@example.com");
    }

    #[test]
    fn test_duplicate_source_id_reported() {
        let db = test_db();
        let ticket_id = insert_ticket(&db, "<root@example.com>");

        db.with_conn(|conn| insert(conn, &sample_reply(ticket_id, "<r1@example.com>")))
            .unwrap();
        let outcome = db
            .with_conn(|conn| insert(conn, &sample_reply(ticket_id, "<r1@example.com>")))
            .unwrap();
        assert!(matches!(outcome, ReplyInsert::DuplicateSourceId));

        assert_eq!(list_for_ticket(&db, ticket_id).unwrap().len(), 1);
    }

    #[test]
    fn test_find_ticket_id_by_source_id() {
        let db = test_db();
        let ticket_id = insert_ticket(&db, "<root@example.com>");
        db.with_conn(|conn| insert(conn, &sample_reply(ticket_id, "<r1@example.com>")))
            .unwrap();

        let found = db
            .with_conn(|conn| find_ticket_id_by_source_id(conn, "email", "<r1@example.com>"))
            .unwrap();
        assert_eq!(found, Some(ticket_id));

        let missing = db
            .with_conn(|conn| find_ticket_id_by_source_id(conn, "email", "<nope@example.com>"))
            .unwrap();
        assert_eq!(missing, None);
    }

    #[test]
    fn test_insert_requires_existing_ticket() {
        let db = test_db();
        let result = db.with_conn(|conn| insert(conn, &sample_reply(9999, "<r@example.com>")));
        assert!(result.is_err());
    }
}
