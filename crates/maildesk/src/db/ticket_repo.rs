//! Ticket repository — persistence for the `tickets` table.
//!
//! Lookup and insert functions take a `&Connection` so the pipeline can
//! compose them inside a single per-message transaction. Maintenance
//! queries that stand alone take the `Database` handle directly.

use rusqlite::{params, Connection};
use serde::Serialize;

use super::{Database, DatabaseError};

/// Bounded retries for per-day sequence collisions before falling back
/// to a timestamp-suffixed number.
const MAX_NUMBER_ATTEMPTS: u32 = 5;

/// Fields for a new ticket row. The ticket number is allocated at insert
/// time; status and priority take their column defaults.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub source: String,
    pub source_id: String,
    pub subject: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub sender_email: String,
    pub sender_name: Option<String>,
    pub recipient_email: Option<String>,
    /// JSON array of CC addresses.
    pub cc_emails: String,
    /// JSON object of the original header fields.
    pub headers: String,
    pub received_at: String,
    pub created_at: String,
}

/// Outcome of a ticket insert.
#[derive(Debug, Clone)]
pub enum TicketInsert {
    Created { id: i64, ticket_number: String },
    /// Another writer committed the same (source, source_id) first.
    DuplicateSourceId,
}

/// Reference to an existing ticket row.
#[derive(Debug, Clone)]
pub struct TicketRef {
    pub id: i64,
    pub ticket_number: String,
}

/// A candidate ticket for threading a message into, found via the
/// reference chain.
#[derive(Debug, Clone)]
pub struct ThreadCandidate {
    pub ticket_id: i64,
    pub ticket_number: String,
    pub updated_at: String,
}

/// Inserts a ticket, allocating the next `TKT-YYYYMMDD-NNNN` number for
/// the creation date. Retries on a number collision; a duplicate
/// (source, source_id) is reported as [`TicketInsert::DuplicateSourceId`].
pub fn insert(conn: &Connection, new: &NewTicket) -> Result<TicketInsert, DatabaseError> {
    let date_part: String = new
        .created_at
        .chars()
        .filter(|c| c.is_ascii_digit())
        .take(8)
        .collect();

    for _ in 0..MAX_NUMBER_ATTEMPTS {
        let number = next_ticket_number(conn, &date_part)?;
        match try_insert(conn, &number, new) {
            Ok(id) => {
                return Ok(TicketInsert::Created {
                    id,
                    ticket_number: number,
                })
            }
            Err(e) if is_unique_violation(&e, "tickets.source") => {
                return Ok(TicketInsert::DuplicateSourceId)
            }
            Err(e) if is_unique_violation(&e, "tickets.ticket_number") => continue,
            Err(e) => return Err(e.into()),
        }
    }

    // Sequence kept colliding; fall back to a time-of-day suffix.
    let fallback = format!(
        "TKT-{}-{}",
        date_part,
        chrono::Utc::now().format("%H%M%S%3f")
    );
    match try_insert(conn, &fallback, new) {
        Ok(id) => Ok(TicketInsert::Created {
            id,
            ticket_number: fallback,
        }),
        Err(e) if is_unique_violation(&e, "tickets.source") => {
            Ok(TicketInsert::DuplicateSourceId)
        }
        Err(e) if is_unique_violation(&e, "tickets.ticket_number") => {
            Err(DatabaseError::TicketNumberExhausted { date: date_part })
        }
        Err(e) => Err(e.into()),
    }
}

fn try_insert(
    conn: &Connection,
    ticket_number: &str,
    new: &NewTicket,
) -> Result<i64, rusqlite::Error> {
    conn.execute(
        "INSERT INTO tickets (ticket_number, source, source_id, subject, body_text, body_html,
         sender_email, sender_name, recipient_email, cc_emails, headers,
         received_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
        params![
            ticket_number,
            new.source,
            new.source_id,
            new.subject,
            new.body_text,
            new.body_html,
            new.sender_email,
            new.sender_name,
            new.recipient_email,
            new.cc_emails,
            new.headers,
            new.received_at,
            new.created_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Computes the next number in the day's sequence from the highest
/// existing ticket number with that date prefix.
fn next_ticket_number(conn: &Connection, date_part: &str) -> Result<String, DatabaseError> {
    let prefix = format!("TKT-{}-", date_part);
    let max_suffix: i64 = conn.query_row(
        "SELECT COALESCE(MAX(CAST(SUBSTR(ticket_number, ?2) AS INTEGER)), 0)
         FROM tickets WHERE ticket_number LIKE ?1",
        params![format!("{}%", prefix), prefix.len() as i64 + 1],
        |r| r.get(0),
    )?;
    Ok(format!("{}{:04}", prefix, max_suffix + 1))
}

fn is_unique_violation(err: &rusqlite::Error, needle: &str) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, Some(msg)) => {
            e.code == rusqlite::ErrorCode::ConstraintViolation && msg.contains(needle)
        }
        _ => false,
    }
}

/// Finds a ticket whose own source identifier matches.
pub fn find_by_source_id(
    conn: &Connection,
    source: &str,
    source_id: &str,
) -> Result<Option<TicketRef>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, ticket_number FROM tickets WHERE source = ?1 AND source_id = ?2",
    )?;
    let mut rows = stmt.query_map(params![source, source_id], |row| {
        Ok(TicketRef {
            id: row.get(0)?,
            ticket_number: row.get(1)?,
        })
    })?;
    match rows.next() {
        Some(Ok(val)) => Ok(Some(val)),
        Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
        None => Ok(None),
    }
}

/// Finds tickets that own a message with the given source identifier,
/// either as the opening message or as one of their replies. Ordered by
/// ticket update time descending, so the first row is the preferred
/// match when several tickets qualify.
pub fn find_thread_candidates(
    conn: &Connection,
    source: &str,
    reference_id: &str,
) -> Result<Vec<ThreadCandidate>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.ticket_number, t.updated_at FROM tickets t
         WHERE t.source = ?1 AND t.source_id = ?2
         UNION
         SELECT t.id, t.ticket_number, t.updated_at FROM tickets t
         JOIN ticket_replies r ON r.ticket_id = t.id
         WHERE r.source = ?1 AND r.source_id = ?2
         ORDER BY updated_at DESC",
    )?;
    let candidates: Vec<ThreadCandidate> = stmt
        .query_map(params![source, reference_id], |row| {
            Ok(ThreadCandidate {
                ticket_id: row.get(0)?,
                ticket_number: row.get(1)?,
                updated_at: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(candidates)
}

/// Bumps a ticket's updated timestamp (called when a reply is appended).
pub fn touch_updated_at(
    conn: &Connection,
    ticket_id: i64,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE tickets SET updated_at = ?2 WHERE id = ?1",
        params![ticket_id, updated_at],
    )?;
    Ok(())
}

/// A full ticket row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketRow {
    pub id: i64,
    pub ticket_number: String,
    pub source: String,
    pub source_id: String,
    pub subject: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub sender_email: String,
    pub sender_name: Option<String>,
    pub recipient_email: Option<String>,
    pub cc_emails: String,
    pub status: String,
    pub priority: i64,
    pub headers: String,
    pub received_at: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Loads a single ticket by id.
pub fn get_by_id(db: &Database, id: i64) -> Result<Option<TicketRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, ticket_number, source, source_id, subject, body_text, body_html,
             sender_email, sender_name, recipient_email, cc_emails, status, priority,
             headers, received_at, created_at, updated_at
             FROM tickets WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], map_ticket_row)?;
        match rows.next() {
            Some(Ok(val)) => Ok(Some(val)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

fn map_ticket_row(row: &rusqlite::Row<'_>) -> Result<TicketRow, rusqlite::Error> {
    Ok(TicketRow {
        id: row.get(0)?,
        ticket_number: row.get(1)?,
        source: row.get(2)?,
        source_id: row.get(3)?,
        subject: row.get(4)?,
        body_text: row.get(5)?,
        body_html: row.get(6)?,
        sender_email: row.get(7)?,
        sender_name: row.get(8)?,
        recipient_email: row.get(9)?,
        cc_emails: row.get(10)?,
        status: row.get(11)?,
        priority: row.get(12)?,
        headers: row.get(13)?,
        received_at: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

/// Ticket totals per status.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub total: i64,
    pub new: i64,
    pub read: i64,
    pub archived: i64,
}

/// Counts tickets by status.
pub fn count_by_status(db: &Database) -> Result<StatusCounts, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM tickets GROUP BY status")?;
        let pairs: Vec<(String, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut counts = StatusCounts::default();
        for (status, n) in pairs {
            counts.total += n;
            match status.as_str() {
                "new" => counts.new = n,
                "read" => counts.read = n,
                "archived" => counts.archived = n,
                _ => {}
            }
        }
        Ok(counts)
    })
}

/// Finds archived tickets last updated before the cutoff timestamp.
pub fn find_archived_before(
    db: &Database,
    cutoff: &str,
) -> Result<Vec<TicketRef>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, ticket_number FROM tickets
             WHERE status = 'archived' AND updated_at < ?1",
        )?;
        let refs: Vec<TicketRef> = stmt
            .query_map(params![cutoff], |row| {
                Ok(TicketRef {
                    id: row.get(0)?,
                    ticket_number: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(refs)
    })
}

/// Deletes tickets by id; replies and attachment rows go with them via
/// FK cascade. Returns the number of tickets deleted.
pub fn delete_by_ids(db: &Database, ids: &[i64]) -> Result<u64, DatabaseError> {
    if ids.is_empty() {
        return Ok(0);
    }

    db.with_conn(|conn| {
        // Build IN clause with positional params.
        let placeholders: Vec<String> = (0..ids.len()).map(|i| format!("?{}", i + 1)).collect();
        let sql = format!(
            "DELETE FROM tickets WHERE id IN ({})",
            placeholders.join(", ")
        );

        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        for &id in ids {
            param_values.push(Box::new(id));
        }

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let count = conn.execute(&sql, params_ref.as_slice())?;
        Ok(count as u64)
    })
}
