//! Deduplication and threading decisions.
//!
//! Given a parsed message, decides whether it was already ingested,
//! continues an existing thread, or opens a new ticket. Runs against a
//! `&Connection` so the caller can make the decision and the resulting
//! writes atomic in one transaction.

use log::warn;
use rusqlite::Connection;

use crate::db::ticket_repo::{self, TicketRef};
use crate::db::{reply_repo, DatabaseError};
use crate::email::ParsedEmail;

/// What the pipeline should do with a message.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// This exact message was ingested before; an idempotent no-op.
    AlreadyProcessed,
    /// The message continues the thread owned by this ticket.
    AppendReply(TicketRef),
    /// The message starts a new thread.
    CreateTicket,
}

/// Resolves a message against existing tickets and replies.
///
/// The reference chain is walked from the most recent ancestor to the
/// oldest, stopping at the first identifier that maps to a known ticket.
/// An identifier matching several tickets threads into the most recently
/// updated one and logs a warning, never fails.
pub fn resolve(
    conn: &Connection,
    source: &str,
    email: &ParsedEmail,
) -> Result<Resolution, DatabaseError> {
    if ticket_repo::find_by_source_id(conn, source, &email.source_id)?.is_some() {
        return Ok(Resolution::AlreadyProcessed);
    }
    if reply_repo::find_ticket_id_by_source_id(conn, source, &email.source_id)?.is_some() {
        return Ok(Resolution::AlreadyProcessed);
    }

    for reference in email.references.iter().rev() {
        let candidates = ticket_repo::find_thread_candidates(conn, source, reference)?;
        let chosen = match candidates.first() {
            Some(candidate) => candidate,
            None => continue,
        };

        if candidates.len() > 1 {
            warn!(
                "Reference '{}' matches {} tickets, threading into most recently updated {}",
                reference,
                candidates.len(),
                chosen.ticket_number
            );
        }

        return Ok(Resolution::AppendReply(TicketRef {
            id: chosen.ticket_id,
            ticket_number: chosen.ticket_number.clone(),
        }));
    }

    Ok(Resolution::CreateTicket)
}
