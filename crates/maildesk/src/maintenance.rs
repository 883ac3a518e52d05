//! Retention cleanup for archived tickets. Never runs as part of a sync;
//! it only fires when the operator asks for it.

use chrono::{Duration, Utc};
use log::info;
use serde::Serialize;

use crate::db::{ticket_repo, Database};
use crate::error::Result;
use crate::storage::AttachmentStore;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub cutoff: String,
    pub tickets_deleted: u64,
    pub directories_removed: u64,
}

/// Deletes archived tickets whose last update is older than
/// `older_than_days`, together with their replies, attachment rows and
/// attachment directories.
///
/// Directories go first: if a filesystem error interrupts the pass, the
/// rows are still present and a rerun picks up where it stopped.
pub fn cleanup_archived(
    db: &Database,
    store: &AttachmentStore,
    older_than_days: u32,
) -> Result<CleanupReport> {
    let cutoff = (Utc::now() - Duration::days(older_than_days as i64)).to_rfc3339();
    let expired = ticket_repo::find_archived_before(db, &cutoff)?;

    if expired.is_empty() {
        info!("No archived tickets older than {} days", older_than_days);
        return Ok(CleanupReport {
            cutoff,
            tickets_deleted: 0,
            directories_removed: 0,
        });
    }

    let mut directories_removed = 0u64;
    for ticket in &expired {
        if store.root().join(&ticket.ticket_number).is_dir() {
            store.remove_ticket_dir(&ticket.ticket_number)?;
            directories_removed += 1;
        }
    }

    let ids: Vec<i64> = expired.iter().map(|t| t.id).collect();
    let tickets_deleted = ticket_repo::delete_by_ids(db, &ids)?;

    info!(
        "Cleanup removed {} archived tickets last touched before {}",
        tickets_deleted, cutoff
    );

    Ok(CleanupReport {
        cutoff,
        tickets_deleted,
        directories_removed,
    })
}
