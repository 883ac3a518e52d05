//! Sync run repository — append-only audit rows, one per pipeline run.
//!
//! The rows double as the resume state: the watermark column is advanced
//! in the same transaction as each message's persistence, so after a
//! crash the highest committed watermark is still recoverable.

use rusqlite::{params, Connection};
use serde::Serialize;

use super::{Database, DatabaseError};

/// Resume state for a folder, derived from past runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderState {
    /// UIDVALIDITY seen by the most recent run that opened the folder.
    pub uidvalidity: u32,
    /// Highest watermark reached under that UIDVALIDITY.
    pub watermark: u32,
}

/// Counters written into the audit row when a run finishes.
#[derive(Debug, Clone, Default)]
pub struct RunTotals {
    pub messages_fetched: u32,
    pub tickets_created: u32,
    pub replies_appended: u32,
    pub duplicates_skipped: u32,
    pub messages_failed: u32,
    pub degraded_dedup: u32,
}

/// Inserts the audit row for a starting run and returns its id.
pub fn start(db: &Database, folder: &str, started_at: &str) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO sync_runs (folder, started_at) VALUES (?1, ?2)",
            params![folder, started_at],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Records the UIDVALIDITY observed after opening the folder.
pub fn set_uidvalidity(db: &Database, run_id: i64, uidvalidity: u32) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE sync_runs SET uidvalidity = ?2 WHERE id = ?1",
            params![run_id, uidvalidity],
        )?;
        Ok(())
    })
}

/// Advances the run's watermark. Called inside the same transaction that
/// persists the message the watermark now covers.
pub fn advance_watermark(
    conn: &Connection,
    run_id: i64,
    watermark: u32,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE sync_runs SET watermark = ?2 WHERE id = ?1",
        params![run_id, watermark],
    )?;
    Ok(())
}

/// Finalizes the audit row with status, counters, and the watermark the
/// run ended on.
pub fn finish(
    db: &Database,
    run_id: i64,
    status: &str,
    error: Option<&str>,
    duration_ms: i64,
    final_watermark: u32,
    totals: &RunTotals,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE sync_runs SET status = ?2, error = ?3, duration_ms = ?4, watermark = ?5,
             messages_fetched = ?6, tickets_created = ?7, replies_appended = ?8,
             duplicates_skipped = ?9, messages_failed = ?10, degraded_dedup = ?11
             WHERE id = ?1",
            params![
                run_id,
                status,
                error,
                duration_ms,
                final_watermark,
                totals.messages_fetched,
                totals.tickets_created,
                totals.replies_appended,
                totals.duplicates_skipped,
                totals.messages_failed,
                totals.degraded_dedup,
            ],
        )?;
        Ok(())
    })
}

/// Returns the folder's resume state: the last recorded UIDVALIDITY and
/// the highest watermark reached under it. `None` when no run has opened
/// the folder yet.
pub fn last_state(db: &Database, folder: &str) -> Result<Option<FolderState>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT s.uidvalidity,
                    (SELECT COALESCE(MAX(watermark), 0) FROM sync_runs
                     WHERE folder = ?1 AND uidvalidity = s.uidvalidity)
             FROM sync_runs s
             WHERE s.folder = ?1 AND s.uidvalidity IS NOT NULL
             ORDER BY s.id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![folder], |row| {
            Ok(FolderState {
                uidvalidity: row.get(0)?,
                watermark: row.get(1)?,
            })
        })?;
        match rows.next() {
            Some(Ok(val)) => Ok(Some(val)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// A full sync run audit row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRunRow {
    pub id: i64,
    pub folder: String,
    pub uidvalidity: Option<i64>,
    pub watermark: i64,
    pub started_at: String,
    pub duration_ms: Option<i64>,
    pub messages_fetched: i64,
    pub tickets_created: i64,
    pub replies_appended: i64,
    pub duplicates_skipped: i64,
    pub messages_failed: i64,
    pub degraded_dedup: i64,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Returns the most recent runs, newest first.
pub fn recent(db: &Database, limit: u32) -> Result<Vec<SyncRunRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, folder, uidvalidity, watermark, started_at, duration_ms,
             messages_fetched, tickets_created, replies_appended, duplicates_skipped,
             messages_failed, degraded_dedup, status, error
             FROM sync_runs ORDER BY id DESC LIMIT ?1",
        )?;
        let rows: Vec<SyncRunRow> = stmt
            .query_map(params![limit], |row| {
                Ok(SyncRunRow {
                    id: row.get(0)?,
                    folder: row.get(1)?,
                    uidvalidity: row.get(2)?,
                    watermark: row.get(3)?,
                    started_at: row.get(4)?,
                    duration_ms: row.get(5)?,
                    messages_fetched: row.get(6)?,
                    tickets_created: row.get(7)?,
                    replies_appended: row.get(8)?,
                    duplicates_skipped: row.get(9)?,
                    messages_failed: row.get(10)?,
                    degraded_dedup: row.get(11)?,
                    status: row.get(12)?,
                    error: row.get(13)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
