//! Run reports returned to callers.

use serde::Serialize;

/// Terminal status of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every listed message was handled cleanly.
    Success,
    /// The run completed but some messages failed.
    Partial,
    /// The run aborted before processing could finish.
    Failure,
}

impl RunStatus {
    /// Status string as stored in the `sync_runs` table.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failure => "failure",
        }
    }
}

/// A message that could not be processed, with the reason it failed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedMessage {
    pub uid: u32,
    pub reason: String,
}

/// Aggregate outcome of one sync run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub status: RunStatus,
    pub folder: String,
    pub messages_fetched: u32,
    pub tickets_created: u32,
    pub replies_appended: u32,
    pub duplicates_skipped: u32,
    pub messages_failed: u32,
    /// Messages deduplicated on a content hash instead of a Message-ID.
    pub degraded_dedup: u32,
    /// Highest UID handled; the next run lists strictly greater UIDs.
    pub final_watermark: u32,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailedMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Diagnostic result of a connection test. No persistence side effects.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionReport {
    pub host: String,
    pub folder: String,
    pub uidvalidity: u32,
    /// Stored watermark the next run would resume from.
    pub watermark: u32,
    /// Messages above the watermark waiting to be ingested.
    pub pending_messages: u32,
    pub folders: Vec<String>,
}
