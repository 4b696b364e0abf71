use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Run statuses. Stored as text; `partial` marks runs that finished with
/// isolated loop-iteration failures but no terminal failure.
pub mod status {
    pub const PENDING: &str = "pending";
    pub const RUNNING: &str = "running";
    pub const SUCCEEDED: &str = "succeeded";
    pub const PARTIAL: &str = "partial";
    pub const FAILED: &str = "failed";
    /// Action records only: siblings never reached after a fail-fast
    /// abort, so run history shows the full path taken.
    pub const SKIPPED: &str = "skipped";
}

#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct AutomationRun {
    pub id: Uuid,
    pub automation_id: Uuid,
    pub table_id: Uuid,
    /// Trigger context frozen at enqueue time; templates resolve against
    /// this, never against live data.
    pub trigger_snapshot: serde_json::Value,
    /// Action tree frozen at enqueue time so mid-flight edits cannot
    /// change a run already in the queue.
    pub actions_snapshot: serde_json::Value,
    pub status: String,
    pub error: Option<String>,
    /// Set while the run is parked on a delay; the worker skips the run
    /// until this passes.
    #[serde(with = "time::serde::rfc3339::option")]
    pub wake_at: Option<OffsetDateTime>,
    /// Position in the action tree to resume from after a delay.
    pub resume_cursor: Option<serde_json::Value>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAutomationRun {
    pub automation_id: Uuid,
    pub table_id: Uuid,
    pub trigger_snapshot: serde_json::Value,
    pub actions_snapshot: serde_json::Value,
}
