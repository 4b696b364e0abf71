use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Stable machine-readable error codes recorded alongside failures.
pub mod error_code {
    pub const TIMEOUT: &str = "timeout";
    pub const EXTERNAL_CALL_FAILED: &str = "external_call_failed";
    pub const TEMPLATE_UNRESOLVED: &str = "template_unresolved";
    pub const STORAGE_WRITE_REJECTED: &str = "storage_write_rejected";
}

/// One per-action audit row. Loops get a single aggregate row covering
/// all iterations.
#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct ActionExecution {
    pub id: Uuid,
    pub run_id: Uuid,
    pub action_id: Uuid,
    pub action_type: String,
    pub status: String,
    pub error: Option<String>,
    pub error_code: Option<String>,
    /// Resolved (post-template) inputs, recorded for audit.
    pub resolved_input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewActionExecution {
    pub run_id: Uuid,
    pub action_id: Uuid,
    pub action_type: String,
    pub status: String,
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub resolved_input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
}
