use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEventType {
    RecordCreated,
    RecordUpdated,
    RecordDeleted,
    FormSubmitted,
}

/// A data-change event emitted by the record store. Carries before and
/// after snapshots so matching never re-reads live data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub event_type: TriggerEventType,
    pub table_id: Uuid,
    pub record_id: String,
    /// Record state before the change; absent for creations.
    pub before: Option<Value>,
    /// Record state after the change; absent for deletions.
    pub after: Option<Value>,
    /// Field ids whose values changed, populated for updates.
    #[serde(default)]
    pub changed_field_ids: Vec<String>,
    /// Who caused the change, when known.
    pub actor: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
}

impl TriggerEvent {
    /// The record snapshot that trigger templates see: the post-change
    /// state, or the pre-change state for deletions.
    pub fn record_snapshot(&self) -> &Value {
        match (&self.after, &self.before) {
            (Some(after), _) => after,
            (None, Some(before)) => before,
            (None, None) => &Value::Null,
        }
    }
}
