use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Materialized next-fire row for `scheduled` and `at_scheduled_time`
/// automations. `config` holds the parsed-on-demand schedule jsonb.
#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct AutomationSchedule {
    pub id: Uuid,
    pub automation_id: Uuid,
    pub config: serde_json::Value,
    pub enabled: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_run_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_run_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}
