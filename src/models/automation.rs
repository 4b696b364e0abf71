use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::engine::condition::FilterGroup;

#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct Automation {
    pub id: Uuid,
    pub table_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub trigger_type: String,
    pub trigger_config: Value,
    /// Root-level action tree, stored as jsonb.
    pub actions: Value,
    #[serde(skip_serializing)]
    pub webhook_salt: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateAutomation {
    pub table_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub trigger_type: String,
    #[serde(default)]
    pub trigger_config: Value,
    #[serde(default)]
    pub actions: Value,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct UpdateAutomation {
    pub name: Option<String>,
    pub description: Option<String>,
    pub trigger_type: Option<String>,
    pub trigger_config: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerType {
    RecordCreated,
    RecordUpdated,
    RecordDeleted,
    RecordMatchesConditions,
    FieldChanged,
    FormSubmitted,
    Scheduled,
    AtScheduledTime,
    WebhookReceived,
    ButtonClicked,
}

impl TriggerType {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "record_created" => TriggerType::RecordCreated,
            "record_updated" => TriggerType::RecordUpdated,
            "record_deleted" => TriggerType::RecordDeleted,
            "record_matches_conditions" => TriggerType::RecordMatchesConditions,
            "field_changed" => TriggerType::FieldChanged,
            "form_submitted" => TriggerType::FormSubmitted,
            "scheduled" => TriggerType::Scheduled,
            "at_scheduled_time" => TriggerType::AtScheduledTime,
            "webhook_received" => TriggerType::WebhookReceived,
            "button_clicked" => TriggerType::ButtonClicked,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::RecordCreated => "record_created",
            TriggerType::RecordUpdated => "record_updated",
            TriggerType::RecordDeleted => "record_deleted",
            TriggerType::RecordMatchesConditions => "record_matches_conditions",
            TriggerType::FieldChanged => "field_changed",
            TriggerType::FormSubmitted => "form_submitted",
            TriggerType::Scheduled => "scheduled",
            TriggerType::AtScheduledTime => "at_scheduled_time",
            TriggerType::WebhookReceived => "webhook_received",
            TriggerType::ButtonClicked => "button_clicked",
        }
    }

    /// Trigger types that fire off data-change events from the record
    /// store, as opposed to schedules, inbound webhooks, or user clicks.
    pub fn is_event_driven(&self) -> bool {
        matches!(
            self,
            TriggerType::RecordCreated
                | TriggerType::RecordUpdated
                | TriggerType::RecordDeleted
                | TriggerType::RecordMatchesConditions
                | TriggerType::FieldChanged
                | TriggerType::FormSubmitted
        )
    }
}

/// Config shape for `record_matches_conditions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionsTriggerConfig {
    pub conditions: FilterGroup,
}

/// Config shape for `record_updated`. An empty `field_ids` list matches
/// every update; otherwise at least one changed field must be listed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatedTriggerConfig {
    #[serde(default)]
    pub field_ids: Vec<String>,
}

/// Config shape for `field_changed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldChangedTriggerConfig {
    pub field_id: String,
    /// Optional value gates; when set the change must land on (or leave)
    /// the given value.
    #[serde(default)]
    pub to_value: Option<Value>,
    #[serde(default)]
    pub from_value: Option<Value>,
}

/// Config shape for `webhook_received`: maps inbound payload paths onto
/// fields of the record created for the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookTriggerConfig {
    #[serde(default)]
    pub field_mapping: serde_json::Map<String, Value>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown trigger type `{0}`")]
    UnknownTriggerType(String),
    #[error("invalid config for trigger `{trigger}`: {reason}")]
    InvalidConfig { trigger: &'static str, reason: String },
}

/// Validates that `trigger_config` parses for the given trigger type.
/// Triggers without structured config accept any object.
pub fn validate_trigger_config(trigger_type: &str, config: &Value) -> Result<(), ConfigError> {
    let trigger = TriggerType::parse(trigger_type)
        .ok_or_else(|| ConfigError::UnknownTriggerType(trigger_type.to_string()))?;
    let invalid = |reason: String| ConfigError::InvalidConfig {
        trigger: trigger.as_str(),
        reason,
    };
    match trigger {
        TriggerType::RecordUpdated => {
            if config.is_null() {
                return Ok(());
            }
            serde_json::from_value::<UpdatedTriggerConfig>(config.clone())
                .map(|_| ())
                .map_err(|e| invalid(e.to_string()))
        }
        TriggerType::RecordMatchesConditions => {
            serde_json::from_value::<ConditionsTriggerConfig>(config.clone())
                .map(|_| ())
                .map_err(|e| invalid(e.to_string()))
        }
        TriggerType::FieldChanged => {
            serde_json::from_value::<FieldChangedTriggerConfig>(config.clone())
                .map(|_| ())
                .map_err(|e| invalid(e.to_string()))
        }
        TriggerType::WebhookReceived => {
            serde_json::from_value::<WebhookTriggerConfig>(config.clone())
                .map(|_| ())
                .map_err(|e| invalid(e.to_string()))
        }
        TriggerType::Scheduled | TriggerType::AtScheduledTime => {
            crate::utils::schedule::ScheduleConfig::parse(config)
                .map(|_| ())
                .map_err(|e| invalid(e))
        }
        _ => Ok(()),
    }
}
