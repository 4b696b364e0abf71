use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};

use crate::db::automation_repository::AutomationRepository;
use crate::engine::condition;
use crate::models::automation::{
    Automation, ConditionsTriggerConfig, FieldChangedTriggerConfig, TriggerType,
    UpdatedTriggerConfig,
};
use crate::models::run::{AutomationRun, NewAutomationRun};
use crate::models::trigger_event::{TriggerEvent, TriggerEventType};
use crate::state::AppState;

/// Decides whether one automation fires for one data-change event.
/// Pure: consults only the automation row and the event snapshots.
pub fn matches(automation: &Automation, event: &TriggerEvent) -> bool {
    if automation.table_id != event.table_id || !automation.enabled {
        return false;
    }
    let Some(trigger) = TriggerType::parse(&automation.trigger_type) else {
        warn!(
            automation_id = %automation.id,
            trigger_type = %automation.trigger_type,
            "unknown trigger type; automation never fires"
        );
        return false;
    };
    if !trigger.is_event_driven() {
        // Schedules, webhooks, and buttons enqueue through their own
        // paths; they never match store events.
        return false;
    }
    match trigger {
        TriggerType::RecordCreated => event.event_type == TriggerEventType::RecordCreated,
        TriggerType::RecordUpdated => updated_matches(automation, event),
        TriggerType::RecordDeleted => event.event_type == TriggerEventType::RecordDeleted,
        TriggerType::FormSubmitted => event.event_type == TriggerEventType::FormSubmitted,
        TriggerType::FieldChanged => field_changed_matches(automation, event),
        TriggerType::RecordMatchesConditions => conditions_match(automation, event),
        _ => false,
    }
}

/// An empty (or absent) `field_ids` list matches every update; a
/// non-empty list requires an intersection with the changed fields.
fn updated_matches(automation: &Automation, event: &TriggerEvent) -> bool {
    if event.event_type != TriggerEventType::RecordUpdated {
        return false;
    }
    let config = if automation.trigger_config.is_null() {
        UpdatedTriggerConfig::default()
    } else {
        match serde_json::from_value::<UpdatedTriggerConfig>(automation.trigger_config.clone()) {
            Ok(config) => config,
            Err(_) => {
                warn!(automation_id = %automation.id, "invalid record_updated config; skipping");
                return false;
            }
        }
    };
    config.field_ids.is_empty()
        || config
            .field_ids
            .iter()
            .any(|f| event.changed_field_ids.contains(f))
}

fn field_changed_matches(automation: &Automation, event: &TriggerEvent) -> bool {
    if event.event_type != TriggerEventType::RecordUpdated {
        return false;
    }
    let Ok(config) = serde_json::from_value::<FieldChangedTriggerConfig>(
        automation.trigger_config.clone(),
    ) else {
        warn!(automation_id = %automation.id, "invalid field_changed config; skipping");
        return false;
    };
    if !event.changed_field_ids.iter().any(|f| f == &config.field_id) {
        return false;
    }
    if let Some(to_value) = &config.to_value {
        let after = event
            .after
            .as_ref()
            .and_then(|r| r.get(&config.field_id))
            .unwrap_or(&Value::Null);
        if after != to_value {
            return false;
        }
    }
    if let Some(from_value) = &config.from_value {
        let before = event
            .before
            .as_ref()
            .and_then(|r| r.get(&config.field_id))
            .unwrap_or(&Value::Null);
        if before != from_value {
            return false;
        }
    }
    true
}

/// `record_matches_conditions` fires on entering the matching set, not
/// on every write while inside it. Creations match on the new state;
/// updates only when the previous state did not already match.
fn conditions_match(automation: &Automation, event: &TriggerEvent) -> bool {
    let Ok(config) =
        serde_json::from_value::<ConditionsTriggerConfig>(automation.trigger_config.clone())
    else {
        warn!(automation_id = %automation.id, "invalid conditions config; skipping");
        return false;
    };
    match event.event_type {
        TriggerEventType::RecordCreated | TriggerEventType::FormSubmitted => event
            .after
            .as_ref()
            .map(|after| condition::evaluate(&config.conditions, after))
            .unwrap_or(false),
        TriggerEventType::RecordUpdated => {
            let after_matches = event
                .after
                .as_ref()
                .map(|after| condition::evaluate(&config.conditions, after))
                .unwrap_or(false);
            let before_matched = event
                .before
                .as_ref()
                .map(|before| condition::evaluate(&config.conditions, before))
                .unwrap_or(false);
            after_matches && !before_matched
        }
        TriggerEventType::RecordDeleted => false,
    }
}

/// Freezes the trigger context for a run. Templates resolve against
/// this snapshot for the whole run, including after delay resumes.
pub fn trigger_snapshot(event: &TriggerEvent) -> Value {
    json!({
        "event_type": event.event_type,
        "table_id": event.table_id,
        "record_id": event.record_id,
        "record": event.record_snapshot(),
        "previous_record": event.before,
        "changed_field_ids": event.changed_field_ids,
        "user": event.actor,
        "occurred_at": event
            .occurred_at
            .format(&Rfc3339)
            .unwrap_or_default(),
    })
}

/// Fans one store event out to every matching enabled automation on the
/// table, enqueueing a pending run per match. Writes performed by
/// actions go through the record store port directly and never re-enter
/// this dispatch, so automations cannot cascade into each other.
pub async fn dispatch_record_event(
    state: &AppState,
    event: &TriggerEvent,
) -> Result<Vec<AutomationRun>, sqlx::Error> {
    let automations = state
        .automation_repo
        .list_enabled_for_table(event.table_id)
        .await?;

    let mut runs = Vec::new();
    for automation in &automations {
        if !matches(automation, event) {
            continue;
        }
        debug!(
            automation_id = %automation.id,
            table_id = %event.table_id,
            record_id = %event.record_id,
            "trigger matched; enqueueing run"
        );
        let run = state
            .automation_repo
            .create_run(NewAutomationRun {
                automation_id: automation.id,
                table_id: automation.table_id,
                trigger_snapshot: trigger_snapshot(event),
                actions_snapshot: automation.actions.clone(),
            })
            .await?;
        runs.push(run);
    }
    Ok(runs)
}
