use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;
use uuid::Uuid;

use crate::db::automation_repository::AutomationRepository;
use crate::models::action::{
    insert_action, remove_node, reorder_siblings, sort_tree, validate_tree, ActionNode,
};
use crate::models::automation::{
    validate_trigger_config, CreateAutomation, TriggerType, UpdateAutomation,
};
use crate::models::run::NewAutomationRun;
use crate::responses::JsonResponse;
use crate::state::AppState;
use crate::utils::schedule::{compute_next_run, utc_to_offset, ScheduleConfig};
use crate::utils::webhook_token::compute_webhook_token;

fn parse_actions(value: &Value) -> Result<Vec<ActionNode>, String> {
    let mut actions: Vec<ActionNode> =
        serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
    validate_tree(&actions).map_err(|e| e.to_string())?;
    sort_tree(&mut actions);
    Ok(actions)
}

/// Keeps the schedule row in step with the automation's trigger. Only
/// `scheduled` and `at_scheduled_time` automations carry one.
async fn sync_schedule(
    state: &AppState,
    automation: &crate::models::automation::Automation,
) -> Result<(), sqlx::Error> {
    let is_schedule_trigger = matches!(
        TriggerType::parse(&automation.trigger_type),
        Some(TriggerType::Scheduled) | Some(TriggerType::AtScheduledTime)
    );
    if !is_schedule_trigger {
        return state.automation_repo.disable_schedule(automation.id).await;
    }
    let Ok(config) = ScheduleConfig::parse(&automation.trigger_config) else {
        return state.automation_repo.disable_schedule(automation.id).await;
    };
    let next = compute_next_run(&config, None, Utc::now()).and_then(utc_to_offset);
    state
        .automation_repo
        .upsert_schedule(automation.id, automation.trigger_config.clone(), next)
        .await
}

pub async fn create_automation(
    State(state): State<AppState>,
    Json(payload): Json<CreateAutomation>,
) -> Response {
    if let Err(e) = validate_trigger_config(&payload.trigger_type, &payload.trigger_config) {
        return JsonResponse::bad_request(&e.to_string()).into_response();
    }
    let actions_value = if payload.actions.is_null() {
        json!([])
    } else {
        payload.actions.clone()
    };
    if let Err(e) = parse_actions(&actions_value) {
        return JsonResponse::bad_request(&format!("invalid action tree: {}", e)).into_response();
    }

    let input = CreateAutomation {
        actions: actions_value,
        ..payload
    };
    match state.automation_repo.create_automation(input).await {
        Ok(automation) => {
            if let Err(e) = sync_schedule(&state, &automation).await {
                error!(automation_id = %automation.id, ?e, "failed to sync schedule");
            }
            (
                StatusCode::CREATED,
                Json(json!({"success": true, "automation": automation})),
            )
                .into_response()
        }
        Err(e) => {
            error!(?e, "failed to create automation");
            JsonResponse::server_error("Failed to create automation").into_response()
        }
    }
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub table_id: Option<Uuid>,
}

pub async fn list_automations(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Response {
    match state.automation_repo.list_automations(query.table_id).await {
        Ok(automations) => {
            Json(json!({"success": true, "automations": automations})).into_response()
        }
        Err(e) => {
            error!(?e, "failed to list automations");
            JsonResponse::server_error("Failed to list automations").into_response()
        }
    }
}

pub async fn get_automation(
    State(state): State<AppState>,
    Path(automation_id): Path<Uuid>,
) -> Response {
    match state.automation_repo.find_automation(automation_id).await {
        Ok(Some(automation)) => {
            Json(json!({"success": true, "automation": automation})).into_response()
        }
        Ok(None) => JsonResponse::not_found("Automation not found").into_response(),
        Err(e) => {
            error!(?e, "failed to load automation");
            JsonResponse::server_error("Failed to load automation").into_response()
        }
    }
}

pub async fn update_automation(
    State(state): State<AppState>,
    Path(automation_id): Path<Uuid>,
    Json(payload): Json<UpdateAutomation>,
) -> Response {
    if let (Some(trigger_type), Some(config)) = (&payload.trigger_type, &payload.trigger_config) {
        if let Err(e) = validate_trigger_config(trigger_type, config) {
            return JsonResponse::bad_request(&e.to_string()).into_response();
        }
    }
    match state
        .automation_repo
        .update_automation(automation_id, payload)
        .await
    {
        Ok(Some(automation)) => {
            if let Err(e) = sync_schedule(&state, &automation).await {
                error!(automation_id = %automation.id, ?e, "failed to sync schedule");
            }
            Json(json!({"success": true, "automation": automation})).into_response()
        }
        Ok(None) => JsonResponse::not_found("Automation not found").into_response(),
        Err(e) => {
            error!(?e, "failed to update automation");
            JsonResponse::server_error("Failed to update automation").into_response()
        }
    }
}

pub async fn delete_automation(
    State(state): State<AppState>,
    Path(automation_id): Path<Uuid>,
) -> Response {
    if let Err(e) = state.automation_repo.disable_schedule(automation_id).await {
        error!(?e, "failed to disable schedule before delete");
    }
    match state.automation_repo.delete_automation(automation_id).await {
        Ok(true) => JsonResponse::success("Automation deleted").into_response(),
        Ok(false) => JsonResponse::not_found("Automation not found").into_response(),
        Err(e) => {
            error!(?e, "failed to delete automation");
            JsonResponse::server_error("Failed to delete automation").into_response()
        }
    }
}

async fn set_enabled(state: &AppState, automation_id: Uuid, enabled: bool) -> Response {
    match state.automation_repo.set_enabled(automation_id, enabled).await {
        Ok(Some(automation)) => {
            Json(json!({"success": true, "automation": automation})).into_response()
        }
        Ok(None) => JsonResponse::not_found("Automation not found").into_response(),
        Err(e) => {
            error!(?e, "failed to toggle automation");
            JsonResponse::server_error("Failed to update automation").into_response()
        }
    }
}

/// Pausing stops new runs from being enqueued; runs already queued or
/// suspended keep going.
pub async fn pause_automation(
    State(state): State<AppState>,
    Path(automation_id): Path<Uuid>,
) -> Response {
    set_enabled(&state, automation_id, false).await
}

pub async fn resume_automation(
    State(state): State<AppState>,
    Path(automation_id): Path<Uuid>,
) -> Response {
    set_enabled(&state, automation_id, true).await
}

#[derive(Deserialize)]
pub struct AddActionPayload {
    pub parent_id: Option<Uuid>,
    pub branch: Option<String>,
    pub action: Value,
}

async fn mutate_actions<F>(state: &AppState, automation_id: Uuid, mutate: F) -> Response
where
    F: FnOnce(&mut Vec<ActionNode>) -> Result<(), String>,
{
    let automation = match state.automation_repo.find_automation(automation_id).await {
        Ok(Some(automation)) => automation,
        Ok(None) => return JsonResponse::not_found("Automation not found").into_response(),
        Err(e) => {
            error!(?e, "failed to load automation");
            return JsonResponse::server_error("Failed to load automation").into_response();
        }
    };

    let mut actions = match parse_actions(&automation.actions) {
        Ok(actions) => actions,
        Err(e) => {
            error!(automation_id = %automation_id, error = %e, "stored action tree is invalid");
            return JsonResponse::server_error("Stored action tree is invalid").into_response();
        }
    };

    if let Err(e) = mutate(&mut actions) {
        return JsonResponse::bad_request(&e).into_response();
    }
    if let Err(e) = validate_tree(&actions) {
        return JsonResponse::bad_request(&e.to_string()).into_response();
    }
    sort_tree(&mut actions);

    let actions_value = match serde_json::to_value(&actions) {
        Ok(value) => value,
        Err(e) => {
            error!(?e, "failed to serialize action tree");
            return JsonResponse::server_error("Failed to save action tree").into_response();
        }
    };
    match state
        .automation_repo
        .update_actions(automation_id, actions_value)
        .await
    {
        Ok(Some(automation)) => {
            Json(json!({"success": true, "automation": automation})).into_response()
        }
        Ok(None) => JsonResponse::not_found("Automation not found").into_response(),
        Err(e) => {
            error!(?e, "failed to save action tree");
            JsonResponse::server_error("Failed to save action tree").into_response()
        }
    }
}

pub async fn add_action(
    State(state): State<AppState>,
    Path(automation_id): Path<Uuid>,
    Json(payload): Json<AddActionPayload>,
) -> Response {
    let node: ActionNode = match serde_json::from_value(payload.action) {
        Ok(node) => node,
        Err(e) => return JsonResponse::bad_request(&format!("invalid action: {}", e)).into_response(),
    };
    mutate_actions(&state, automation_id, |actions| {
        insert_action(actions, payload.parent_id, payload.branch.as_deref(), node)
            .map_err(|e| e.to_string())
    })
    .await
}

pub async fn update_action(
    State(state): State<AppState>,
    Path((automation_id, action_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<Value>,
) -> Response {
    let mut replacement: ActionNode = match serde_json::from_value(payload) {
        Ok(node) => node,
        Err(e) => return JsonResponse::bad_request(&format!("invalid action: {}", e)).into_response(),
    };
    replacement.id = action_id;
    mutate_actions(&state, automation_id, |actions| {
        let node = crate::models::action::find_node_mut(actions, action_id)
            .ok_or_else(|| format!("action {} not found", action_id))?;
        *node = replacement;
        Ok(())
    })
    .await
}

pub async fn delete_action(
    State(state): State<AppState>,
    Path((automation_id, action_id)): Path<(Uuid, Uuid)>,
) -> Response {
    mutate_actions(&state, automation_id, |actions| {
        remove_node(actions, action_id)
            .map(|_| ())
            .ok_or_else(|| format!("action {} not found", action_id))
    })
    .await
}

#[derive(Deserialize)]
pub struct ReorderPayload {
    pub orders: Vec<ReorderEntry>,
}

#[derive(Deserialize)]
pub struct ReorderEntry {
    pub id: Uuid,
    pub order: i32,
}

pub async fn reorder_actions(
    State(state): State<AppState>,
    Path(automation_id): Path<Uuid>,
    Json(payload): Json<ReorderPayload>,
) -> Response {
    let orders: Vec<(Uuid, i32)> = payload.orders.iter().map(|e| (e.id, e.order)).collect();
    mutate_actions(&state, automation_id, |actions| {
        reorder_siblings(actions, &orders).map_err(|e| e.to_string())
    })
    .await
}

#[derive(Deserialize, Default)]
pub struct ManualTriggerPayload {
    #[serde(default)]
    pub record_id: Option<String>,
    #[serde(default)]
    pub record: Option<Value>,
}

/// Fires a `button_clicked` automation for one record.
pub async fn trigger_automation(
    State(state): State<AppState>,
    Path(automation_id): Path<Uuid>,
    Json(payload): Json<ManualTriggerPayload>,
) -> Response {
    let automation = match state.automation_repo.find_automation(automation_id).await {
        Ok(Some(automation)) => automation,
        Ok(None) => return JsonResponse::not_found("Automation not found").into_response(),
        Err(e) => {
            error!(?e, "failed to load automation");
            return JsonResponse::server_error("Failed to load automation").into_response();
        }
    };
    if !automation.enabled {
        return JsonResponse::conflict("Automation is paused").into_response();
    }
    if TriggerType::parse(&automation.trigger_type) != Some(TriggerType::ButtonClicked) {
        return JsonResponse::bad_request("Automation is not manually triggered").into_response();
    }

    let trigger_snapshot = json!({
        "event_type": "button_clicked",
        "table_id": automation.table_id,
        "record_id": payload.record_id,
        "record": payload.record.unwrap_or_else(|| json!({})),
    });
    match state
        .automation_repo
        .create_run(NewAutomationRun {
            automation_id: automation.id,
            table_id: automation.table_id,
            trigger_snapshot,
            actions_snapshot: automation.actions.clone(),
        })
        .await
    {
        Ok(run) => (
            StatusCode::ACCEPTED,
            Json(json!({"success": true, "run": run})),
        )
            .into_response(),
        Err(e) => {
            error!(?e, "failed to enqueue manual run");
            JsonResponse::server_error("Failed to enqueue run").into_response()
        }
    }
}

pub async fn get_webhook_url(
    State(state): State<AppState>,
    Path(automation_id): Path<Uuid>,
) -> Response {
    match state.automation_repo.find_automation(automation_id).await {
        Ok(Some(automation)) => {
            if TriggerType::parse(&automation.trigger_type) != Some(TriggerType::WebhookReceived) {
                return JsonResponse::bad_request("Automation has no webhook trigger")
                    .into_response();
            }
            let token = compute_webhook_token(
                &state.config.webhook_secret,
                automation.id,
                automation.webhook_salt,
            );
            let url = format!("/api/hooks/{}", token);
            Json(json!({"success": true, "url": url})).into_response()
        }
        Ok(None) => JsonResponse::not_found("Automation not found").into_response(),
        Err(e) => {
            error!(?e, "failed to build webhook url");
            JsonResponse::server_error("Failed to get webhook URL").into_response()
        }
    }
}
