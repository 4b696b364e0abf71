use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{json, Map, Value};
use tracing::{error, warn};

use crate::db::automation_repository::AutomationRepository;
use crate::engine::templating::lookup_path;
use crate::services::record_store::RecordStore;
use crate::models::automation::{TriggerType, WebhookTriggerConfig};
use crate::models::run::NewAutomationRun;
use crate::responses::JsonResponse;
use crate::state::AppState;
use crate::utils::webhook_token::{compute_webhook_token, token_matches};

/// Inbound hook delivery. The token alone identifies the automation;
/// unknown and unguessable are indistinguishable in the response.
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<Value>,
) -> Response {
    let automations = match state.automation_repo.list_webhook_automations().await {
        Ok(automations) => automations,
        Err(e) => {
            error!(?e, "failed to load webhook automations");
            return JsonResponse::server_error("Failed to process webhook").into_response();
        }
    };

    let Some(automation) = automations.iter().find(|a| {
        let expected =
            compute_webhook_token(&state.config.webhook_secret, a.id, a.webhook_salt);
        token_matches(&expected, &token)
    }) else {
        return JsonResponse::not_found_with_code("No automation for this hook", "unknown_token")
            .into_response();
    };

    if !automation.enabled {
        return JsonResponse::conflict_with_code("Automation is paused", "automation_disabled")
            .into_response();
    }

    let config = match serde_json::from_value::<WebhookTriggerConfig>(
        automation.trigger_config.clone(),
    ) {
        Ok(config) => config,
        Err(e) => {
            warn!(automation_id = %automation.id, error = %e, "webhook automation has invalid config");
            return JsonResponse::server_error("Automation misconfigured").into_response();
        }
    };
    debug_assert_eq!(
        TriggerType::parse(&automation.trigger_type),
        Some(TriggerType::WebhookReceived)
    );

    // Map configured payload paths onto record fields; unmapped paths
    // land as nulls so the record shape stays stable.
    let mut fields = Map::new();
    for (field, path) in &config.field_mapping {
        let value = path
            .as_str()
            .and_then(|p| lookup_path(p, &payload))
            .unwrap_or(Value::Null);
        fields.insert(field.clone(), value);
    }

    let record_id = match state
        .record_store
        .create_record(automation.table_id, fields.clone())
        .await
    {
        Ok(id) => id,
        Err(e) => {
            error!(automation_id = %automation.id, ?e, "failed to create record for webhook");
            return JsonResponse::server_error("Failed to store webhook payload").into_response();
        }
    };

    let trigger_snapshot = json!({
        "event_type": "webhook_received",
        "table_id": automation.table_id,
        "record_id": record_id,
        "record": Value::Object(fields),
        "payload": payload,
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
            Json(json!({"success": true, "run_id": run.id})),
        )
            .into_response(),
        Err(e) => {
            error!(automation_id = %automation.id, ?e, "failed to enqueue webhook run");
            JsonResponse::server_error("Failed to enqueue run").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::automation::CreateAutomation;
    use crate::responses::JsonResponse as JsonResponseBody;
    use crate::test_support::test_state;
    use axum::body::to_bytes;
    use uuid::Uuid;

    async fn webhook_automation(state: &AppState) -> crate::models::automation::Automation {
        state
            .automation_repo
            .create_automation(CreateAutomation {
                table_id: Uuid::new_v4(),
                name: "inbound orders".to_string(),
                description: None,
                trigger_type: "webhook_received".to_string(),
                trigger_config: json!({"field_mapping": {
                    "Name": "order.customer",
                    "Total": "order.total"
                }}),
                actions: json!([]),
            })
            .await
            .unwrap()
    }

    fn token_for(state: &AppState, automation: &crate::models::automation::Automation) -> String {
        compute_webhook_token(
            &state.config.webhook_secret,
            automation.id,
            automation.webhook_salt,
        )
    }

    #[tokio::test]
    async fn valid_token_maps_payload_and_enqueues_run() {
        let state = test_state();
        let automation = webhook_automation(&state).await;
        let token = token_for(&state, &automation);

        let resp = receive_webhook(
            State(state.clone()),
            Path(token),
            Json(json!({"order": {"customer": "Ada", "total": 42}})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let runs = state
            .automation_repo
            .list_runs(automation.id, 10)
            .await
            .unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].trigger_snapshot["record"]["Name"], "Ada");
        assert_eq!(runs[0].trigger_snapshot["record"]["Total"], 42);

        let record_id = runs[0].trigger_snapshot["record_id"].as_str().unwrap();
        let stored = state
            .record_store
            .get_record(automation.table_id, record_id)
            .await
            .unwrap();
        assert_eq!(stored["Name"], "Ada");
    }

    #[tokio::test]
    async fn unknown_token_gets_stable_error_code() {
        let state = test_state();
        webhook_automation(&state).await;

        let resp = receive_webhook(
            State(state.clone()),
            Path("not-a-real-token".to_string()),
            Json(json!({})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(resp.into_body(), 4096).await.unwrap();
        let parsed: JsonResponseBody = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.code.as_deref(), Some("unknown_token"));
    }

    #[tokio::test]
    async fn paused_automation_rejects_delivery_without_enqueue() {
        let state = test_state();
        let automation = webhook_automation(&state).await;
        state
            .automation_repo
            .set_enabled(automation.id, false)
            .await
            .unwrap();
        let token = token_for(&state, &automation);

        let resp = receive_webhook(State(state.clone()), Path(token), Json(json!({}))).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let body = to_bytes(resp.into_body(), 4096).await.unwrap();
        let parsed: JsonResponseBody = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.code.as_deref(), Some("automation_disabled"));

        let runs = state
            .automation_repo
            .list_runs(automation.id, 10)
            .await
            .unwrap();
        assert!(runs.is_empty());
    }

    #[tokio::test]
    async fn unmapped_payload_paths_become_null_fields() {
        let state = test_state();
        let automation = webhook_automation(&state).await;
        let token = token_for(&state, &automation);

        let resp = receive_webhook(
            State(state.clone()),
            Path(token),
            Json(json!({"order": {"customer": "Ada"}})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let runs = state
            .automation_repo
            .list_runs(automation.id, 10)
            .await
            .unwrap();
        assert_eq!(runs[0].trigger_snapshot["record"]["Total"], Value::Null);
    }
}
