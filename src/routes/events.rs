use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use crate::engine::matcher::dispatch_record_event;
use crate::models::trigger_event::TriggerEvent;
use crate::responses::JsonResponse;
use crate::state::AppState;

/// Ingestion point for the record store's data-change pushes. Fans the
/// event out to matching automations and answers with the enqueued runs.
pub async fn ingest_record_event(
    State(state): State<AppState>,
    Json(event): Json<TriggerEvent>,
) -> Response {
    match dispatch_record_event(&state, &event).await {
        Ok(runs) => {
            let run_ids: Vec<_> = runs.iter().map(|r| r.id).collect();
            (
                StatusCode::ACCEPTED,
                Json(json!({"success": true, "run_ids": run_ids})),
            )
                .into_response()
        }
        Err(e) => {
            error!(table_id = %event.table_id, ?e, "failed to dispatch record event");
            JsonResponse::server_error("Failed to dispatch event").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::automation_repository::AutomationRepository;
    use crate::models::automation::CreateAutomation;
    use crate::models::trigger_event::TriggerEventType;
    use crate::test_support::{event, test_state};
    use uuid::Uuid;

    #[tokio::test]
    async fn ingested_event_enqueues_matching_runs() {
        let state = test_state();
        let table = Uuid::new_v4();
        let automation = state
            .automation_repo
            .create_automation(CreateAutomation {
                table_id: table,
                name: "on create".to_string(),
                description: None,
                trigger_type: "record_created".to_string(),
                trigger_config: json!({}),
                actions: json!([]),
            })
            .await
            .unwrap();

        let ev = event(
            table,
            TriggerEventType::RecordCreated,
            None,
            Some(json!({"Name": "Widget"})),
        );
        let resp = ingest_record_event(State(state.clone()), Json(ev)).await;
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let runs = state
            .automation_repo
            .list_runs(automation.id, 10)
            .await
            .unwrap();
        assert_eq!(runs.len(), 1);
    }
}
