use axum::{
    extract::{Json, Path, Query, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::db::automation_repository::AutomationRepository;
use crate::responses::JsonResponse;
use crate::state::AppState;

const DEFAULT_RUN_LIMIT: i64 = 50;
const MAX_RUN_LIMIT: i64 = 500;

#[derive(Deserialize)]
pub struct RunListQuery {
    pub limit: Option<i64>,
}

pub async fn list_runs_for_automation(
    State(state): State<AppState>,
    Path(automation_id): Path<Uuid>,
    Query(query): Query<RunListQuery>,
) -> Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_RUN_LIMIT)
        .clamp(1, MAX_RUN_LIMIT);
    match state.automation_repo.list_runs(automation_id, limit).await {
        Ok(runs) => Json(json!({"success": true, "runs": runs})).into_response(),
        Err(e) => {
            error!(?e, "failed to list runs");
            JsonResponse::server_error("Failed to list runs").into_response()
        }
    }
}

/// One run with its full per-action audit trail.
pub async fn get_run(State(state): State<AppState>, Path(run_id): Path<Uuid>) -> Response {
    let run = match state.automation_repo.get_run(run_id).await {
        Ok(Some(run)) => run,
        Ok(None) => return JsonResponse::not_found("Run not found").into_response(),
        Err(e) => {
            error!(?e, "failed to load run");
            return JsonResponse::server_error("Failed to load run").into_response();
        }
    };
    match state.automation_repo.list_action_records(run_id).await {
        Ok(actions) => {
            Json(json!({"success": true, "run": run, "actions": actions})).into_response()
        }
        Err(e) => {
            error!(?e, "failed to load action records");
            JsonResponse::server_error("Failed to load run detail").into_response()
        }
    }
}
