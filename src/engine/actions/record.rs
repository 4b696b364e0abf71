use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::engine::templating::{render_str, render_value};
use crate::models::action_execution::error_code;
use crate::services::record_store::{RecordStore, StorageError};
use crate::state::AppState;

use super::{ActionFailure, ActionOutcome};

fn storage_failure(err: StorageError) -> ActionFailure {
    let code = match &err {
        StorageError::NotFound { .. } | StorageError::Rejected(_) => {
            error_code::STORAGE_WRITE_REJECTED
        }
        StorageError::Unavailable(_) => error_code::EXTERNAL_CALL_FAILED,
    };
    ActionFailure::new(code, err.to_string())
}

fn resolve_fields(fields: &Map<String, Value>, ctx: &Value) -> Map<String, Value> {
    fields
        .iter()
        .map(|(k, v)| (k.clone(), render_value(v, ctx)))
        .collect()
}

pub async fn create_record(
    state: &AppState,
    table_id: Uuid,
    fields: &Map<String, Value>,
    ctx: &Value,
) -> Result<ActionOutcome, ActionFailure> {
    let resolved = resolve_fields(fields, ctx);
    let resolved_input = json!({"table_id": table_id, "fields": Value::Object(resolved.clone())});
    let record_id = state
        .record_store
        .create_record(table_id, resolved)
        .await
        .map_err(|e| storage_failure(e).with_input(resolved_input.clone()))?;
    Ok(ActionOutcome {
        resolved_input,
        output: Some(json!({"record_id": record_id})),
    })
}

pub async fn update_record(
    state: &AppState,
    table_id: Uuid,
    record_id: &str,
    fields: &Map<String, Value>,
    ctx: &Value,
) -> Result<ActionOutcome, ActionFailure> {
    let record_id = render_str(record_id, ctx);
    if record_id.is_empty() {
        return Err(ActionFailure::new(
            error_code::TEMPLATE_UNRESOLVED,
            "record id resolved to empty",
        ));
    }
    let resolved = resolve_fields(fields, ctx);
    let resolved_input = json!({
        "table_id": table_id,
        "record_id": record_id,
        "fields": Value::Object(resolved.clone()),
    });
    state
        .record_store
        .update_record(table_id, &record_id, resolved)
        .await
        .map_err(|e| storage_failure(e).with_input(resolved_input.clone()))?;
    Ok(ActionOutcome {
        resolved_input,
        output: None,
    })
}

pub async fn delete_record(
    state: &AppState,
    table_id: Uuid,
    record_id: &str,
    ctx: &Value,
) -> Result<ActionOutcome, ActionFailure> {
    let record_id = render_str(record_id, ctx);
    if record_id.is_empty() {
        return Err(ActionFailure::new(
            error_code::TEMPLATE_UNRESOLVED,
            "record id resolved to empty",
        ));
    }
    let resolved_input = json!({"table_id": table_id, "record_id": record_id});
    state
        .record_store
        .delete_record(table_id, &record_id)
        .await
        .map_err(|e| storage_failure(e).with_input(resolved_input.clone()))?;
    Ok(ActionOutcome {
        resolved_input,
        output: None,
    })
}

#[allow(clippy::too_many_arguments)]
pub async fn link_records(
    state: &AppState,
    table_id: Uuid,
    record_id: &str,
    field_id: &str,
    target_record_id: &str,
    ctx: &Value,
    link: bool,
) -> Result<ActionOutcome, ActionFailure> {
    let record_id = render_str(record_id, ctx);
    let target_record_id = render_str(target_record_id, ctx);
    if record_id.is_empty() || target_record_id.is_empty() {
        return Err(ActionFailure::new(
            error_code::TEMPLATE_UNRESOLVED,
            "link endpoint resolved to empty",
        ));
    }
    let resolved_input = json!({
        "table_id": table_id,
        "record_id": record_id,
        "field_id": field_id,
        "target_record_id": target_record_id,
    });
    let result = if link {
        state
            .record_store
            .link_records(table_id, &record_id, field_id, &target_record_id)
            .await
    } else {
        state
            .record_store
            .unlink_records(table_id, &record_id, field_id, &target_record_id)
            .await
    };
    result.map_err(|e| storage_failure(e).with_input(resolved_input.clone()))?;
    Ok(ActionOutcome {
        resolved_input,
        output: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_state;
    use serde_json::json;

    #[tokio::test]
    async fn create_record_resolves_templates_into_fields() {
        let state = test_state();
        let table = Uuid::new_v4();
        let ctx = json!({"trigger": {"record": {"Name": "Widget A", "Qty": 3}}});
        let mut fields = Map::new();
        fields.insert("Title".to_string(), json!("{{trigger.record.Name}}"));
        fields.insert("Count".to_string(), json!("{{trigger.record.Qty}}"));

        let outcome = create_record(&state, table, &fields, &ctx)
            .await
            .expect("create should succeed");
        let record_id = outcome.output.unwrap()["record_id"]
            .as_str()
            .unwrap()
            .to_string();
        let stored = state.record_store.get_record(table, &record_id).await.unwrap();
        assert_eq!(stored["Title"], "Widget A");
        // Sole placeholders keep the typed value.
        assert_eq!(stored["Count"], 3);
    }

    #[tokio::test]
    async fn update_missing_record_reports_storage_rejection() {
        let state = test_state();
        let ctx = json!({"trigger": {}});
        let err = update_record(&state, Uuid::new_v4(), "rec_missing", &Map::new(), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code, error_code::STORAGE_WRITE_REJECTED);
    }

    #[tokio::test]
    async fn unresolved_record_id_fails_with_template_code() {
        let state = test_state();
        let ctx = json!({"trigger": {"record": {}}});
        let err = delete_record(&state, Uuid::new_v4(), "{{trigger.record.Missing}}", &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code, error_code::TEMPLATE_UNRESOLVED);
    }
}
