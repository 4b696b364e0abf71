use serde_json::Value;

use crate::models::action::ActionKind;
use crate::models::action_execution::error_code;
use crate::state::AppState;

mod email;
mod messaging;
mod record;
mod script;
mod webhook;

/// A leaf action that ran (or tried to run): resolved inputs kept for
/// the audit trail, plus whatever output the action produced.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub resolved_input: Value,
    pub output: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct ActionFailure {
    pub resolved_input: Option<Value>,
    pub message: String,
    pub code: &'static str,
}

impl ActionFailure {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            resolved_input: None,
            message: message.into(),
            code,
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.resolved_input = Some(input);
        self
    }
}

/// Executes one leaf action against the run context. Structural nodes
/// (conditional, loop, delay) never reach this dispatch; the executor
/// walks those itself.
pub async fn execute_action(
    state: &AppState,
    kind: &ActionKind,
    ctx: &Value,
) -> Result<ActionOutcome, ActionFailure> {
    match kind {
        ActionKind::CreateRecord { table_id, fields } => {
            record::create_record(state, *table_id, fields, ctx).await
        }
        ActionKind::UpdateRecord {
            table_id,
            record_id,
            fields,
        } => record::update_record(state, *table_id, record_id, fields, ctx).await,
        ActionKind::DeleteRecord {
            table_id,
            record_id,
        } => record::delete_record(state, *table_id, record_id, ctx).await,
        ActionKind::LinkRecords {
            table_id,
            record_id,
            field_id,
            target_record_id,
        } => {
            record::link_records(state, *table_id, record_id, field_id, target_record_id, ctx, true)
                .await
        }
        ActionKind::UnlinkRecords {
            table_id,
            record_id,
            field_id,
            target_record_id,
        } => {
            record::link_records(
                state,
                *table_id,
                record_id,
                field_id,
                target_record_id,
                ctx,
                false,
            )
            .await
        }
        ActionKind::SendEmail { to, subject, body } => {
            email::send_email(state, to, subject, body, ctx).await
        }
        ActionKind::SendSlackMessage {
            webhook_url,
            message,
        } => messaging::send_slack_message(state, webhook_url, message, ctx).await,
        ActionKind::SendWebhook {
            url,
            method,
            headers,
            body,
        } => webhook::send_webhook(state, url, method, headers, body, ctx).await,
        ActionKind::RunScript {
            language,
            script,
            input,
        } => script::run_script(state, language, script, input, ctx).await,
        ActionKind::Conditional { .. } | ActionKind::Loop { .. } | ActionKind::Delay { .. } => {
            Err(ActionFailure::new(
                error_code::EXTERNAL_CALL_FAILED,
                format!("structural action `{}` dispatched as leaf", kind.type_name()),
            ))
        }
    }
}
