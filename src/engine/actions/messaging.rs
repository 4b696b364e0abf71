use std::time::Duration;

use serde_json::{json, Value};

use crate::engine::templating::render_str;
use crate::models::action_execution::error_code;
use crate::state::AppState;

use super::{ActionFailure, ActionOutcome};

/// Posts a message to a Slack incoming-webhook URL. Single attempt; the
/// channel-level retry policy belongs to `send_webhook`, not chat posts.
pub async fn send_slack_message(
    state: &AppState,
    webhook_url: &str,
    message: &str,
    ctx: &Value,
) -> Result<ActionOutcome, ActionFailure> {
    let url = render_str(webhook_url, ctx);
    let message = render_str(message, ctx);

    if url.trim().is_empty() {
        return Err(ActionFailure::new(
            error_code::TEMPLATE_UNRESOLVED,
            "slack webhook url resolved to empty",
        ));
    }

    let resolved_input = json!({"webhook_url": url, "message": message});
    let timeout = Duration::from_millis(state.config.outbound_timeout_ms);

    let response = state
        .http_client
        .post(&url)
        .timeout(timeout)
        .json(&json!({"text": message}))
        .send()
        .await
        .map_err(|e| {
            let code = if e.is_timeout() {
                error_code::TIMEOUT
            } else {
                error_code::EXTERNAL_CALL_FAILED
            };
            ActionFailure::new(code, e.to_string()).with_input(resolved_input.clone())
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ActionFailure::new(
            error_code::EXTERNAL_CALL_FAILED,
            format!("slack returned {}", status),
        )
        .with_input(resolved_input));
    }

    Ok(ActionOutcome {
        resolved_input,
        output: Some(json!({"status": status.as_u16()})),
    })
}
