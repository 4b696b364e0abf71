use std::time::Duration;

use reqwest::Method;
use serde_json::{json, Map, Value};
use tokio::time::sleep;
use tracing::warn;

use crate::engine::templating::{render_str, render_value};
use crate::models::action_execution::error_code;
use crate::state::AppState;

use super::{ActionFailure, ActionOutcome};

const MAX_ATTEMPTS: usize = 4;
#[cfg(test)]
const INITIAL_BACKOFF: Duration = Duration::from_millis(5);
#[cfg(not(test))]
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Dispatches an outbound webhook with retry. Network errors and 5xx
/// responses retry with exponential backoff; 4xx responses are treated
/// as caller error and fail immediately.
pub async fn send_webhook(
    state: &AppState,
    url: &str,
    method: &str,
    headers: &Map<String, Value>,
    body: &Value,
    ctx: &Value,
) -> Result<ActionOutcome, ActionFailure> {
    let url = render_str(url, ctx);
    if url.trim().is_empty() {
        return Err(ActionFailure::new(
            error_code::TEMPLATE_UNRESOLVED,
            "webhook url resolved to empty",
        ));
    }

    let method: Method = method.to_uppercase().parse().map_err(|_| {
        ActionFailure::new(
            error_code::EXTERNAL_CALL_FAILED,
            format!("invalid http method `{}`", method),
        )
    })?;

    let resolved_headers: Map<String, Value> = headers
        .iter()
        .map(|(k, v)| (k.clone(), render_value(v, ctx)))
        .collect();
    let resolved_body = render_value(body, ctx);
    let resolved_input = json!({
        "url": url,
        "method": method.as_str(),
        "headers": Value::Object(resolved_headers.clone()),
        "body": resolved_body,
    });

    let timeout = Duration::from_millis(state.config.outbound_timeout_ms);
    let mut backoff = INITIAL_BACKOFF;
    let mut last_failure: Option<ActionFailure> = None;

    for attempt in 1..=MAX_ATTEMPTS {
        let mut request = state
            .http_client
            .request(method.clone(), &url)
            .timeout(timeout);
        for (name, value) in &resolved_headers {
            let header_value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            request = request.header(name, header_value);
        }
        if !resolved_body.is_null() {
            request = request.json(&resolved_body);
        }

        let failure = match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    let response_body = response.text().await.unwrap_or_default();
                    return Ok(ActionOutcome {
                        resolved_input,
                        output: Some(json!({
                            "status": status.as_u16(),
                            "body": response_body,
                        })),
                    });
                }
                let failure = ActionFailure::new(
                    error_code::EXTERNAL_CALL_FAILED,
                    format!("webhook returned {}", status),
                )
                .with_input(resolved_input.clone());
                if status.is_client_error() {
                    // 4xx will not improve on retry.
                    return Err(failure);
                }
                failure
            }
            Err(e) => {
                let code = if e.is_timeout() {
                    error_code::TIMEOUT
                } else {
                    error_code::EXTERNAL_CALL_FAILED
                };
                ActionFailure::new(code, e.to_string()).with_input(resolved_input.clone())
            }
        };

        if attempt < MAX_ATTEMPTS {
            warn!(url = %url, attempt, error = %failure.message, "webhook attempt failed; retrying");
            sleep(backoff).await;
            backoff = backoff.saturating_mul(2);
        }
        last_failure = Some(failure);
    }

    Err(last_failure.unwrap_or_else(|| {
        ActionFailure::new(error_code::EXTERNAL_CALL_FAILED, "webhook dispatch failed")
    }))
}
