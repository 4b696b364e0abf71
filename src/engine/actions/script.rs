use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::timeout;

use crate::engine::templating::render_value;
use crate::models::action_execution::error_code;
use crate::services::script_runner::ScriptRunner;
use crate::state::AppState;

use super::{ActionFailure, ActionOutcome};

/// Runs a user script through the configured sandbox port. Inputs are
/// template-resolved; the script itself is opaque to the engine.
pub async fn run_script(
    state: &AppState,
    language: &str,
    script: &str,
    input: &Value,
    ctx: &Value,
) -> Result<ActionOutcome, ActionFailure> {
    let resolved_input_value = render_value(input, ctx);
    let resolved_input = json!({"language": language, "input": resolved_input_value});

    let budget = Duration::from_millis(state.config.script_timeout_ms);
    let run = state
        .script_runner
        .run(language, script, &resolved_input_value);

    match timeout(budget, run).await {
        Ok(Ok(output)) => Ok(ActionOutcome {
            resolved_input,
            output: Some(json!({"result": output.result, "logs": output.logs})),
        }),
        Ok(Err(e)) => Err(ActionFailure::new(error_code::EXTERNAL_CALL_FAILED, e.to_string())
            .with_input(resolved_input)),
        Err(_) => Err(ActionFailure::new(
            error_code::TIMEOUT,
            format!("script exceeded {}ms budget", state.config.script_timeout_ms),
        )
        .with_input(resolved_input)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_state;
    use serde_json::json;

    #[tokio::test]
    async fn default_runner_rejects_scripts() {
        let state = test_state();
        let err = run_script(&state, "javascript", "return 1", &json!({}), &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code, error_code::EXTERNAL_CALL_FAILED);
    }
}
