use serde_json::{json, Value};

use crate::engine::templating::render_str;
use crate::models::action_execution::error_code;
use crate::services::mailer::Mailer;
use crate::state::AppState;

use super::{ActionFailure, ActionOutcome};

pub async fn send_email(
    state: &AppState,
    to: &str,
    subject: &str,
    body: &str,
    ctx: &Value,
) -> Result<ActionOutcome, ActionFailure> {
    let to = render_str(to, ctx);
    let subject = render_str(subject, ctx);
    let body = render_str(body, ctx);

    if to.trim().is_empty() {
        return Err(ActionFailure::new(
            error_code::TEMPLATE_UNRESOLVED,
            "email recipient resolved to empty",
        ));
    }

    let resolved_input = json!({"to": to, "subject": subject, "body": body});
    state
        .mailer
        .send_email(&to, &subject, &body)
        .await
        .map_err(|e| {
            ActionFailure::new(error_code::EXTERNAL_CALL_FAILED, e.to_string())
                .with_input(resolved_input.clone())
        })?;

    Ok(ActionOutcome {
        resolved_input,
        output: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::mailer::MockMailer;
    use crate::test_support::test_state;
    use serde_json::json;

    #[tokio::test]
    async fn recipient_resolves_from_trigger_record() {
        let state = test_state();
        let ctx = json!({"trigger": {"record": {"Email": "ada@example.com", "Name": "Ada"}}});
        send_email(
            &state,
            "{{trigger.record.Email}}",
            "Hello {{trigger.record.Name}}",
            "Welcome!",
            &ctx,
        )
        .await
        .expect("send should succeed");

        let mailer = state
            .mailer
            .as_any()
            .downcast_ref::<MockMailer>()
            .expect("test state uses the mock mailer");
        let sent = mailer.sent_emails.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "ada@example.com");
        assert_eq!(sent[0].1, "Hello Ada");
    }

    #[tokio::test]
    async fn empty_recipient_fails_before_sending() {
        let state = test_state();
        let ctx = json!({"trigger": {"record": {}}});
        let err = send_email(&state, "{{trigger.record.Email}}", "s", "b", &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code, error_code::TEMPLATE_UNRESOLVED);

        let mailer = state
            .mailer
            .as_any()
            .downcast_ref::<MockMailer>()
            .expect("test state uses the mock mailer");
        assert!(mailer.sent_emails.lock().unwrap().is_empty());
    }
}
