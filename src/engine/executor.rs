use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::time::sleep;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::db::automation_repository::AutomationRepository;
use crate::models::action::{sort_tree, ActionKind, ActionNode};
use crate::models::action_execution::NewActionExecution;
use crate::models::run::{status, AutomationRun};
use crate::state::AppState;

use super::actions::{execute_action, ActionFailure};
use super::condition;
use super::templating::build_context;

const PERSISTENCE_MAX_ATTEMPTS: usize = 3;
/// Delays cap at ten years; longer requests park until the cap. Keeps
/// `wake_at` arithmetic inside the datetime's representable range.
const MAX_DELAY_SECONDS: u64 = 315_360_000;
#[cfg(test)]
const PERSISTENCE_INITIAL_BACKOFF: Duration = Duration::from_millis(5);
#[cfg(not(test))]
const PERSISTENCE_INITIAL_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(
        "executor persistence operation `{operation}` failed for run {run_id} after {attempts} attempts: {source}"
    )]
    Persistence {
        run_id: Uuid,
        operation: &'static str,
        attempts: usize,
        #[source]
        source: sqlx::Error,
    },
}

/// Where a suspended run left off. `path` walks the action tree: a
/// sibling index at each sequence, a branch index (0 = then, 1 = else)
/// under conditionals, an iteration index under loops. The final
/// element is the delay node itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeCursor {
    pub path: Vec<u64>,
    #[serde(default)]
    pub soft_failures: u64,
    /// Failed-iteration counts of enclosing loops, outermost first, so
    /// a resumed loop still reports an accurate aggregate.
    #[serde(default)]
    pub loop_failures: Vec<u64>,
}

enum Flow {
    Done,
    Abort { message: String },
    Suspend,
}

struct Walker {
    state: AppState,
    run_id: Uuid,
    soft_failures: u64,
    /// Failure counts for loops currently on the walk stack.
    loop_failures: Vec<u64>,
    /// Remaining fast-forward path when resuming; drained front-first.
    resume_path: Vec<u64>,
    resume_loop_failures: Vec<u64>,
}

impl Walker {
    async fn record(&self, record: NewActionExecution) -> Result<(), ExecutorError> {
        let repo = self.state.automation_repo.clone();
        retry_with_backoff(self.run_id, "append_action_record", || {
            let repo = repo.clone();
            let record = record.clone();
            async move { repo.append_action_record(record).await.map(|_| ()) }
        })
        .await
    }

    async fn record_leaf(
        &self,
        node: &ActionNode,
        started_at: OffsetDateTime,
        outcome: &Result<super::actions::ActionOutcome, ActionFailure>,
    ) -> Result<(), ExecutorError> {
        let finished_at = OffsetDateTime::now_utc();
        let record = match outcome {
            Ok(success) => NewActionExecution {
                run_id: self.run_id,
                action_id: node.id,
                action_type: node.kind.type_name().to_string(),
                status: status::SUCCEEDED.to_string(),
                error: None,
                error_code: None,
                resolved_input: Some(success.resolved_input.clone()),
                output: success.output.clone(),
                started_at,
                finished_at: Some(finished_at),
            },
            Err(failure) => NewActionExecution {
                run_id: self.run_id,
                action_id: node.id,
                action_type: node.kind.type_name().to_string(),
                status: status::FAILED.to_string(),
                error: Some(failure.message.clone()),
                error_code: Some(failure.code.to_string()),
                resolved_input: failure.resolved_input.clone(),
                output: None,
                started_at,
                finished_at: Some(finished_at),
            },
        };
        self.record(record).await
    }
}

/// Runs one claimed automation run to completion, suspension, or
/// failure. Returns `Err` only when the audit store itself is down.
pub async fn execute_run(state: AppState, run: AutomationRun) -> Result<(), ExecutorError> {
    let mut actions: Vec<ActionNode> = match serde_json::from_value(run.actions_snapshot.clone()) {
        Ok(actions) => actions,
        Err(e) => {
            warn!(run_id = %run.id, error = %e, "run has an unparseable actions snapshot");
            return complete_run_with_retry(
                &state,
                run.id,
                status::FAILED,
                Some(format!("invalid actions snapshot: {}", e)),
            )
            .await;
        }
    };
    sort_tree(&mut actions);

    let ctx = build_context(&run.trigger_snapshot);

    let mut walker = Walker {
        state: state.clone(),
        run_id: run.id,
        soft_failures: 0,
        loop_failures: Vec::new(),
        resume_path: Vec::new(),
        resume_loop_failures: Vec::new(),
    };

    if let Some(cursor_value) = &run.resume_cursor {
        match serde_json::from_value::<ResumeCursor>(cursor_value.clone()) {
            Ok(cursor) => {
                debug!(run_id = %run.id, path = ?cursor.path, "resuming run after delay");
                walker.resume_path = cursor.path;
                walker.soft_failures = cursor.soft_failures;
                walker.resume_loop_failures = cursor.loop_failures;
            }
            Err(e) => {
                warn!(run_id = %run.id, error = %e, "run has an unparseable resume cursor");
                return complete_run_with_retry(
                    &state,
                    run.id,
                    status::FAILED,
                    Some(format!("invalid resume cursor: {}", e)),
                )
                .await;
            }
        }
    }

    let mut path = Vec::new();
    let flow = run_sequence(&mut walker, &actions, &ctx, &mut path).await?;

    match flow {
        Flow::Suspend => Ok(()),
        Flow::Abort { message } => {
            complete_run_with_retry(&state, run.id, status::FAILED, Some(message)).await
        }
        Flow::Done => {
            let final_status = if walker.soft_failures > 0 {
                status::PARTIAL
            } else {
                status::SUCCEEDED
            };
            complete_run_with_retry(&state, run.id, final_status, None).await
        }
    }
}

/// Executes one sibling sequence in `order`. Resumption consumes the
/// front of the walker's cursor path to fast-forward to the suspended
/// position without re-running completed actions.
fn run_sequence<'a>(
    walker: &'a mut Walker,
    actions: &'a [ActionNode],
    ctx: &'a Value,
    path: &'a mut Vec<u64>,
) -> Pin<Box<dyn std::future::Future<Output = Result<Flow, ExecutorError>> + Send + 'a>> {
    Box::pin(async move {
        let mut start_idx = 0usize;
        let mut resume_target = None;
        if !walker.resume_path.is_empty() {
            let idx = walker.resume_path.remove(0) as usize;
            if idx < actions.len() {
                start_idx = idx;
                resume_target = Some(idx);
            } else {
                warn!(run_id = %walker.run_id, "resume cursor points past end of sequence");
                walker.resume_path.clear();
            }
        }

        for idx in start_idx..actions.len() {
            let node = &actions[idx];
            let fast_forward = resume_target == Some(idx);
            path.push(idx as u64);
            let flow = run_node(walker, node, ctx, path, fast_forward).await?;
            path.pop();
            match flow {
                Flow::Done => {}
                Flow::Abort { message } => {
                    record_skipped_tail(walker, &actions[idx + 1..]).await?;
                    return Ok(Flow::Abort { message });
                }
                Flow::Suspend => return Ok(Flow::Suspend),
            }
        }
        Ok(Flow::Done)
    })
}

async fn run_node(
    walker: &mut Walker,
    node: &ActionNode,
    ctx: &Value,
    path: &mut Vec<u64>,
    fast_forward: bool,
) -> Result<Flow, ExecutorError> {
    // A fast-forward with an exhausted path means this node is the delay
    // the run parked on: the wait already happened, so it completes now.
    if fast_forward && walker.resume_path.is_empty() {
        if let ActionKind::Delay { seconds } = &node.kind {
            let now = OffsetDateTime::now_utc();
            walker
                .record(NewActionExecution {
                    run_id: walker.run_id,
                    action_id: node.id,
                    action_type: node.kind.type_name().to_string(),
                    status: status::SUCCEEDED.to_string(),
                    error: None,
                    error_code: None,
                    resolved_input: Some(json!({"seconds": seconds})),
                    output: None,
                    started_at: now,
                    finished_at: Some(now),
                })
                .await?;
            return Ok(Flow::Done);
        }
        warn!(run_id = %walker.run_id, action_id = %node.id, "resume cursor ends on a non-delay node");
    }
    let fast_forward = fast_forward && !walker.resume_path.is_empty();

    match &node.kind {
        ActionKind::Delay { seconds } => {
            if *seconds == 0 {
                let now = OffsetDateTime::now_utc();
                walker
                    .record(NewActionExecution {
                        run_id: walker.run_id,
                        action_id: node.id,
                        action_type: node.kind.type_name().to_string(),
                        status: status::SUCCEEDED.to_string(),
                        error: None,
                        error_code: None,
                        resolved_input: Some(json!({"seconds": 0})),
                        output: None,
                        started_at: now,
                        finished_at: Some(now),
                    })
                    .await?;
                return Ok(Flow::Done);
            }
            suspend_on_delay(walker, path, *seconds).await?;
            Ok(Flow::Suspend)
        }
        ActionKind::Conditional {
            condition,
            then_actions,
            else_actions,
        } => {
            let branch_idx = if fast_forward {
                walker.resume_path.remove(0)
            } else {
                let target = condition_target(ctx);
                let take_then = condition::evaluate(condition, &target);
                let now = OffsetDateTime::now_utc();
                walker
                    .record(NewActionExecution {
                        run_id: walker.run_id,
                        action_id: node.id,
                        action_type: node.kind.type_name().to_string(),
                        status: status::SUCCEEDED.to_string(),
                        error: None,
                        error_code: None,
                        resolved_input: None,
                        output: Some(json!({"branch": if take_then { "then" } else { "else" }})),
                        started_at: now,
                        finished_at: Some(now),
                    })
                    .await?;
                if take_then {
                    0
                } else {
                    1
                }
            };
            let branch = if branch_idx == 0 {
                then_actions
            } else {
                else_actions
            };
            path.push(branch_idx);
            let flow = run_sequence(walker, branch, ctx, path).await?;
            path.pop();
            Ok(flow)
        }
        ActionKind::Loop { records, actions } => {
            run_loop(walker, node, records, actions, ctx, path, fast_forward).await
        }
        leaf => {
            let started_at = OffsetDateTime::now_utc();
            let outcome = execute_action(&walker.state, leaf, ctx).await;
            walker.record_leaf(node, started_at, &outcome).await?;
            match outcome {
                Ok(_) => Ok(Flow::Done),
                Err(failure) => Ok(Flow::Abort {
                    message: format!("{} failed: {}", node.kind.type_name(), failure.message),
                }),
            }
        }
    }
}

/// Iterates the loop body over the resolved list. Iteration failures
/// are isolated: the iteration stops, the count is kept, and the next
/// iteration proceeds. The loop writes one aggregate audit record.
#[allow(clippy::too_many_arguments)]
async fn run_loop(
    walker: &mut Walker,
    node: &ActionNode,
    records: &str,
    body: &[ActionNode],
    ctx: &Value,
    path: &mut Vec<u64>,
    fast_forward: bool,
) -> Result<Flow, ExecutorError> {
    let started_at = OffsetDateTime::now_utc();
    let resolved = super::templating::render_value(&Value::String(records.to_string()), ctx);
    let items = match resolved {
        Value::Array(items) => items,
        other => {
            let message = format!(
                "loop records expression did not resolve to a list (got {})",
                type_name_of(&other)
            );
            walker
                .record(NewActionExecution {
                    run_id: walker.run_id,
                    action_id: node.id,
                    action_type: node.kind.type_name().to_string(),
                    status: status::FAILED.to_string(),
                    error: Some(message.clone()),
                    error_code: Some(
                        crate::models::action_execution::error_code::TEMPLATE_UNRESOLVED
                            .to_string(),
                    ),
                    resolved_input: Some(json!({"records": records})),
                    output: None,
                    started_at,
                    finished_at: Some(OffsetDateTime::now_utc()),
                })
                .await?;
            return Ok(Flow::Abort { message });
        }
    };

    let mut start_iter = 0usize;
    let mut resume_iter = None;
    let mut restored_failures = 0u64;
    if fast_forward {
        let idx = walker.resume_path.remove(0) as usize;
        if !walker.resume_loop_failures.is_empty() {
            restored_failures = walker.resume_loop_failures.remove(0);
        }
        if idx < items.len() {
            start_iter = idx;
            resume_iter = Some(idx);
        } else {
            warn!(run_id = %walker.run_id, "resume cursor points past end of loop");
            walker.resume_path.clear();
        }
    }

    walker.loop_failures.push(restored_failures);
    let mut suspended = false;
    for (iter_idx, item) in items.iter().enumerate().skip(start_iter) {
        if resume_iter != Some(iter_idx) {
            // Cursor only applies to the iteration it stopped inside.
            walker.resume_path.clear();
        }
        let iter_ctx = with_loop_binding(ctx, item, iter_idx);
        path.push(iter_idx as u64);
        let flow = run_sequence(walker, body, &iter_ctx, path).await?;
        path.pop();
        match flow {
            Flow::Done => {}
            Flow::Abort { message } => {
                warn!(
                    run_id = %walker.run_id,
                    action_id = %node.id,
                    iteration = iter_idx,
                    error = %message,
                    "loop iteration failed; continuing with next record"
                );
                if let Some(count) = walker.loop_failures.last_mut() {
                    *count += 1;
                }
            }
            Flow::Suspend => {
                suspended = true;
                break;
            }
        }
    }

    let failed = walker.loop_failures.pop().unwrap_or(0);
    if suspended {
        return Ok(Flow::Suspend);
    }

    walker.soft_failures += failed;
    let record = if failed > 0 {
        NewActionExecution {
            run_id: walker.run_id,
            action_id: node.id,
            action_type: node.kind.type_name().to_string(),
            status: status::FAILED.to_string(),
            error: Some(format!("{} of {} iterations failed", failed, items.len())),
            error_code: None,
            resolved_input: Some(json!({"records": records})),
            output: Some(json!({"iterations": items.len(), "failed_iterations": failed})),
            started_at,
            finished_at: Some(OffsetDateTime::now_utc()),
        }
    } else {
        NewActionExecution {
            run_id: walker.run_id,
            action_id: node.id,
            action_type: node.kind.type_name().to_string(),
            status: status::SUCCEEDED.to_string(),
            error: None,
            error_code: None,
            resolved_input: Some(json!({"records": records})),
            output: Some(json!({"iterations": items.len(), "failed_iterations": 0})),
            started_at,
            finished_at: Some(OffsetDateTime::now_utc()),
        }
    };
    walker.record(record).await?;
    Ok(Flow::Done)
}

/// Audit records for the siblings an abort cut off, so run history can
/// distinguish "never reached" from "not recorded".
async fn record_skipped_tail(walker: &Walker, rest: &[ActionNode]) -> Result<(), ExecutorError> {
    let now = OffsetDateTime::now_utc();
    for node in rest {
        walker
            .record(NewActionExecution {
                run_id: walker.run_id,
                action_id: node.id,
                action_type: node.kind.type_name().to_string(),
                status: status::SKIPPED.to_string(),
                error: None,
                error_code: None,
                resolved_input: None,
                output: None,
                started_at: now,
                finished_at: Some(now),
            })
            .await?;
    }
    Ok(())
}

/// Parks the run instead of sleeping: status back to pending with a
/// wake time, cursor pointing at this delay. The worker thread is free
/// immediately and any worker may pick the run up once due.
async fn suspend_on_delay(
    walker: &Walker,
    path: &[u64],
    seconds: u64,
) -> Result<(), ExecutorError> {
    let wake_at = OffsetDateTime::now_utc()
        + time::Duration::seconds(seconds.min(MAX_DELAY_SECONDS) as i64);
    let cursor = ResumeCursor {
        path: path.to_vec(),
        soft_failures: walker.soft_failures,
        loop_failures: walker.loop_failures.clone(),
    };
    let cursor_value = serde_json::to_value(&cursor).unwrap_or(Value::Null);
    debug!(run_id = %walker.run_id, ?cursor.path, seconds, "suspending run on delay");

    let repo = walker.state.automation_repo.clone();
    let run_id = walker.run_id;
    retry_with_backoff(run_id, "suspend_run", || {
        let repo = repo.clone();
        let cursor_value = cursor_value.clone();
        async move { repo.suspend_run(run_id, wake_at, cursor_value).await }
    })
    .await
}

/// The record a conditional filters on: the bound loop record when
/// inside a loop, the trigger record otherwise.
fn condition_target(ctx: &Value) -> Value {
    ctx.get("loop")
        .and_then(|l| l.get("record"))
        .or_else(|| ctx.get("trigger").and_then(|t| t.get("record")))
        .cloned()
        .unwrap_or_else(|| json!({}))
}

fn with_loop_binding(ctx: &Value, record: &Value, index: usize) -> Value {
    let mut out = ctx.clone();
    if let Value::Object(map) = &mut out {
        map.insert(
            "loop".to_string(),
            json!({"record": record, "index": index}),
        );
    }
    out
}

fn type_name_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub async fn complete_run_with_retry(
    state: &AppState,
    run_id: Uuid,
    final_status: &'static str,
    error_message: Option<String>,
) -> Result<(), ExecutorError> {
    let repo = state.automation_repo.clone();
    retry_with_backoff(run_id, "complete_run", || {
        let repo = repo.clone();
        let error_message = error_message.clone();
        async move { repo.complete_run(run_id, final_status, error_message).await }
    })
    .await
}

async fn retry_with_backoff<T, Fut, F>(
    run_id: Uuid,
    operation: &'static str,
    mut op: F,
) -> Result<T, ExecutorError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    let mut attempt = 0usize;
    let mut backoff = PERSISTENCE_INITIAL_BACKOFF;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < PERSISTENCE_MAX_ATTEMPTS => {
                warn!(
                    %run_id,
                    operation,
                    attempt,
                    ?err,
                    "executor persistence operation failed; retrying"
                );
                sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
            Err(err) => {
                error!(
                    %run_id,
                    operation,
                    attempt,
                    ?err,
                    "executor persistence operation exhausted retries"
                );
                return Err(ExecutorError::Persistence {
                    run_id,
                    operation,
                    attempts: attempt,
                    source: err,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::run::NewAutomationRun;
    use crate::services::mailer::MockMailer;
    use crate::test_support::test_state;
    use serde_json::json;

    fn node(order: i32, kind: ActionKind) -> ActionNode {
        ActionNode {
            id: Uuid::new_v4(),
            order,
            kind,
        }
    }

    async fn enqueue(
        state: &AppState,
        trigger_snapshot: Value,
        actions: Vec<ActionNode>,
    ) -> AutomationRun {
        state
            .automation_repo
            .create_run(NewAutomationRun {
                automation_id: Uuid::new_v4(),
                table_id: Uuid::new_v4(),
                trigger_snapshot,
                actions_snapshot: serde_json::to_value(actions).unwrap(),
            })
            .await
            .unwrap()
    }

    fn sent_emails(state: &AppState) -> Vec<(String, String, String)> {
        state
            .mailer
            .as_any()
            .downcast_ref::<MockMailer>()
            .unwrap()
            .sent_emails
            .lock()
            .unwrap()
            .clone()
    }

    fn filter(field: &str, value: Value) -> crate::engine::condition::FilterGroup {
        crate::engine::condition::FilterGroup {
            conjunction: crate::engine::condition::Conjunction::And,
            conditions: vec![crate::engine::condition::FilterNode::Condition(
                crate::engine::condition::FilterCondition {
                    field: field.to_string(),
                    operator: crate::engine::condition::FilterOperator::Eq,
                    value,
                },
            )],
        }
    }

    #[tokio::test]
    async fn linear_run_succeeds_and_records_each_action() {
        let state = test_state();
        let snapshot = json!({"record": {"Email": "a@example.com", "Name": "Ada"}});
        let actions = vec![
            node(
                0,
                ActionKind::SendEmail {
                    to: "{{trigger.record.Email}}".into(),
                    subject: "Hi {{trigger.record.Name}}".into(),
                    body: "welcome".into(),
                },
            ),
            node(
                1,
                ActionKind::SendEmail {
                    to: "ops@example.com".into(),
                    subject: "new signup".into(),
                    body: "{{trigger.record.Name}}".into(),
                },
            ),
        ];
        let run = enqueue(&state, snapshot, actions).await;
        let claimed = state.automation_repo.claim_next_due_run().await.unwrap().unwrap();
        execute_run(state.clone(), claimed).await.unwrap();

        let finished = state.automation_repo.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(finished.status, status::SUCCEEDED);
        assert!(finished.finished_at.is_some());

        let records = state.automation_repo.list_action_records(run.id).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.status == status::SUCCEEDED));
        assert_eq!(sent_emails(&state).len(), 2);
    }

    #[tokio::test]
    async fn leaf_failure_fails_fast_and_skips_rest() {
        let state = test_state();
        let snapshot = json!({"record": {}});
        let actions = vec![
            // Recipient resolves to empty: template failure.
            node(
                0,
                ActionKind::SendEmail {
                    to: "{{trigger.record.Email}}".into(),
                    subject: "s".into(),
                    body: "b".into(),
                },
            ),
            node(
                1,
                ActionKind::SendEmail {
                    to: "ops@example.com".into(),
                    subject: "never sent".into(),
                    body: "b".into(),
                },
            ),
        ];
        let run = enqueue(&state, snapshot, actions).await;
        let claimed = state.automation_repo.claim_next_due_run().await.unwrap().unwrap();
        execute_run(state.clone(), claimed).await.unwrap();

        let finished = state.automation_repo.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(finished.status, status::FAILED);
        assert!(finished.error.unwrap().contains("send_email"));

        let records = state.automation_repo.list_action_records(run.id).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].status, status::FAILED);
        assert_eq!(records[0].error_code.as_deref(), Some("template_unresolved"));
        // The sibling the abort cut off still appears in history.
        assert_eq!(records[1].status, status::SKIPPED);
        assert_eq!(records[1].action_type, "send_email");
        assert!(records[1].error.is_none());
        assert!(sent_emails(&state).is_empty());
    }

    #[tokio::test]
    async fn huge_delay_parks_run_without_panicking() {
        let state = test_state();
        let snapshot = json!({"record": {}});
        let actions = vec![node(0, ActionKind::Delay { seconds: u64::MAX })];
        let run = enqueue(&state, snapshot, actions).await;
        let claimed = state.automation_repo.claim_next_due_run().await.unwrap().unwrap();
        execute_run(state.clone(), claimed).await.unwrap();

        let parked = state.automation_repo.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(parked.status, status::PENDING);
        let wake_at = parked.wake_at.unwrap();
        assert!(wake_at > OffsetDateTime::now_utc());
        assert!(
            wake_at
                <= OffsetDateTime::now_utc()
                    + time::Duration::seconds(MAX_DELAY_SECONDS as i64 + 60)
        );
    }

    #[tokio::test]
    async fn conditional_takes_only_matching_branch() {
        let state = test_state();
        let snapshot = json!({"record": {"Status": "Open"}});
        let actions = vec![node(
            0,
            ActionKind::Conditional {
                condition: filter("Status", json!("Open")),
                then_actions: vec![node(
                    0,
                    ActionKind::SendEmail {
                        to: "then@example.com".into(),
                        subject: "then".into(),
                        body: "b".into(),
                    },
                )],
                else_actions: vec![node(
                    0,
                    ActionKind::SendEmail {
                        to: "else@example.com".into(),
                        subject: "else".into(),
                        body: "b".into(),
                    },
                )],
            },
        )];
        let run = enqueue(&state, snapshot, actions).await;
        let claimed = state.automation_repo.claim_next_due_run().await.unwrap().unwrap();
        execute_run(state.clone(), claimed).await.unwrap();

        let emails = sent_emails(&state);
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].0, "then@example.com");

        let records = state.automation_repo.list_action_records(run.id).await.unwrap();
        let conditional = records.iter().find(|r| r.action_type == "conditional").unwrap();
        assert_eq!(conditional.output.as_ref().unwrap()["branch"], "then");
    }

    #[tokio::test]
    async fn loop_isolates_iteration_failures_and_run_is_partial() {
        let state = test_state();
        // Second record lacks an email address, so its iteration fails.
        let snapshot = json!({"record": {"Items": [
            {"Email": "one@example.com"},
            {},
            {"Email": "three@example.com"}
        ]}});
        let actions = vec![node(
            0,
            ActionKind::Loop {
                records: "{{trigger.record.Items}}".into(),
                actions: vec![node(
                    0,
                    ActionKind::SendEmail {
                        to: "{{loop.record.Email}}".into(),
                        subject: "batch".into(),
                        body: "b".into(),
                    },
                )],
            },
        )];
        let run = enqueue(&state, snapshot, actions).await;
        let claimed = state.automation_repo.claim_next_due_run().await.unwrap().unwrap();
        execute_run(state.clone(), claimed).await.unwrap();

        let finished = state.automation_repo.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(finished.status, status::PARTIAL);

        let emails = sent_emails(&state);
        assert_eq!(emails.len(), 2);
        assert_eq!(emails[0].0, "one@example.com");
        assert_eq!(emails[1].0, "three@example.com");

        let records = state.automation_repo.list_action_records(run.id).await.unwrap();
        let loop_record = records.iter().find(|r| r.action_type == "loop").unwrap();
        assert_eq!(loop_record.status, status::FAILED);
        assert_eq!(loop_record.output.as_ref().unwrap()["failed_iterations"], 1);
        assert_eq!(loop_record.output.as_ref().unwrap()["iterations"], 3);
    }

    #[tokio::test]
    async fn loop_over_non_list_fails_the_run() {
        let state = test_state();
        let snapshot = json!({"record": {"Items": "not a list"}});
        let actions = vec![node(
            0,
            ActionKind::Loop {
                records: "{{trigger.record.Items}}".into(),
                actions: vec![],
            },
        )];
        let run = enqueue(&state, snapshot, actions).await;
        let claimed = state.automation_repo.claim_next_due_run().await.unwrap().unwrap();
        execute_run(state.clone(), claimed).await.unwrap();

        let finished = state.automation_repo.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(finished.status, status::FAILED);
    }

    #[tokio::test]
    async fn delay_suspends_run_instead_of_blocking() {
        let state = test_state();
        let snapshot = json!({"record": {"Email": "a@example.com"}});
        let actions = vec![
            node(0, ActionKind::Delay { seconds: 3600 }),
            node(
                1,
                ActionKind::SendEmail {
                    to: "{{trigger.record.Email}}".into(),
                    subject: "later".into(),
                    body: "b".into(),
                },
            ),
        ];
        let run = enqueue(&state, snapshot, actions).await;
        let claimed = state.automation_repo.claim_next_due_run().await.unwrap().unwrap();

        let started = std::time::Instant::now();
        execute_run(state.clone(), claimed).await.unwrap();
        // Returns promptly; the hour is spent parked, not slept.
        assert!(started.elapsed() < Duration::from_secs(2));

        let parked = state.automation_repo.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(parked.status, status::PENDING);
        assert!(parked.wake_at.unwrap() > OffsetDateTime::now_utc());
        let cursor: ResumeCursor =
            serde_json::from_value(parked.resume_cursor.clone().unwrap()).unwrap();
        assert_eq!(cursor.path, vec![0]);
        assert!(sent_emails(&state).is_empty());

        // Not claimable while the wake time is in the future.
        assert!(state.automation_repo.claim_next_due_run().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resumed_run_skips_completed_prefix() {
        let state = test_state();
        let snapshot = json!({"record": {"Email": "a@example.com"}});
        let actions = vec![
            node(
                0,
                ActionKind::SendEmail {
                    to: "first@example.com".into(),
                    subject: "before delay".into(),
                    body: "b".into(),
                },
            ),
            node(1, ActionKind::Delay { seconds: 3600 }),
            node(
                2,
                ActionKind::SendEmail {
                    to: "second@example.com".into(),
                    subject: "after delay".into(),
                    body: "b".into(),
                },
            ),
        ];
        let run = enqueue(&state, snapshot, actions).await;
        let claimed = state.automation_repo.claim_next_due_run().await.unwrap().unwrap();
        execute_run(state.clone(), claimed).await.unwrap();
        assert_eq!(sent_emails(&state).len(), 1);

        // Simulate the wake time passing, then re-claim and resume.
        let parked = state.automation_repo.get_run(run.id).await.unwrap().unwrap();
        state
            .automation_repo
            .suspend_run(
                run.id,
                OffsetDateTime::now_utc() - time::Duration::seconds(1),
                parked.resume_cursor.unwrap(),
            )
            .await
            .unwrap();
        let reclaimed = state.automation_repo.claim_next_due_run().await.unwrap().unwrap();
        assert_eq!(reclaimed.id, run.id);
        execute_run(state.clone(), reclaimed).await.unwrap();

        let finished = state.automation_repo.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(finished.status, status::SUCCEEDED);
        let emails = sent_emails(&state);
        // First action not re-run on resume.
        assert_eq!(emails.len(), 2);
        assert_eq!(emails[1].0, "second@example.com");
    }

    #[tokio::test]
    async fn delay_inside_loop_resumes_mid_iteration() {
        let state = test_state();
        let snapshot = json!({"record": {"Items": [
            {"Email": "one@example.com"},
            {"Email": "two@example.com"}
        ]}});
        let actions = vec![node(
            0,
            ActionKind::Loop {
                records: "{{trigger.record.Items}}".into(),
                actions: vec![
                    node(0, ActionKind::Delay { seconds: 3600 }),
                    node(
                        1,
                        ActionKind::SendEmail {
                            to: "{{loop.record.Email}}".into(),
                            subject: "batch".into(),
                            body: "b".into(),
                        },
                    ),
                ],
            },
        )];
        let run = enqueue(&state, snapshot, actions).await;

        // Each claim runs until the next delay parks the run again.
        for _ in 0..2 {
            let claimed = state.automation_repo.claim_next_due_run().await.unwrap().unwrap();
            execute_run(state.clone(), claimed).await.unwrap();
            let parked = state.automation_repo.get_run(run.id).await.unwrap().unwrap();
            if parked.status == status::PENDING {
                state
                    .automation_repo
                    .suspend_run(
                        run.id,
                        OffsetDateTime::now_utc() - time::Duration::seconds(1),
                        parked.resume_cursor.unwrap(),
                    )
                    .await
                    .unwrap();
            }
        }
        let claimed = state.automation_repo.claim_next_due_run().await.unwrap().unwrap();
        execute_run(state.clone(), claimed).await.unwrap();

        let finished = state.automation_repo.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(finished.status, status::SUCCEEDED);
        let emails = sent_emails(&state);
        assert_eq!(emails.len(), 2);
        assert_eq!(emails[0].0, "one@example.com");
        assert_eq!(emails[1].0, "two@example.com");
    }

    #[tokio::test]
    async fn conditional_inside_loop_filters_per_record() {
        let state = test_state();
        let snapshot = json!({"record": {"Items": [
            {"Email": "vip@example.com", "Tier": "vip"},
            {"Email": "basic@example.com", "Tier": "basic"}
        ]}});
        let actions = vec![node(
            0,
            ActionKind::Loop {
                records: "{{trigger.record.Items}}".into(),
                actions: vec![node(
                    0,
                    ActionKind::Conditional {
                        condition: filter("Tier", json!("vip")),
                        then_actions: vec![node(
                            0,
                            ActionKind::SendEmail {
                                to: "{{loop.record.Email}}".into(),
                                subject: "vip only".into(),
                                body: "b".into(),
                            },
                        )],
                        else_actions: vec![],
                    },
                )],
            },
        )];
        let run = enqueue(&state, snapshot, actions).await;
        let claimed = state.automation_repo.claim_next_due_run().await.unwrap().unwrap();
        execute_run(state.clone(), claimed).await.unwrap();

        let finished = state.automation_repo.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(finished.status, status::SUCCEEDED);
        let emails = sent_emails(&state);
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].0, "vip@example.com");
    }

    #[tokio::test]
    async fn empty_loop_list_succeeds_with_zero_iterations() {
        let state = test_state();
        let snapshot = json!({"record": {"Items": []}});
        let actions = vec![node(
            0,
            ActionKind::Loop {
                records: "{{trigger.record.Items}}".into(),
                actions: vec![node(
                    0,
                    ActionKind::SendEmail {
                        to: "never@example.com".into(),
                        subject: "s".into(),
                        body: "b".into(),
                    },
                )],
            },
        )];
        let run = enqueue(&state, snapshot, actions).await;
        let claimed = state.automation_repo.claim_next_due_run().await.unwrap().unwrap();
        execute_run(state.clone(), claimed).await.unwrap();

        let finished = state.automation_repo.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(finished.status, status::SUCCEEDED);
        assert!(sent_emails(&state).is_empty());
        let records = state.automation_repo.list_action_records(run.id).await.unwrap();
        assert_eq!(records[0].output.as_ref().unwrap()["iterations"], 0);
    }

    #[tokio::test]
    async fn invalid_snapshot_fails_run_without_panic() {
        let state = test_state();
        let run = state
            .automation_repo
            .create_run(NewAutomationRun {
                automation_id: Uuid::new_v4(),
                table_id: Uuid::new_v4(),
                trigger_snapshot: json!({}),
                actions_snapshot: json!({"not": "a tree"}),
            })
            .await
            .unwrap();
        let claimed = state.automation_repo.claim_next_due_run().await.unwrap().unwrap();
        execute_run(state.clone(), claimed).await.unwrap();

        let finished = state.automation_repo.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(finished.status, status::FAILED);
        assert!(finished.error.unwrap().contains("invalid actions snapshot"));
    }

    #[tokio::test]
    async fn persistence_outage_surfaces_executor_error() {
        use crate::db::automation_repository::MockAutomationRepository;
        use std::sync::Arc;

        let mut repo = MockAutomationRepository::new();
        repo.expect_complete_run()
            .times(PERSISTENCE_MAX_ATTEMPTS)
            .returning(|_, _, _| Err(sqlx::Error::PoolTimedOut));

        let mut state = test_state();
        state.automation_repo = Arc::new(repo);

        let now = OffsetDateTime::now_utc();
        let run = AutomationRun {
            id: Uuid::new_v4(),
            automation_id: Uuid::new_v4(),
            table_id: Uuid::new_v4(),
            trigger_snapshot: json!({}),
            actions_snapshot: json!([]),
            status: status::RUNNING.to_string(),
            error: None,
            wake_at: None,
            resume_cursor: None,
            started_at: Some(now),
            finished_at: None,
            created_at: now,
            updated_at: now,
        };

        let err = execute_run(state, run).await.unwrap_err();
        let ExecutorError::Persistence {
            operation, attempts, ..
        } = err;
        assert_eq!(operation, "complete_run");
        assert_eq!(attempts, PERSISTENCE_MAX_ATTEMPTS);
    }
}
