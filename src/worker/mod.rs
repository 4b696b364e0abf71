use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::db::automation_repository::AutomationRepository;
use crate::engine::execute_run;
use crate::models::automation::TriggerType;
use crate::models::automation_schedule::AutomationSchedule;
use crate::models::run::NewAutomationRun;
use crate::state::AppState;
use crate::utils::schedule::{compute_next_run, offset_to_utc, utc_to_offset, ScheduleConfig};

const ERROR_BACKOFF: Duration = Duration::from_millis(1000);
const SCHEDULE_TICK: Duration = Duration::from_secs(5);
const MAX_SCHEDULES_PER_TICK: i64 = 10;

/// Spawns the run-executing worker pool plus one scheduler task. Each
/// worker claims one due run at a time; a delayed run releases its
/// worker and is re-claimed by whichever worker is free when it wakes.
pub async fn start_background_workers(state: AppState) {
    for n in 0..state.config.worker_count {
        let state = state.clone();
        tokio::spawn(async move {
            info!(worker = n, worker_id = %state.worker_id, "run worker started");
            run_worker_loop(state).await;
        });
    }

    let scheduler_state = state.clone();
    tokio::spawn(async move {
        loop {
            if let Err(err) = process_due_schedules(&scheduler_state).await {
                error!(?err, "error processing schedules");
            }
            sleep(SCHEDULE_TICK).await;
        }
    });
}

async fn run_worker_loop(state: AppState) {
    let idle_poll = Duration::from_millis(state.config.worker_poll_ms);
    loop {
        match state.automation_repo.claim_next_due_run().await {
            Ok(Some(run)) => {
                let run_id = run.id;
                if let Err(err) = execute_run(state.clone(), run).await {
                    error!(%run_id, ?err, "run abandoned after persistence failure");
                }
            }
            Ok(None) => {
                sleep(idle_poll).await;
            }
            Err(err) => {
                error!(?err, "error claiming run");
                sleep(ERROR_BACKOFF).await;
            }
        }
    }
}

async fn process_due_schedules(state: &AppState) -> Result<(), sqlx::Error> {
    let schedules = state
        .automation_repo
        .list_due_schedules(MAX_SCHEDULES_PER_TICK)
        .await?;
    for schedule in schedules {
        let schedule_id = schedule.id;
        if let Err(err) = fire_schedule(state, schedule).await {
            error!(%schedule_id, ?err, "failed to fire schedule");
        }
    }
    Ok(())
}

async fn fire_schedule(state: &AppState, schedule: AutomationSchedule) -> Result<(), sqlx::Error> {
    let Some(automation) = state
        .automation_repo
        .find_automation(schedule.automation_id)
        .await?
    else {
        state
            .automation_repo
            .disable_schedule(schedule.automation_id)
            .await?;
        return Ok(());
    };
    if !automation.enabled {
        // Paused automations keep their schedule row but skip firing;
        // resuming re-enables it.
        return Ok(());
    }

    let config = match ScheduleConfig::parse(&schedule.config) {
        Ok(config) => config,
        Err(err) => {
            warn!(automation_id = %automation.id, %err, "disabling schedule with invalid config");
            state
                .automation_repo
                .disable_schedule(schedule.automation_id)
                .await?;
            return Ok(());
        }
    };

    let Some(fired_for) = schedule.next_run_at else {
        state
            .automation_repo
            .disable_schedule(schedule.automation_id)
            .await?;
        return Ok(());
    };

    let trigger_snapshot = json!({
        "event_type": automation.trigger_type,
        "table_id": automation.table_id,
        "scheduled_for": fired_for.to_string(),
        "schedule_config": schedule.config,
        "record": {},
    });
    state
        .automation_repo
        .create_run(NewAutomationRun {
            automation_id: automation.id,
            table_id: automation.table_id,
            trigger_snapshot,
            actions_snapshot: automation.actions.clone(),
        })
        .await?;

    // One-shot `at_scheduled_time` triggers disable after firing;
    // repeating `scheduled` triggers advance to the next occurrence.
    let next_run_at = match TriggerType::parse(&automation.trigger_type) {
        Some(TriggerType::AtScheduledTime) => None,
        _ => {
            let now = Utc::now();
            let last = offset_to_utc(fired_for).unwrap_or(now);
            compute_next_run(&config, Some(last), now).and_then(utc_to_offset)
        }
    };

    let last_run_at = utc_to_offset(Utc::now()).unwrap_or(fired_for);
    state
        .automation_repo
        .mark_schedule_run(schedule.id, last_run_at, next_run_at)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::automation::CreateAutomation;
    use crate::test_support::test_state;
    use serde_json::json;
    use time::OffsetDateTime;

    async fn scheduled_automation(
        state: &crate::state::AppState,
        trigger_type: &str,
    ) -> crate::models::automation::Automation {
        state
            .automation_repo
            .create_automation(CreateAutomation {
                table_id: uuid::Uuid::new_v4(),
                name: "nightly".to_string(),
                description: None,
                trigger_type: trigger_type.to_string(),
                trigger_config: json!({"startDate": "2026-01-01", "startTime": "09:00"}),
                actions: json!([]),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn due_schedule_enqueues_run_and_advances() {
        let state = test_state();
        let automation = scheduled_automation(&state, "scheduled").await;
        state
            .automation_repo
            .upsert_schedule(
                automation.id,
                json!({
                    "startDate": "2026-01-01",
                    "startTime": "09:00",
                    "repeat": {"every": 1, "unit": "days"}
                }),
                Some(OffsetDateTime::now_utc() - time::Duration::seconds(1)),
            )
            .await
            .unwrap();

        process_due_schedules(&state).await.unwrap();

        let runs = state
            .automation_repo
            .list_runs(automation.id, 10)
            .await
            .unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "pending");
        assert_eq!(runs[0].trigger_snapshot["event_type"], "scheduled");

        // Advanced to a future occurrence, so it is no longer due.
        let due = state.automation_repo.list_due_schedules(10).await.unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn one_shot_schedule_disables_after_firing() {
        let state = test_state();
        let automation = scheduled_automation(&state, "at_scheduled_time").await;
        state
            .automation_repo
            .upsert_schedule(
                automation.id,
                json!({"startDate": "2026-01-01", "startTime": "09:00"}),
                Some(OffsetDateTime::now_utc() - time::Duration::seconds(1)),
            )
            .await
            .unwrap();

        process_due_schedules(&state).await.unwrap();
        process_due_schedules(&state).await.unwrap();

        let runs = state
            .automation_repo
            .list_runs(automation.id, 10)
            .await
            .unwrap();
        assert_eq!(runs.len(), 1);
    }

    #[tokio::test]
    async fn paused_automation_schedule_does_not_fire() {
        let state = test_state();
        let automation = scheduled_automation(&state, "scheduled").await;
        state
            .automation_repo
            .set_enabled(automation.id, false)
            .await
            .unwrap();
        state
            .automation_repo
            .upsert_schedule(
                automation.id,
                json!({"startDate": "2026-01-01", "startTime": "09:00"}),
                Some(OffsetDateTime::now_utc() - time::Duration::seconds(1)),
            )
            .await
            .unwrap();

        process_due_schedules(&state).await.unwrap();

        let runs = state
            .automation_repo
            .list_runs(automation.id, 10)
            .await
            .unwrap();
        assert!(runs.is_empty());
    }
}
