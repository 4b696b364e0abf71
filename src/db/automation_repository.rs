use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::action_execution::{ActionExecution, NewActionExecution};
use crate::models::automation::{Automation, CreateAutomation, UpdateAutomation};
use crate::models::automation_schedule::AutomationSchedule;
use crate::models::run::{AutomationRun, NewAutomationRun};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AutomationRepository: Send + Sync {
    async fn create_automation(&self, input: CreateAutomation) -> Result<Automation, sqlx::Error>;

    async fn list_automations(
        &self,
        table_id: Option<Uuid>,
    ) -> Result<Vec<Automation>, sqlx::Error>;

    /// Enabled automations on one table, the set the matcher scans per
    /// trigger event.
    async fn list_enabled_for_table(&self, table_id: Uuid)
        -> Result<Vec<Automation>, sqlx::Error>;

    async fn find_automation(&self, id: Uuid) -> Result<Option<Automation>, sqlx::Error>;

    async fn update_automation(
        &self,
        id: Uuid,
        input: UpdateAutomation,
    ) -> Result<Option<Automation>, sqlx::Error>;

    async fn update_actions(
        &self,
        id: Uuid,
        actions: Value,
    ) -> Result<Option<Automation>, sqlx::Error>;

    async fn delete_automation(&self, id: Uuid) -> Result<bool, sqlx::Error>;

    async fn set_enabled(&self, id: Uuid, enabled: bool)
        -> Result<Option<Automation>, sqlx::Error>;

    /// Enabled automations with a `webhook_received` trigger, scanned on
    /// inbound hook delivery.
    async fn list_webhook_automations(&self) -> Result<Vec<Automation>, sqlx::Error>;

    // Runs

    async fn create_run(&self, input: NewAutomationRun) -> Result<AutomationRun, sqlx::Error>;

    /// Claims one due pending run (wake_at unset or passed) and flips it
    /// to `running`. Safe to call from concurrent workers.
    async fn claim_next_due_run(&self) -> Result<Option<AutomationRun>, sqlx::Error>;

    /// Parks a running run back to `pending` with a wake time and a
    /// resume cursor. The claiming worker is released immediately.
    async fn suspend_run(
        &self,
        run_id: Uuid,
        wake_at: OffsetDateTime,
        resume_cursor: Value,
    ) -> Result<(), sqlx::Error>;

    async fn complete_run(
        &self,
        run_id: Uuid,
        status: &str,
        error: Option<String>,
    ) -> Result<(), sqlx::Error>;

    async fn get_run(&self, run_id: Uuid) -> Result<Option<AutomationRun>, sqlx::Error>;

    async fn list_runs(
        &self,
        automation_id: Uuid,
        limit: i64,
    ) -> Result<Vec<AutomationRun>, sqlx::Error>;

    async fn append_action_record(
        &self,
        record: NewActionExecution,
    ) -> Result<ActionExecution, sqlx::Error>;

    async fn list_action_records(
        &self,
        run_id: Uuid,
    ) -> Result<Vec<ActionExecution>, sqlx::Error>;

    // Schedules

    async fn upsert_schedule(
        &self,
        automation_id: Uuid,
        config: Value,
        next_run_at: Option<OffsetDateTime>,
    ) -> Result<(), sqlx::Error>;

    async fn disable_schedule(&self, automation_id: Uuid) -> Result<(), sqlx::Error>;

    async fn list_due_schedules(&self, limit: i64)
        -> Result<Vec<AutomationSchedule>, sqlx::Error>;

    async fn mark_schedule_run(
        &self,
        schedule_id: Uuid,
        last_run_at: OffsetDateTime,
        next_run_at: Option<OffsetDateTime>,
    ) -> Result<(), sqlx::Error>;
}
