use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::automation_repository::AutomationRepository;
use crate::models::action_execution::{ActionExecution, NewActionExecution};
use crate::models::automation::{Automation, CreateAutomation, UpdateAutomation};
use crate::models::automation_schedule::AutomationSchedule;
use crate::models::run::{status, AutomationRun, NewAutomationRun};

/// In-memory repository. Backs executor and route tests, and serves as
/// the wiring when no DATABASE_URL is configured.
#[derive(Default)]
pub struct MemoryAutomationRepository {
    automations: Mutex<HashMap<Uuid, Automation>>,
    runs: Mutex<HashMap<Uuid, AutomationRun>>,
    action_records: Mutex<Vec<ActionExecution>>,
    schedules: Mutex<HashMap<Uuid, AutomationSchedule>>,
}

impl MemoryAutomationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AutomationRepository for MemoryAutomationRepository {
    async fn create_automation(&self, input: CreateAutomation) -> Result<Automation, sqlx::Error> {
        let now = OffsetDateTime::now_utc();
        let automation = Automation {
            id: Uuid::new_v4(),
            table_id: input.table_id,
            name: input.name,
            description: input.description,
            enabled: true,
            trigger_type: input.trigger_type,
            trigger_config: input.trigger_config,
            actions: input.actions,
            webhook_salt: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        };
        self.automations
            .lock()
            .unwrap()
            .insert(automation.id, automation.clone());
        Ok(automation)
    }

    async fn list_automations(
        &self,
        table_id: Option<Uuid>,
    ) -> Result<Vec<Automation>, sqlx::Error> {
        let automations = self.automations.lock().unwrap();
        let mut results: Vec<Automation> = automations
            .values()
            .filter(|a| table_id.map(|t| a.table_id == t).unwrap_or(true))
            .cloned()
            .collect();
        results.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(results)
    }

    async fn list_enabled_for_table(
        &self,
        table_id: Uuid,
    ) -> Result<Vec<Automation>, sqlx::Error> {
        let automations = self.automations.lock().unwrap();
        let mut results: Vec<Automation> = automations
            .values()
            .filter(|a| a.table_id == table_id && a.enabled)
            .cloned()
            .collect();
        results.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(results)
    }

    async fn find_automation(&self, id: Uuid) -> Result<Option<Automation>, sqlx::Error> {
        Ok(self.automations.lock().unwrap().get(&id).cloned())
    }

    async fn update_automation(
        &self,
        id: Uuid,
        input: UpdateAutomation,
    ) -> Result<Option<Automation>, sqlx::Error> {
        let mut automations = self.automations.lock().unwrap();
        let Some(automation) = automations.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = input.name {
            automation.name = name;
        }
        if let Some(description) = input.description {
            automation.description = Some(description);
        }
        if let Some(trigger_type) = input.trigger_type {
            automation.trigger_type = trigger_type;
        }
        if let Some(trigger_config) = input.trigger_config {
            automation.trigger_config = trigger_config;
        }
        automation.updated_at = OffsetDateTime::now_utc();
        Ok(Some(automation.clone()))
    }

    async fn update_actions(
        &self,
        id: Uuid,
        actions: Value,
    ) -> Result<Option<Automation>, sqlx::Error> {
        let mut automations = self.automations.lock().unwrap();
        let Some(automation) = automations.get_mut(&id) else {
            return Ok(None);
        };
        automation.actions = actions;
        automation.updated_at = OffsetDateTime::now_utc();
        Ok(Some(automation.clone()))
    }

    async fn delete_automation(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        Ok(self.automations.lock().unwrap().remove(&id).is_some())
    }

    async fn set_enabled(
        &self,
        id: Uuid,
        enabled: bool,
    ) -> Result<Option<Automation>, sqlx::Error> {
        let mut automations = self.automations.lock().unwrap();
        let Some(automation) = automations.get_mut(&id) else {
            return Ok(None);
        };
        automation.enabled = enabled;
        automation.updated_at = OffsetDateTime::now_utc();
        Ok(Some(automation.clone()))
    }

    async fn list_webhook_automations(&self) -> Result<Vec<Automation>, sqlx::Error> {
        let automations = self.automations.lock().unwrap();
        Ok(automations
            .values()
            .filter(|a| a.trigger_type == "webhook_received")
            .cloned()
            .collect())
    }

    async fn create_run(&self, input: NewAutomationRun) -> Result<AutomationRun, sqlx::Error> {
        let now = OffsetDateTime::now_utc();
        let run = AutomationRun {
            id: Uuid::new_v4(),
            automation_id: input.automation_id,
            table_id: input.table_id,
            trigger_snapshot: input.trigger_snapshot,
            actions_snapshot: input.actions_snapshot,
            status: status::PENDING.to_string(),
            error: None,
            wake_at: None,
            resume_cursor: None,
            started_at: None,
            finished_at: None,
            created_at: now,
            updated_at: now,
        };
        self.runs.lock().unwrap().insert(run.id, run.clone());
        Ok(run)
    }

    async fn claim_next_due_run(&self) -> Result<Option<AutomationRun>, sqlx::Error> {
        let now = OffsetDateTime::now_utc();
        let mut runs = self.runs.lock().unwrap();
        let due_id = runs
            .values()
            .filter(|r| {
                r.status == status::PENDING && r.wake_at.map(|w| w <= now).unwrap_or(true)
            })
            .min_by_key(|r| r.created_at)
            .map(|r| r.id);
        let Some(id) = due_id else {
            return Ok(None);
        };
        let run = runs.get_mut(&id).ok_or(sqlx::Error::RowNotFound)?;
        run.status = status::RUNNING.to_string();
        run.started_at.get_or_insert(now);
        run.wake_at = None;
        run.updated_at = now;
        Ok(Some(run.clone()))
    }

    async fn suspend_run(
        &self,
        run_id: Uuid,
        wake_at: OffsetDateTime,
        resume_cursor: Value,
    ) -> Result<(), sqlx::Error> {
        let mut runs = self.runs.lock().unwrap();
        let run = runs.get_mut(&run_id).ok_or(sqlx::Error::RowNotFound)?;
        run.status = status::PENDING.to_string();
        run.wake_at = Some(wake_at);
        run.resume_cursor = Some(resume_cursor);
        run.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn complete_run(
        &self,
        run_id: Uuid,
        run_status: &str,
        error: Option<String>,
    ) -> Result<(), sqlx::Error> {
        let mut runs = self.runs.lock().unwrap();
        let run = runs.get_mut(&run_id).ok_or(sqlx::Error::RowNotFound)?;
        let now = OffsetDateTime::now_utc();
        run.status = run_status.to_string();
        run.error = error;
        run.resume_cursor = None;
        run.wake_at = None;
        run.finished_at = Some(now);
        run.updated_at = now;
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<AutomationRun>, sqlx::Error> {
        Ok(self.runs.lock().unwrap().get(&run_id).cloned())
    }

    async fn list_runs(
        &self,
        automation_id: Uuid,
        limit: i64,
    ) -> Result<Vec<AutomationRun>, sqlx::Error> {
        let runs = self.runs.lock().unwrap();
        let mut results: Vec<AutomationRun> = runs
            .values()
            .filter(|r| r.automation_id == automation_id)
            .cloned()
            .collect();
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        results.truncate(limit.max(0) as usize);
        Ok(results)
    }

    async fn append_action_record(
        &self,
        record: NewActionExecution,
    ) -> Result<ActionExecution, sqlx::Error> {
        let row = ActionExecution {
            id: Uuid::new_v4(),
            run_id: record.run_id,
            action_id: record.action_id,
            action_type: record.action_type,
            status: record.status,
            error: record.error,
            error_code: record.error_code,
            resolved_input: record.resolved_input,
            output: record.output,
            started_at: record.started_at,
            finished_at: record.finished_at,
            created_at: OffsetDateTime::now_utc(),
        };
        self.action_records.lock().unwrap().push(row.clone());
        Ok(row)
    }

    async fn list_action_records(
        &self,
        run_id: Uuid,
    ) -> Result<Vec<ActionExecution>, sqlx::Error> {
        let records = self.action_records.lock().unwrap();
        Ok(records
            .iter()
            .filter(|r| r.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn upsert_schedule(
        &self,
        automation_id: Uuid,
        config: Value,
        next_run_at: Option<OffsetDateTime>,
    ) -> Result<(), sqlx::Error> {
        let mut schedules = self.schedules.lock().unwrap();
        let now = OffsetDateTime::now_utc();
        if let Some(existing) = schedules
            .values_mut()
            .find(|s| s.automation_id == automation_id)
        {
            existing.config = config;
            existing.enabled = true;
            existing.next_run_at = next_run_at;
            existing.updated_at = now;
            return Ok(());
        }
        let schedule = AutomationSchedule {
            id: Uuid::new_v4(),
            automation_id,
            config,
            enabled: true,
            next_run_at,
            last_run_at: None,
            created_at: now,
            updated_at: now,
        };
        schedules.insert(schedule.id, schedule);
        Ok(())
    }

    async fn disable_schedule(&self, automation_id: Uuid) -> Result<(), sqlx::Error> {
        let mut schedules = self.schedules.lock().unwrap();
        for schedule in schedules.values_mut() {
            if schedule.automation_id == automation_id {
                schedule.enabled = false;
                schedule.updated_at = OffsetDateTime::now_utc();
            }
        }
        Ok(())
    }

    async fn list_due_schedules(
        &self,
        limit: i64,
    ) -> Result<Vec<AutomationSchedule>, sqlx::Error> {
        let now = OffsetDateTime::now_utc();
        let schedules = self.schedules.lock().unwrap();
        let mut due: Vec<AutomationSchedule> = schedules
            .values()
            .filter(|s| s.enabled && s.next_run_at.map(|t| t <= now).unwrap_or(false))
            .cloned()
            .collect();
        due.sort_by_key(|s| s.next_run_at);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn mark_schedule_run(
        &self,
        schedule_id: Uuid,
        last_run_at: OffsetDateTime,
        next_run_at: Option<OffsetDateTime>,
    ) -> Result<(), sqlx::Error> {
        let mut schedules = self.schedules.lock().unwrap();
        let schedule = schedules
            .get_mut(&schedule_id)
            .ok_or(sqlx::Error::RowNotFound)?;
        schedule.last_run_at = Some(last_run_at);
        schedule.next_run_at = next_run_at;
        schedule.enabled = next_run_at.is_some();
        schedule.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }
}
