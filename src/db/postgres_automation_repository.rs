use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::automation_repository::AutomationRepository;
use crate::models::action_execution::{ActionExecution, NewActionExecution};
use crate::models::automation::{Automation, CreateAutomation, UpdateAutomation};
use crate::models::automation_schedule::AutomationSchedule;
use crate::models::run::{status, AutomationRun, NewAutomationRun};

const AUTOMATION_COLUMNS: &str = "id, table_id, name, description, enabled, trigger_type, \
     trigger_config, actions, webhook_salt, created_at, updated_at";

const RUN_COLUMNS: &str = "id, automation_id, table_id, trigger_snapshot, actions_snapshot, \
     status, error, wake_at, resume_cursor, started_at, finished_at, created_at, updated_at";

pub struct PostgresAutomationRepository {
    pub pool: PgPool,
}

#[async_trait]
impl AutomationRepository for PostgresAutomationRepository {
    async fn create_automation(&self, input: CreateAutomation) -> Result<Automation, sqlx::Error> {
        let result = sqlx::query_as::<_, Automation>(&format!(
            r#"
            INSERT INTO automations
                (table_id, name, description, enabled, trigger_type, trigger_config, actions,
                 webhook_salt, created_at, updated_at)
            VALUES ($1, $2, $3, true, $4, $5, $6, gen_random_uuid(), now(), now())
            RETURNING {AUTOMATION_COLUMNS}
            "#
        ))
        .bind(input.table_id)
        .bind(&input.name)
        .bind(input.description.as_deref())
        .bind(&input.trigger_type)
        .bind(&input.trigger_config)
        .bind(&input.actions)
        .fetch_one(&self.pool)
        .await?;

        Ok(result)
    }

    async fn list_automations(
        &self,
        table_id: Option<Uuid>,
    ) -> Result<Vec<Automation>, sqlx::Error> {
        let results = sqlx::query_as::<_, Automation>(&format!(
            r#"
            SELECT {AUTOMATION_COLUMNS}
            FROM automations
            WHERE ($1::uuid IS NULL OR table_id = $1)
            ORDER BY updated_at DESC
            "#
        ))
        .bind(table_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(results)
    }

    async fn list_enabled_for_table(
        &self,
        table_id: Uuid,
    ) -> Result<Vec<Automation>, sqlx::Error> {
        let results = sqlx::query_as::<_, Automation>(&format!(
            r#"
            SELECT {AUTOMATION_COLUMNS}
            FROM automations
            WHERE table_id = $1 AND enabled = true
            ORDER BY created_at ASC
            "#
        ))
        .bind(table_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(results)
    }

    async fn find_automation(&self, id: Uuid) -> Result<Option<Automation>, sqlx::Error> {
        let result = sqlx::query_as::<_, Automation>(&format!(
            r#"
            SELECT {AUTOMATION_COLUMNS}
            FROM automations
            WHERE id = $1
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn update_automation(
        &self,
        id: Uuid,
        input: UpdateAutomation,
    ) -> Result<Option<Automation>, sqlx::Error> {
        let result = sqlx::query_as::<_, Automation>(&format!(
            r#"
            UPDATE automations
            SET name = COALESCE($2, name),
                description = COALESCE($3, description),
                trigger_type = COALESCE($4, trigger_type),
                trigger_config = COALESCE($5, trigger_config),
                updated_at = now()
            WHERE id = $1
            RETURNING {AUTOMATION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(input.name.as_deref())
        .bind(input.description.as_deref())
        .bind(input.trigger_type.as_deref())
        .bind(input.trigger_config.as_ref())
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn update_actions(
        &self,
        id: Uuid,
        actions: Value,
    ) -> Result<Option<Automation>, sqlx::Error> {
        let result = sqlx::query_as::<_, Automation>(&format!(
            r#"
            UPDATE automations
            SET actions = $2, updated_at = now()
            WHERE id = $1
            RETURNING {AUTOMATION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(actions)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn delete_automation(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM automations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_enabled(
        &self,
        id: Uuid,
        enabled: bool,
    ) -> Result<Option<Automation>, sqlx::Error> {
        let result = sqlx::query_as::<_, Automation>(&format!(
            r#"
            UPDATE automations
            SET enabled = $2, updated_at = now()
            WHERE id = $1
            RETURNING {AUTOMATION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(enabled)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn list_webhook_automations(&self) -> Result<Vec<Automation>, sqlx::Error> {
        let results = sqlx::query_as::<_, Automation>(&format!(
            r#"
            SELECT {AUTOMATION_COLUMNS}
            FROM automations
            WHERE trigger_type = 'webhook_received'
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(results)
    }

    async fn create_run(&self, input: NewAutomationRun) -> Result<AutomationRun, sqlx::Error> {
        let result = sqlx::query_as::<_, AutomationRun>(&format!(
            r#"
            INSERT INTO automation_runs
                (automation_id, table_id, trigger_snapshot, actions_snapshot, status,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, now(), now())
            RETURNING {RUN_COLUMNS}
            "#
        ))
        .bind(input.automation_id)
        .bind(input.table_id)
        .bind(&input.trigger_snapshot)
        .bind(&input.actions_snapshot)
        .bind(status::PENDING)
        .fetch_one(&self.pool)
        .await?;

        Ok(result)
    }

    async fn claim_next_due_run(&self) -> Result<Option<AutomationRun>, sqlx::Error> {
        let result = sqlx::query_as::<_, AutomationRun>(&format!(
            r#"
            UPDATE automation_runs
            SET status = $1,
                started_at = COALESCE(started_at, now()),
                wake_at = NULL,
                updated_at = now()
            WHERE id = (
                SELECT id FROM automation_runs
                WHERE status = $2
                  AND (wake_at IS NULL OR wake_at <= now())
                ORDER BY created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING {RUN_COLUMNS}
            "#
        ))
        .bind(status::RUNNING)
        .bind(status::PENDING)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn suspend_run(
        &self,
        run_id: Uuid,
        wake_at: OffsetDateTime,
        resume_cursor: Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE automation_runs
            SET status = $2, wake_at = $3, resume_cursor = $4, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(status::PENDING)
        .bind(wake_at)
        .bind(resume_cursor)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn complete_run(
        &self,
        run_id: Uuid,
        run_status: &str,
        error: Option<String>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE automation_runs
            SET status = $2,
                error = $3,
                resume_cursor = NULL,
                wake_at = NULL,
                finished_at = now(),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(run_status)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<AutomationRun>, sqlx::Error> {
        let result = sqlx::query_as::<_, AutomationRun>(&format!(
            r#"
            SELECT {RUN_COLUMNS}
            FROM automation_runs
            WHERE id = $1
            "#
        ))
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn list_runs(
        &self,
        automation_id: Uuid,
        limit: i64,
    ) -> Result<Vec<AutomationRun>, sqlx::Error> {
        let results = sqlx::query_as::<_, AutomationRun>(&format!(
            r#"
            SELECT {RUN_COLUMNS}
            FROM automation_runs
            WHERE automation_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#
        ))
        .bind(automation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(results)
    }

    async fn append_action_record(
        &self,
        record: NewActionExecution,
    ) -> Result<ActionExecution, sqlx::Error> {
        let result = sqlx::query_as::<_, ActionExecution>(
            r#"
            INSERT INTO action_executions
                (run_id, action_id, action_type, status, error, error_code, resolved_input,
                 output, started_at, finished_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, now())
            RETURNING id, run_id, action_id, action_type, status, error, error_code,
                      resolved_input, output, started_at, finished_at, created_at
            "#,
        )
        .bind(record.run_id)
        .bind(record.action_id)
        .bind(&record.action_type)
        .bind(&record.status)
        .bind(record.error.as_deref())
        .bind(record.error_code.as_deref())
        .bind(&record.resolved_input)
        .bind(&record.output)
        .bind(record.started_at)
        .bind(record.finished_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(result)
    }

    async fn list_action_records(
        &self,
        run_id: Uuid,
    ) -> Result<Vec<ActionExecution>, sqlx::Error> {
        let results = sqlx::query_as::<_, ActionExecution>(
            r#"
            SELECT id, run_id, action_id, action_type, status, error, error_code,
                   resolved_input, output, started_at, finished_at, created_at
            FROM action_executions
            WHERE run_id = $1
            ORDER BY started_at ASC, created_at ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(results)
    }

    async fn upsert_schedule(
        &self,
        automation_id: Uuid,
        config: Value,
        next_run_at: Option<OffsetDateTime>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO automation_schedules
                (automation_id, config, enabled, next_run_at, created_at, updated_at)
            VALUES ($1, $2, true, $3, now(), now())
            ON CONFLICT (automation_id)
            DO UPDATE SET config = EXCLUDED.config,
                          enabled = true,
                          next_run_at = EXCLUDED.next_run_at,
                          updated_at = now()
            "#,
        )
        .bind(automation_id)
        .bind(config)
        .bind(next_run_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn disable_schedule(&self, automation_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE automation_schedules
            SET enabled = false, updated_at = now()
            WHERE automation_id = $1
            "#,
        )
        .bind(automation_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_due_schedules(
        &self,
        limit: i64,
    ) -> Result<Vec<AutomationSchedule>, sqlx::Error> {
        let results = sqlx::query_as::<_, AutomationSchedule>(
            r#"
            SELECT id, automation_id, config, enabled, next_run_at, last_run_at,
                   created_at, updated_at
            FROM automation_schedules
            WHERE enabled = true
              AND next_run_at IS NOT NULL
              AND next_run_at <= now()
            ORDER BY next_run_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(results)
    }

    async fn mark_schedule_run(
        &self,
        schedule_id: Uuid,
        last_run_at: OffsetDateTime,
        next_run_at: Option<OffsetDateTime>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE automation_schedules
            SET last_run_at = $2,
                next_run_at = $3,
                enabled = ($3 IS NOT NULL),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(schedule_id)
        .bind(last_run_at)
        .bind(next_run_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
