//! Shared fixtures for unit tests.

use std::sync::Arc;

use serde_json::{json, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::Config;
use crate::db::mock_db::MemoryAutomationRepository;
use crate::models::automation::Automation;
use crate::models::trigger_event::{TriggerEvent, TriggerEventType};
use crate::services::mailer::MockMailer;
use crate::services::record_store::MemoryRecordStore;
use crate::services::script_runner::NoopScriptRunner;
use crate::state::AppState;

pub fn test_state() -> AppState {
    AppState {
        automation_repo: Arc::new(MemoryAutomationRepository::new()),
        record_store: Arc::new(MemoryRecordStore::new()),
        mailer: Arc::new(MockMailer::default()),
        script_runner: Arc::new(NoopScriptRunner),
        http_client: Arc::new(reqwest::Client::new()),
        config: Arc::new(Config {
            database_url: None,
            worker_count: 1,
            worker_poll_ms: 10,
            webhook_secret: "test-secret".to_string(),
            frontend_origin: None,
            outbound_timeout_ms: 2_000,
            script_timeout_ms: 500,
        }),
        worker_id: Arc::new("test-worker".to_string()),
    }
}

pub fn automation_with_trigger(
    table_id: Uuid,
    trigger_type: &str,
    trigger_config: Value,
) -> Automation {
    let now = OffsetDateTime::now_utc();
    Automation {
        id: Uuid::new_v4(),
        table_id,
        name: format!("test {}", trigger_type),
        description: None,
        enabled: true,
        trigger_type: trigger_type.to_string(),
        trigger_config,
        actions: json!([]),
        webhook_salt: Uuid::new_v4(),
        created_at: now,
        updated_at: now,
    }
}

pub fn event(
    table_id: Uuid,
    event_type: TriggerEventType,
    before: Option<Value>,
    after: Option<Value>,
) -> TriggerEvent {
    TriggerEvent {
        event_type,
        table_id,
        record_id: "rec_1".to_string(),
        before,
        after,
        changed_field_ids: vec![],
        actor: None,
        occurred_at: OffsetDateTime::now_utc(),
    }
}
