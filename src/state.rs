use crate::config::Config;
use crate::db::automation_repository::AutomationRepository;
use crate::services::mailer::Mailer;
use crate::services::record_store::RecordStore;
use crate::services::script_runner::ScriptRunner;
use reqwest::Client;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub automation_repo: Arc<dyn AutomationRepository>,
    pub record_store: Arc<dyn RecordStore>,
    pub mailer: Arc<dyn Mailer>,
    pub script_runner: Arc<dyn ScriptRunner>,
    pub http_client: Arc<Client>,
    pub config: Arc<Config>,
    pub worker_id: Arc<String>,
}
