mod config;
mod db;
mod engine;
mod models;
mod responses;
mod routes;
mod services;
mod state;
#[cfg(test)]
mod test_support;
pub mod utils;
mod worker;

use axum::{
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use config::Config;
use db::mock_db::MemoryAutomationRepository;
use db::postgres_automation_repository::PostgresAutomationRepository;
use reqwest::Client;
use responses::JsonResponse;
use routes::automations::{
    add_action, create_automation, delete_action, delete_automation, get_automation,
    get_webhook_url, list_automations, pause_automation, reorder_actions, resume_automation,
    trigger_automation, update_action, update_automation,
};
use routes::events::ingest_record_event;
use routes::runs::{get_run, list_runs_for_automation};
use routes::webhooks::receive_webhook;
use sqlx::PgPool;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::db::automation_repository::AutomationRepository;
use crate::services::mailer::{Mailer, MockMailer, SmtpMailer};
use crate::services::record_store::MemoryRecordStore;
use crate::services::script_runner::NoopScriptRunner;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).unwrap();

    let config = Arc::new(Config::from_env());

    let automation_repo: Arc<dyn AutomationRepository> = match &config.database_url {
        Some(url) => {
            let pool = establish_connection(url).await;
            Arc::new(PostgresAutomationRepository { pool })
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory repository (runs will not survive restarts)");
            Arc::new(MemoryAutomationRepository::new())
        }
    };

    let mailer: Arc<dyn Mailer> = match SmtpMailer::new() {
        Ok(mailer) => Arc::new(mailer),
        Err(e) => {
            warn!(error = %e, "SMTP not configured; send_email actions will be recorded but not delivered");
            Arc::new(MockMailer::default())
        }
    };

    let state = AppState {
        automation_repo,
        record_store: Arc::new(MemoryRecordStore::new()),
        mailer,
        script_runner: Arc::new(NoopScriptRunner),
        http_client: Arc::new(Client::new()),
        config,
        worker_id: Arc::new(uuid::Uuid::new_v4().to_string()),
    };
    let state_for_worker = state.clone();

    let automation_routes = Router::new()
        .route("/", post(create_automation).get(list_automations))
        .route(
            "/{automation_id}",
            get(get_automation)
                .put(update_automation)
                .delete(delete_automation),
        )
        .route("/{automation_id}/pause", post(pause_automation))
        .route("/{automation_id}/resume", post(resume_automation))
        .route("/{automation_id}/actions", post(add_action))
        .route("/{automation_id}/actions/reorder", post(reorder_actions))
        .route(
            "/{automation_id}/actions/{action_id}",
            axum::routing::put(update_action).delete(delete_action),
        )
        .route("/{automation_id}/trigger", post(trigger_automation))
        .route("/{automation_id}/webhook-url", get(get_webhook_url))
        .route("/{automation_id}/runs", get(list_runs_for_automation));

    let cors = match state.config.frontend_origin.as_deref() {
        Some(origin) => CorsLayer::new()
            .allow_origin(
                origin
                    .parse::<axum::http::HeaderValue>()
                    .expect("FRONTEND_ORIGIN is not a valid origin"),
            )
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::permissive(),
    };

    let app = Router::new()
        .route("/", get(root))
        .nest("/api/automations", automation_routes)
        .route("/api/events", post(ingest_record_event))
        .route("/api/runs/{run_id}", get(get_run))
        .route("/api/hooks/{token}", post(receive_webhook))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    worker::start_background_workers(state_for_worker).await;

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    let listener = TcpListener::bind(addr).await.unwrap();
    info!("listening on http://{}", addr);
    axum::serve(listener, app.into_make_service()).await.unwrap();
}

async fn root() -> Response {
    JsonResponse::success("Hello, Gridflow!").into_response()
}

/// Establish a connection to the database and verify it.
async fn establish_connection(database_url: &str) -> PgPool {
    let pool = PgPool::connect(database_url)
        .await
        .expect("Failed to connect to the database");

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .expect("Failed to verify database connection");

    info!("successfully connected to the database");
    pool
}
