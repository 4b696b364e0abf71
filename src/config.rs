use std::env;

pub struct Config {
    /// When unset the server runs against the in-memory repository.
    pub database_url: Option<String>,
    pub worker_count: usize,
    pub worker_poll_ms: u64,
    pub webhook_secret: String,
    /// CORS allow-origin; permissive when unset.
    pub frontend_origin: Option<String>,
    pub outbound_timeout_ms: u64,
    pub script_timeout_ms: u64,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok(); // Load .env file

        let database_url = env::var("DATABASE_URL").ok();

        let worker_count = env::var("WORKER_COUNT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(4);

        let worker_poll_ms = env::var("WORKER_POLL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(750);

        let webhook_secret =
            env::var("WEBHOOK_SECRET").unwrap_or_else(|_| "dev-webhook-secret".to_string());

        let frontend_origin = env::var("FRONTEND_ORIGIN").ok();

        let outbound_timeout_ms = env::var("OUTBOUND_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10_000);

        let script_timeout_ms = env::var("SCRIPT_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5_000);

        Config {
            database_url,
            worker_count,
            worker_poll_ms,
            webhook_secret,
            frontend_origin,
            outbound_timeout_ms,
            script_timeout_ms,
        }
    }
}
