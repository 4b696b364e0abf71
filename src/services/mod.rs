pub mod mailer;
pub mod record_store;
pub mod script_runner;
