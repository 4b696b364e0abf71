pub mod schedule;
pub mod webhook_token;
