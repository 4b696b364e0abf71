pub mod automations;
pub mod events;
pub mod runs;
pub mod webhooks;
