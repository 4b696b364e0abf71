pub mod action;
pub mod action_execution;
pub mod automation;
pub mod automation_schedule;
pub mod run;
pub mod trigger_event;
