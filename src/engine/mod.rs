pub mod actions;
pub mod condition;
pub mod executor;
pub mod matcher;
pub mod templating;

pub use executor::execute_run;
