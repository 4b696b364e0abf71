pub mod automation_repository;
pub mod mock_db;
pub mod postgres_automation_repository;
