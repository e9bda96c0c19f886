pub mod sqlite_due_step_query;
pub mod sqlite_scheduled_task_repository;
pub mod sqlite_task_log_repository;
pub mod sqlite_workflow_repository;

pub use sqlite_due_step_query::SqliteDueStepQuery;
pub use sqlite_scheduled_task_repository::SqliteScheduledTaskRepository;
pub use sqlite_task_log_repository::SqliteScheduledTaskLogRepository;
pub use sqlite_workflow_repository::{SqliteCompletedStepRepository, SqliteWorkflowStepRepository};
