pub mod manager;
pub mod mapping;
pub mod sqlite;

pub use manager::DatabaseManager;
pub use mapping::{MappingHelpers, RepositoryErrorHelpers};
pub use sqlite::{
    SqliteCompletedStepRepository, SqliteDueStepQuery, SqliteScheduledTaskLogRepository,
    SqliteScheduledTaskRepository, SqliteWorkflowStepRepository,
};
