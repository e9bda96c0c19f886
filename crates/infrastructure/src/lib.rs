//! 自动化引擎的基础设施：SQLite 仓储实现、结构化日志与指标

pub mod database;
pub mod observability;

pub use database::*;
pub use observability::*;
