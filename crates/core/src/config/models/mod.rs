pub mod app_config;
pub mod database;
pub mod engine;
pub mod logging;

pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use engine::EngineConfig;
pub use logging::LoggingConfig;
