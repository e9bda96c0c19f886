//! 配置管理
//!
//! 默认值 -> TOML 配置文件 -> `AUTOMATION_` 前缀的环境变量，逐层覆盖。

pub mod models;

pub use models::{AppConfig, DatabaseConfig, EngineConfig, LoggingConfig};
