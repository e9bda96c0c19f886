pub mod clock;
pub mod config;
pub mod errors;
pub mod executor_registry;
pub mod models;
pub mod traits;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{AppConfig, DatabaseConfig, EngineConfig, LoggingConfig};
pub use errors::*;
pub use executor_registry::{TaskRegistry, TaskRegistryBuilder};
pub use traits::{Task, TaskResolver};
