pub mod repository;
pub mod scheduler;
pub mod task_executor;

pub use repository::*;
pub use scheduler::*;
pub use task_executor::*;
