//! # Automation Testing Utils
//!
//! 工作区共用的测试工具：仓储的内存实现、可编程的任务替身以及测试数据构建器。
//!
//! ```toml
//! [dev-dependencies]
//! automation-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
