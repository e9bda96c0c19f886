//! 自动化引擎的调度与工作流处理
//!
//! - `recurrence` - 时间规则到下一次执行时间的计算
//! - `scheduler` - 定时任务的认领、执行与记录
//! - `recovery_service` - 超时任务回收
//! - `workflow` - 对象工作流的三种触发方式

pub mod recovery_service;
pub mod recurrence;
pub mod scheduler;
pub mod workflow;

pub use recovery_service::StalledTaskRecovery;
pub use recurrence::compute_next_start_time;
pub use scheduler::{ProcessOutcome, ScheduledTaskProcessor, SkipReason};
pub use workflow::ObjectWorkflowService;
