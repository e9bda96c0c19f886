//! 实体存储接口定义
//!
//! 引擎只通过这些接口访问持久化状态，每次操作开始时重新加载、结束时写回，
//! 不在两次扫描之间缓存任务或步骤状态。
//!
//! - `ScheduledTaskRepository` - 定时任务定义与认领
//! - `ScheduledTaskLogRepository` - 定时任务执行记录
//! - `WorkflowStepRepository` - 工作流步骤定义
//! - `CompletedStepRepository` - 步骤完成账本（幂等依据）
//! - `DueStepQuery` - 日期偏移步骤的批量聚合查询
//!
//! 实现必须保证写后读一致：认领写入之后的任何读取都要看到 `RUNNING`。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    CompletedStepKey, DueStepCandidate, LedgerWrite, Lookup, ObjectWorkflowCompletedStep,
    ObjectWorkflowStep, ScheduledTask, ScheduledTaskLog, StepTrigger,
};
use crate::AutomationResult;

/// 定时任务仓储接口
#[async_trait]
pub trait ScheduledTaskRepository: Send + Sync {
    /// 插入新任务并返回带有生成 ID 的任务
    async fn create(&self, task: &ScheduledTask) -> AutomationResult<ScheduledTask>;

    async fn get_by_id(&self, id: i64) -> AutomationResult<Option<ScheduledTask>>;

    /// 覆盖写入任务的全部可变字段
    async fn update(&self, task: &ScheduledTask) -> AutomationResult<()>;

    /// 所有不在运行中且 `next_start_time <= now` 的任务，按下一次执行时间升序
    async fn find_due(&self, now: DateTime<Utc>) -> AutomationResult<Vec<ScheduledTask>>;

    /// 所有仍处于运行中且 `timeout_time <= now` 的任务
    async fn find_stalled(&self, now: DateTime<Utc>) -> AutomationResult<Vec<ScheduledTask>>;

    /// 认领任务：仅当任务当前不是 `RUNNING` 时原子地切换为 `RUNNING`
    ///
    /// 返回 `Found` 表示认领成功（携带写入后的任务），`Stale` 表示已被他人持有。
    async fn try_claim(
        &self,
        id: i64,
        started_at: DateTime<Utc>,
        timeout_time: DateTime<Utc>,
    ) -> AutomationResult<Lookup<ScheduledTask>>;

    /// 将卡死的任务强制置为 `FAILED`
    ///
    /// 仅当任务仍是 `RUNNING` 且超时时间与 `expected_timeout_time` 一致时生效，
    /// 避免覆盖已被重新认领的新一轮执行。
    async fn mark_timed_out(
        &self,
        id: i64,
        expected_timeout_time: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        next_start_time: Option<DateTime<Utc>>,
    ) -> AutomationResult<Lookup<ScheduledTask>>;
}

/// 定时任务执行记录仓储接口
#[async_trait]
pub trait ScheduledTaskLogRepository: Send + Sync {
    async fn create(&self, log: &ScheduledTaskLog) -> AutomationResult<ScheduledTaskLog>;

    /// 最近的执行记录，按开始时间倒序
    async fn find_by_task(&self, task_id: i64, limit: i64)
        -> AutomationResult<Vec<ScheduledTaskLog>>;
}

/// 工作流步骤定义仓储接口
#[async_trait]
pub trait WorkflowStepRepository: Send + Sync {
    async fn create(&self, step: &ObjectWorkflowStep) -> AutomationResult<ObjectWorkflowStep>;

    async fn find(
        &self,
        object_class: &str,
        step_key: &str,
    ) -> AutomationResult<Option<ObjectWorkflowStep>>;

    async fn find_by_trigger(
        &self,
        object_class: &str,
        trigger: StepTrigger,
    ) -> AutomationResult<Vec<ObjectWorkflowStep>>;
}

/// 步骤完成账本接口
#[async_trait]
pub trait CompletedStepRepository: Send + Sync {
    async fn find(
        &self,
        key: &CompletedStepKey,
    ) -> AutomationResult<Option<ObjectWorkflowCompletedStep>>;

    /// 写入一条完成记录
    ///
    /// 已存在 `COMPLETED` 记录时不覆盖并返回 `DuplicateIgnored`；
    /// 已存在 `FAILED` 记录时用新结果覆盖并返回 `Replaced`。
    async fn record(&self, step: &ObjectWorkflowCompletedStep) -> AutomationResult<LedgerWrite>;

    async fn find_for_object(
        &self,
        object_class: &str,
        object_pk: &str,
    ) -> AutomationResult<Vec<ObjectWorkflowCompletedStep>>;
}

/// 日期偏移步骤的批量聚合查询
#[async_trait]
pub trait DueStepQuery: Send + Sync {
    /// 对某个对象类型的某个日期字段做一次聚合查询
    ///
    /// 每个对象实例返回一行：字段当前值，以及在该字段值下已完成的、
    /// 在 `ranked_step_keys` 中排名最靠前（偏移最大）的步骤。
    /// `ranked_step_keys` 已按偏移天数降序排列。
    async fn find_due_step_candidates(
        &self,
        object_class: &str,
        field: &str,
        ranked_step_keys: &[String],
    ) -> AutomationResult<Vec<DueStepCandidate>>;
}
