use async_trait::async_trait;

use crate::{
    models::{ScheduledTask, StepOutcome, SweepReport, WorkflowObject, WorkflowSweepReport},
    AutomationResult,
};

/// 定时任务处理服务接口
#[async_trait]
pub trait ScheduledTaskService: Send + Sync {
    /// 处理单个定时任务
    ///
    /// 任务正在运行或尚未到期时原样返回；任务执行错误记录为 FAILED，不作为错误返回。
    async fn process_scheduled_task(&self, task: ScheduledTask) -> AutomationResult<ScheduledTask>;

    /// 处理所有到期任务，单个任务的错误不会中断扫描
    async fn sweep_due_scheduled_tasks(&self) -> AutomationResult<SweepReport>;
}

/// 超时任务回收服务接口
#[async_trait]
pub trait StalledTaskService: Send + Sync {
    async fn sweep_stalled_tasks(&self) -> AutomationResult<SweepReport>;
}

/// 对象工作流服务接口
#[async_trait]
pub trait WorkflowStepService: Send + Sync {
    /// 执行一个步骤，同一 (对象, 步骤, 触发值) 只会成功完成一次
    async fn process_workflow_step(
        &self,
        object_class: &str,
        object_pk: &str,
        step_key: &str,
        trigger_value: Option<&str>,
    ) -> AutomationResult<StepOutcome>;

    /// 对象保存后检查属性变更触发；`new_object` 为 `None` 表示对象已删除
    async fn process_property_change_workflow_steps(
        &self,
        object_class: &str,
        object_pk: &str,
        previous_object: Option<&(dyn WorkflowObject + Sync)>,
        new_object: Option<&(dyn WorkflowObject + Sync)>,
    ) -> AutomationResult<Vec<StepOutcome>>;

    /// 批量检查某个对象类型的日期偏移触发
    async fn process_due_workflow_steps_for_object_class(
        &self,
        object_class: &str,
    ) -> AutomationResult<WorkflowSweepReport>;

    async fn sweep_due_workflow_steps(
        &self,
        object_classes: &[String],
    ) -> AutomationResult<WorkflowSweepReport>;
}
