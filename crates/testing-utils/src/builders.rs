//! 测试数据构建器
//!
//! 提供合理默认值，测试只需要覆盖关心的字段。

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use automation_core::models::{
    ObjectWorkflowStep, ScheduledTask, ScheduledTaskStatus, StepTrigger, TaskConfiguration,
    TimePeriod,
};

/// 测试使用的固定基准时间：2024-03-10 08:00:00 UTC（星期日）
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap()
}

pub struct ScheduledTaskBuilder {
    task: ScheduledTask,
}

impl ScheduledTaskBuilder {
    pub fn new() -> Self {
        let mut task = ScheduledTask::new("test_task", "noop");
        task.created_at = base_time();
        task.updated_at = base_time();
        task.timeout_seconds = 300;
        Self { task }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.task.id = id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.task.name = name.to_string();
        self
    }

    pub fn with_task_identifier(mut self, identifier: &str) -> Self {
        self.task.task_identifier = identifier.to_string();
        self
    }

    /// 传入 JSON 对象；非对象值被忽略
    pub fn with_configuration(mut self, configuration: Value) -> Self {
        if let Value::Object(map) = configuration {
            self.task.configuration = map;
        }
        self
    }

    pub fn with_rule(mut self, rule: TimePeriod) -> Self {
        self.task.recurrence_rules.push(rule);
        self
    }

    pub fn with_status(mut self, status: ScheduledTaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn with_next_start_time(mut self, next: DateTime<Utc>) -> Self {
        self.task.next_start_time = Some(next);
        self
    }

    pub fn without_next_start_time(mut self) -> Self {
        self.task.next_start_time = None;
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: i64) -> Self {
        self.task.timeout_seconds = seconds;
        self
    }

    /// 模拟已被认领：RUNNING，并设置开始时间与超时时间
    pub fn running_since(mut self, started_at: DateTime<Utc>) -> Self {
        self.task.status = ScheduledTaskStatus::Running;
        self.task.last_start_time = Some(started_at);
        self.task.timeout_time = self.task.timeout_after(started_at).ok();
        self
    }

    pub fn build(self) -> ScheduledTask {
        self.task
    }
}

impl Default for ScheduledTaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct WorkflowStepBuilder {
    step: ObjectWorkflowStep,
}

impl WorkflowStepBuilder {
    pub fn new(object_class: &str, step_key: &str) -> Self {
        Self {
            step: ObjectWorkflowStep::new(object_class, step_key, StepTrigger::Manual, "noop"),
        }
    }

    pub fn manual(mut self) -> Self {
        self.step.step_trigger = StepTrigger::Manual;
        self.step.step_trigger_data = None;
        self
    }

    /// 日期偏移触发：`<field>:<offset_days>`
    pub fn date_offset(mut self, field: &str, offset_days: i64) -> Self {
        self.step.step_trigger = StepTrigger::DateOffsetDays;
        self.step.step_trigger_data = Some(format!("{field}:{offset_days}"));
        self
    }

    pub fn property_change(mut self, field: &str) -> Self {
        self.step.step_trigger = StepTrigger::PropertyChange;
        self.step.step_trigger_data = Some(field.to_string());
        self
    }

    pub fn with_trigger_data(mut self, data: &str) -> Self {
        self.step.step_trigger_data = Some(data.to_string());
        self
    }

    pub fn with_task(mut self, identifier: &str) -> Self {
        self.step.task_identifier = identifier.to_string();
        self
    }

    pub fn with_configuration(mut self, configuration: TaskConfiguration) -> Self {
        self.step.task_configuration = configuration;
        self
    }

    pub fn build(self) -> ObjectWorkflowStep {
        self.step
    }
}
