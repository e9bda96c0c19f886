//! 对象工作流模型
//!
//! 工作流步骤挂在“对象类型”上而不是具体实例上，按 (object_class, step_key) 唯一。
//! 完成记录以 (object_class, object_pk, step_key, trigger_value) 为复合键，
//! 是步骤执行幂等性的唯一依据。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::TaskConfiguration;
use crate::{AutomationError, AutomationResult};

/// 手动触发时使用的默认触发值
pub const DEFAULT_TRIGGER_VALUE: &str = "N/A";

/// 步骤触发方式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepTrigger {
    Manual,
    DateOffsetDays,
    PropertyChange,
}

impl StepTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepTrigger::Manual => "MANUAL",
            StepTrigger::DateOffsetDays => "DATE_OFFSET_DAYS",
            StepTrigger::PropertyChange => "PROPERTY_CHANGE",
        }
    }
}

impl fmt::Display for StepTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepTrigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MANUAL" => Ok(StepTrigger::Manual),
            "DATE_OFFSET_DAYS" => Ok(StepTrigger::DateOffsetDays),
            "PROPERTY_CHANGE" => Ok(StepTrigger::PropertyChange),
            _ => Err(format!("Invalid step trigger: {s}")),
        }
    }
}

impl_sqlite_text_enum!(StepTrigger);

/// 完成记录状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletedStepStatus {
    Completed,
    Failed,
}

impl CompletedStepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletedStepStatus::Completed => "COMPLETED",
            CompletedStepStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for CompletedStepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompletedStepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COMPLETED" => Ok(CompletedStepStatus::Completed),
            "FAILED" => Ok(CompletedStepStatus::Failed),
            _ => Err(format!("Invalid completed step status: {s}")),
        }
    }
}

impl_sqlite_text_enum!(CompletedStepStatus);

/// 工作流步骤定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectWorkflowStep {
    pub id: i64,
    pub object_class: String,
    pub step_key: String,
    pub step_trigger: StepTrigger,
    /// DATE_OFFSET_DAYS: `"<field>:<offset_days>"`；PROPERTY_CHANGE: 被监听的字段名
    pub step_trigger_data: Option<String>,
    pub task_identifier: String,
    pub task_configuration: TaskConfiguration,
}

/// 解析后的日期偏移触发条件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateOffsetTrigger {
    pub field: String,
    pub offset_days: i64,
    pub offset: Duration,
}

impl ObjectWorkflowStep {
    pub fn new(
        object_class: impl Into<String>,
        step_key: impl Into<String>,
        step_trigger: StepTrigger,
        task_identifier: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            object_class: object_class.into(),
            step_key: step_key.into(),
            step_trigger,
            step_trigger_data: None,
            task_identifier: task_identifier.into(),
            task_configuration: TaskConfiguration::new(),
        }
    }

    pub fn with_trigger_data(mut self, data: impl Into<String>) -> Self {
        self.step_trigger_data = Some(data.into());
        self
    }

    /// 解析 `"<field>:<offset_days>"`
    pub fn date_offset(&self) -> AutomationResult<DateOffsetTrigger> {
        let data = self.trigger_data()?;
        let (field, offset) = data.rsplit_once(':').ok_or_else(|| {
            AutomationError::invalid_trigger(
                self.step_key.as_str(),
                "日期偏移触发数据格式应为 <字段>:<天数>",
            )
        })?;
        let field = field.trim();
        if field.is_empty() {
            return Err(AutomationError::invalid_trigger(
                self.step_key.as_str(),
                "日期偏移触发缺少字段名",
            ));
        }
        let offset_days = offset.trim().parse::<i64>().map_err(|e| {
            AutomationError::InvalidTriggerData {
                step_key: self.step_key.clone(),
                message: format!("偏移天数无效 '{offset}': {e}"),
            }
        })?;
        let offset = Duration::try_days(offset_days).ok_or_else(|| {
            AutomationError::InvalidTriggerData {
                step_key: self.step_key.clone(),
                message: format!("偏移天数超出范围: {offset_days}"),
            }
        })?;
        Ok(DateOffsetTrigger {
            field: field.to_string(),
            offset_days,
            offset,
        })
    }

    /// 属性变更触发监听的字段名
    pub fn watched_field(&self) -> AutomationResult<&str> {
        let field = self.trigger_data()?.trim();
        if field.is_empty() {
            return Err(AutomationError::invalid_trigger(
                self.step_key.as_str(),
                "属性变更触发缺少字段名",
            ));
        }
        Ok(field)
    }

    fn trigger_data(&self) -> AutomationResult<&str> {
        self.step_trigger_data.as_deref().ok_or_else(|| {
            AutomationError::invalid_trigger(self.step_key.as_str(), "缺少触发数据")
        })
    }
}

/// 完成记录的复合键
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompletedStepKey {
    pub object_class: String,
    pub object_pk: String,
    pub step_key: String,
    pub trigger_value: String,
}

impl CompletedStepKey {
    pub fn new(
        object_class: impl Into<String>,
        object_pk: impl Into<String>,
        step_key: impl Into<String>,
        trigger_value: impl Into<String>,
    ) -> Self {
        Self {
            object_class: object_class.into(),
            object_pk: object_pk.into(),
            step_key: step_key.into(),
            trigger_value: trigger_value.into(),
        }
    }
}

impl fmt::Display for CompletedStepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{}/{}@{}",
            self.object_class, self.object_pk, self.step_key, self.trigger_value
        )
    }
}

/// 步骤完成记录（幂等账本中的一行）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectWorkflowCompletedStep {
    pub key: CompletedStepKey,
    pub status: CompletedStepStatus,
    pub completed_time: DateTime<Utc>,
    pub log_output: Option<String>,
}

impl ObjectWorkflowCompletedStep {
    pub fn is_completed(&self) -> bool {
        self.status == CompletedStepStatus::Completed
    }
}

/// 写入完成记录的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerWrite {
    /// 新插入一行
    Inserted,
    /// 覆盖了之前的 FAILED 记录
    Replaced,
    /// 已存在 COMPLETED 记录，本次写入被忽略
    DuplicateIgnored,
}

/// 批量日期偏移查询返回的一行：每个对象实例一行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueStepCandidate {
    pub object_pk: String,
    /// 被监听字段的当前值（原样文本）
    pub watched_value: Option<String>,
    /// 该 (对象, 字段值) 下偏移最大的已完成步骤
    pub last_completed_step_key: Option<String>,
}
