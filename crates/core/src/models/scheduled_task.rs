use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{TaskConfiguration, TimePeriod};
use crate::{AutomationError, AutomationResult};

/// 单次运行允许的最长超时时间 (30 天)
pub const MAX_TIMEOUT_SECONDS: i64 = 30 * 24 * 3600;

/// 定时任务定义
///
/// 表示一个按时间规则重复执行的工作单元。
///
/// # 字段说明
///
/// - `task_identifier`: 交给任务注册表解析的任务实现标识
/// - `configuration`: 原样传给任务实现的配置
/// - `recurrence_rules`: 时间规则列表，为空表示不会自动重排
/// - `status`: 当前状态，`Running` 是排他的认领标记
/// - `timeout_seconds`: 运行超过该时长视为卡死，由恢复扫描处理
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: i64,
    pub name: String,
    pub task_identifier: String,
    pub configuration: TaskConfiguration,
    pub recurrence_rules: Vec<TimePeriod>,
    pub status: ScheduledTaskStatus,
    pub last_start_time: Option<DateTime<Utc>>,
    pub last_end_time: Option<DateTime<Utc>>,
    pub next_start_time: Option<DateTime<Utc>>,
    pub timeout_time: Option<DateTime<Utc>>,
    pub timeout_seconds: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 定时任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduledTaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ScheduledTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduledTaskStatus::Pending => "PENDING",
            ScheduledTaskStatus::Running => "RUNNING",
            ScheduledTaskStatus::Completed => "COMPLETED",
            ScheduledTaskStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ScheduledTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduledTaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ScheduledTaskStatus::Pending),
            "RUNNING" => Ok(ScheduledTaskStatus::Running),
            "COMPLETED" => Ok(ScheduledTaskStatus::Completed),
            "FAILED" => Ok(ScheduledTaskStatus::Failed),
            _ => Err(format!("Invalid scheduled task status: {s}")),
        }
    }
}

impl_sqlite_text_enum!(ScheduledTaskStatus);

/// 保存定时任务时的选项
///
/// 默认情况下保存会根据时间规则重新计算 `next_start_time`；
/// 测试夹具需要固定的下一次执行时间时设置 `skip_recurrence_recompute`。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOptions {
    pub skip_recurrence_recompute: bool,
}

impl SaveOptions {
    pub fn skip_recompute() -> Self {
        Self {
            skip_recurrence_recompute: true,
        }
    }
}

impl ScheduledTask {
    /// 创建新任务，ID 由存储层生成
    pub fn new(name: impl Into<String>, task_identifier: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: name.into(),
            task_identifier: task_identifier.into(),
            configuration: TaskConfiguration::new(),
            recurrence_rules: Vec::new(),
            status: ScheduledTaskStatus::Pending,
            last_start_time: None,
            last_end_time: None,
            next_start_time: None,
            timeout_time: None,
            timeout_seconds: 3600,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ScheduledTaskStatus::Running
    }

    /// 到期：不在运行中，且下一次执行时间不晚于 `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.is_running() && self.next_start_time.is_some_and(|next| next <= now)
    }

    /// 运行中且已超过超时时间
    pub fn is_stalled(&self, now: DateTime<Utc>) -> bool {
        self.is_running() && self.timeout_time.is_some_and(|timeout| timeout <= now)
    }

    /// 超时时间必须在 `1..=MAX_TIMEOUT_SECONDS` 秒之间
    pub fn validate_timeout(&self) -> AutomationResult<()> {
        if self.timeout_seconds <= 0 || self.timeout_seconds > MAX_TIMEOUT_SECONDS {
            return Err(AutomationError::InvalidTimeout(self.timeout_seconds));
        }
        Ok(())
    }

    pub fn timeout_after(&self, started_at: DateTime<Utc>) -> AutomationResult<DateTime<Utc>> {
        self.validate_timeout()?;
        Duration::try_seconds(self.timeout_seconds)
            .and_then(|timeout| started_at.checked_add_signed(timeout))
            .ok_or(AutomationError::InvalidTimeout(self.timeout_seconds))
    }

    pub fn validate_rules(&self) -> AutomationResult<()> {
        self.recurrence_rules.iter().try_for_each(TimePeriod::validate)
    }
}
