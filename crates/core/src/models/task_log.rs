use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ScheduledTaskStatus;

/// 定时任务的一次执行记录（只追加，不修改）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTaskLog {
    pub id: i64,
    pub task_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: ScheduledTaskStatus,
    pub log_output: Option<String>,
}

impl ScheduledTaskLog {
    pub fn new(
        task_id: i64,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        status: ScheduledTaskStatus,
        log_output: Option<String>,
    ) -> Self {
        Self {
            id: 0,
            task_id,
            start_time,
            end_time,
            status,
            log_output,
        }
    }

    pub fn duration_ms(&self) -> i64 {
        (self.end_time - self.start_time).num_milliseconds()
    }
}
