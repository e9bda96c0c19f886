//! 结构化日志
//!
//! 引擎中的关键事件都通过这里输出，字段名固定，便于按 `event` 检索。

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use automation_core::models::{CompletedStepKey, CompletedStepStatus, ScheduledTaskStatus};

pub struct StructuredLogger;

impl StructuredLogger {
    pub fn log_task_claimed(
        task_id: i64,
        task_name: &str,
        task_identifier: &str,
        started_at: DateTime<Utc>,
        timeout_time: DateTime<Utc>,
    ) {
        info!(
            event = "scheduled_task_claimed",
            task.id = task_id,
            task.name = task_name,
            task.identifier = task_identifier,
            task.started_at = %started_at,
            task.timeout_time = %timeout_time,
            "定时任务已认领"
        );
    }

    pub fn log_task_finished(
        task_id: i64,
        task_name: &str,
        task_identifier: &str,
        status: ScheduledTaskStatus,
        duration_ms: i64,
        next_start_time: Option<DateTime<Utc>>,
        log_output: Option<&str>,
    ) {
        let next_start_time = next_start_time.map(|t| t.to_rfc3339());
        match status {
            ScheduledTaskStatus::Failed => {
                warn!(
                    event = "scheduled_task_finished",
                    task.id = task_id,
                    task.name = task_name,
                    task.identifier = task_identifier,
                    task.status = %status,
                    task.duration_ms = duration_ms,
                    task.next_start_time = next_start_time.as_deref().unwrap_or("-"),
                    task.error = log_output.unwrap_or("Unknown error"),
                    "定时任务执行失败"
                );
            }
            _ => {
                info!(
                    event = "scheduled_task_finished",
                    task.id = task_id,
                    task.name = task_name,
                    task.identifier = task_identifier,
                    task.status = %status,
                    task.duration_ms = duration_ms,
                    task.next_start_time = next_start_time.as_deref().unwrap_or("-"),
                    "定时任务执行完成"
                );
            }
        }
    }

    pub fn log_task_timed_out(task_id: i64, task_name: &str, timeout_time: DateTime<Utc>) {
        warn!(
            event = "scheduled_task_timed_out",
            task.id = task_id,
            task.name = task_name,
            task.timeout_time = %timeout_time,
            "定时任务运行超时，已标记为失败"
        );
    }

    pub fn log_workflow_step_completed(
        key: &CompletedStepKey,
        task_identifier: &str,
        status: CompletedStepStatus,
        log_output: Option<&str>,
    ) {
        match status {
            CompletedStepStatus::Completed => {
                info!(
                    event = "workflow_step_completed",
                    workflow.object_class = %key.object_class,
                    workflow.object_pk = %key.object_pk,
                    workflow.step_key = %key.step_key,
                    workflow.trigger_value = %key.trigger_value,
                    task.identifier = task_identifier,
                    workflow.status = %status,
                    "工作流步骤执行完成"
                );
            }
            CompletedStepStatus::Failed => {
                warn!(
                    event = "workflow_step_completed",
                    workflow.object_class = %key.object_class,
                    workflow.object_pk = %key.object_pk,
                    workflow.step_key = %key.step_key,
                    workflow.trigger_value = %key.trigger_value,
                    task.identifier = task_identifier,
                    workflow.status = %status,
                    workflow.error = log_output.unwrap_or("Unknown error"),
                    "工作流步骤执行失败"
                );
            }
        }
    }

    pub fn log_workflow_step_skipped(key: &CompletedStepKey, reason: &str) {
        debug!(
            event = "workflow_step_skipped",
            workflow.object_class = %key.object_class,
            workflow.object_pk = %key.object_pk,
            workflow.step_key = %key.step_key,
            workflow.trigger_value = %key.trigger_value,
            workflow.reason = reason,
            "跳过工作流步骤"
        );
    }

    pub fn log_ledger_duplicate_ignored(key: &CompletedStepKey) {
        info!(
            event = "ledger_duplicate_ignored",
            workflow.object_class = %key.object_class,
            workflow.object_pk = %key.object_pk,
            workflow.step_key = %key.step_key,
            workflow.trigger_value = %key.trigger_value,
            "完成记录已存在，忽略重复写入"
        );
    }

    pub fn log_sweep_finished(sweep: &str, examined: usize, processed: usize, errors: usize) {
        info!(
            event = "sweep_finished",
            sweep = sweep,
            sweep.examined = examined,
            sweep.processed = processed,
            sweep.errors = errors,
            "扫描完成"
        );
    }

    pub fn log_system_error(component: &str, operation: &str, error: &dyn std::error::Error) {
        error!(
            event = "system_error",
            component = component,
            operation = operation,
            error = %error,
            "系统错误"
        );
    }
}
