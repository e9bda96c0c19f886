use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use automation_core::{
    models::{Lookup, ScheduledTask, ScheduledTaskLog, ScheduledTaskStatus, SweepReport},
    traits::{ScheduledTaskLogRepository, ScheduledTaskRepository, StalledTaskService},
    AutomationResult, Clock,
};
use automation_infrastructure::{MetricsCollector, StructuredLogger};

use crate::recurrence::compute_next_start_time;

/// 超时任务回收
///
/// 运行中且超过 `timeout_time` 的任务被强制置为 FAILED。只有当任务仍是运行中、
/// 且超时时间与扫描时读到的一致时才会修改，已被重新认领的任务不受影响。
pub struct StalledTaskRecovery {
    task_repo: Arc<dyn ScheduledTaskRepository>,
    log_repo: Arc<dyn ScheduledTaskLogRepository>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
}

impl StalledTaskRecovery {
    pub fn new(
        task_repo: Arc<dyn ScheduledTaskRepository>,
        log_repo: Arc<dyn ScheduledTaskLogRepository>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            task_repo,
            log_repo,
            clock,
            metrics,
        }
    }

    /// 回收单个任务，返回是否实际修改了任务
    async fn recover(&self, task: &ScheduledTask) -> AutomationResult<bool> {
        let now = self.clock.now();
        let Some(timeout_time) = task.timeout_time.filter(|_| task.is_stalled(now)) else {
            debug!("任务 {} 未超时，跳过", task.id);
            return Ok(false);
        };

        let next_start_time = compute_next_start_time(now, &task.recurrence_rules);
        let updated = match self
            .task_repo
            .mark_timed_out(task.id, timeout_time, now, next_start_time)
            .await?
        {
            Lookup::Found(updated) => updated,
            Lookup::Stale | Lookup::NotFound => {
                debug!("任务 {} 状态已变化，放弃回收", task.id);
                return Ok(false);
            }
        };

        let started_at = updated.last_start_time.unwrap_or(timeout_time);
        let message = format!(
            "任务执行超时: 开始于 {}，超时时间 {}，回收于 {}",
            started_at.to_rfc3339(),
            timeout_time.to_rfc3339(),
            now.to_rfc3339()
        );
        let log = ScheduledTaskLog::new(
            updated.id,
            started_at,
            now,
            ScheduledTaskStatus::Failed,
            Some(message),
        );
        self.log_repo.create(&log).await?;

        self.metrics.record_task_timeout();
        StructuredLogger::log_task_timed_out(updated.id, &updated.name, timeout_time);
        Ok(true)
    }
}

#[async_trait]
impl StalledTaskService for StalledTaskRecovery {
    #[instrument(skip(self))]
    async fn sweep_stalled_tasks(&self) -> AutomationResult<SweepReport> {
        let timer = Instant::now();
        let stalled = self.task_repo.find_stalled(self.clock.now()).await?;
        if !stalled.is_empty() {
            warn!("发现 {} 个运行超时的定时任务", stalled.len());
        }

        let mut report = SweepReport::default();
        for task in &stalled {
            report.examined += 1;
            match self.recover(task).await {
                Ok(true) => report.record_processed(ScheduledTaskStatus::Failed),
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    report.errors += 1;
                    StructuredLogger::log_system_error(
                        "recovery",
                        &format!("sweep_stalled_task({})", task.id),
                        &e,
                    );
                }
            }
        }

        self.metrics
            .record_sweep_duration("stalled_tasks", timer.elapsed().as_secs_f64());
        info!(
            "超时任务回收完成: 检查 {} 个，回收 {} 个",
            report.examined, report.processed
        );
        Ok(report)
    }
}
