use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use automation_core::{
    models::{Lookup, SaveOptions, ScheduledTask, ScheduledTaskLog, ScheduledTaskStatus, SweepReport},
    traits::{
        render_task_error, render_task_output, ScheduledTaskLogRepository,
        ScheduledTaskRepository, ScheduledTaskService, TaskResolver,
    },
    AutomationError, AutomationResult, Clock,
};
use automation_infrastructure::{MetricsCollector, StructuredLogger};

use crate::recurrence::compute_next_start_time;

/// 单个任务的处理结果
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    /// 认领并执行了任务
    Executed(ScheduledTask),
    /// 未执行，任务原样返回
    Skipped(ScheduledTask, SkipReason),
}

impl ProcessOutcome {
    pub fn into_task(self) -> ScheduledTask {
        match self {
            ProcessOutcome::Executed(task) | ProcessOutcome::Skipped(task, _) => task,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyRunning,
    NotDue,
    /// 认领时发现已被其他处理器置为运行中
    ClaimLost,
}

pub struct ScheduledTaskProcessor {
    task_repo: Arc<dyn ScheduledTaskRepository>,
    log_repo: Arc<dyn ScheduledTaskLogRepository>,
    registry: Arc<dyn TaskResolver>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
}

impl ScheduledTaskProcessor {
    pub fn new(
        task_repo: Arc<dyn ScheduledTaskRepository>,
        log_repo: Arc<dyn ScheduledTaskLogRepository>,
        registry: Arc<dyn TaskResolver>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            task_repo,
            log_repo,
            registry,
            clock,
            metrics,
        }
    }

    /// 处理单个任务并返回详细结果
    ///
    /// 任务实现的解析在认领之前完成，标识无法解析时任务状态保持不变。
    #[instrument(skip(self, task), fields(task.id = task.id, task.name = %task.name))]
    pub async fn process(&self, task: ScheduledTask) -> AutomationResult<ProcessOutcome> {
        if task.is_running() {
            debug!("任务 {} 正在运行，跳过", task.id);
            return Ok(ProcessOutcome::Skipped(task, SkipReason::AlreadyRunning));
        }

        let started_at = self.clock.now();
        if !task.is_due(started_at) {
            debug!("任务 {} 尚未到期，跳过", task.id);
            return Ok(ProcessOutcome::Skipped(task, SkipReason::NotDue));
        }

        let implementation = self.registry.resolve(&task.task_identifier)?;
        let timeout_time = task.timeout_after(started_at)?;
        let mut claimed = match self
            .task_repo
            .try_claim(task.id, started_at, timeout_time)
            .await?
        {
            Lookup::Found(claimed) => claimed,
            Lookup::Stale => {
                debug!("任务 {} 已被其他处理器认领", task.id);
                return Ok(ProcessOutcome::Skipped(task, SkipReason::ClaimLost));
            }
            Lookup::NotFound => return Err(AutomationError::ScheduledTaskNotFound { id: task.id }),
        };

        StructuredLogger::log_task_claimed(
            claimed.id,
            &claimed.name,
            &claimed.task_identifier,
            started_at,
            timeout_time,
        );

        let timer = Instant::now();
        let (status, log_output) = match implementation.run(&claimed.configuration).await {
            Ok(value) => (ScheduledTaskStatus::Completed, render_task_output(&value)),
            Err(e) => (ScheduledTaskStatus::Failed, Some(render_task_error(&e))),
        };
        self.metrics.record_task_execution(
            status == ScheduledTaskStatus::Failed,
            timer.elapsed().as_secs_f64(),
        );

        let ended_at = self.clock.now();
        claimed.status = status;
        claimed.last_end_time = Some(ended_at);
        claimed.next_start_time = compute_next_start_time(ended_at, &claimed.recurrence_rules);
        claimed.updated_at = ended_at;

        // 先写回任务状态，执行记录写入失败只记日志，不能让任务停留在 RUNNING
        self.task_repo.update(&claimed).await?;
        let log = ScheduledTaskLog::new(claimed.id, started_at, ended_at, status, log_output);
        if let Err(e) = self.log_repo.create(&log).await {
            self.metrics.record_log_write_failure();
            StructuredLogger::log_system_error(
                "scheduler",
                &format!("create_task_log({})", claimed.id),
                &e,
            );
        }

        StructuredLogger::log_task_finished(
            claimed.id,
            &claimed.name,
            &claimed.task_identifier,
            status,
            log.duration_ms(),
            claimed.next_start_time,
            log.log_output.as_deref(),
        );

        Ok(ProcessOutcome::Executed(claimed))
    }

    /// 保存任务
    ///
    /// 除非设置了 `skip_recurrence_recompute` 或任务正在运行，否则按当前时间重新计算
    /// 下一次执行时间。`id == 0` 的任务会被插入。
    pub async fn save_task(
        &self,
        mut task: ScheduledTask,
        options: SaveOptions,
    ) -> AutomationResult<ScheduledTask> {
        task.validate_rules()?;
        task.validate_timeout()?;

        let now = self.clock.now();
        if !options.skip_recurrence_recompute && !task.is_running() {
            task.next_start_time = compute_next_start_time(now, &task.recurrence_rules);
        }
        task.updated_at = now;

        if task.id == 0 {
            task.created_at = now;
            let created = self.task_repo.create(&task).await?;
            info!(
                "创建定时任务 {} (ID: {})，下一次执行时间: {:?}",
                created.name, created.id, created.next_start_time
            );
            Ok(created)
        } else {
            self.task_repo.update(&task).await?;
            debug!("更新定时任务 {} (ID: {})", task.name, task.id);
            Ok(task)
        }
    }

    /// 以 PENDING 状态创建新任务
    pub async fn create_task(&self, mut task: ScheduledTask) -> AutomationResult<ScheduledTask> {
        if !self.registry.contains(&task.task_identifier) {
            return Err(AutomationError::task_not_found(task.task_identifier));
        }
        task.id = 0;
        task.status = ScheduledTaskStatus::Pending;
        task.last_start_time = None;
        task.last_end_time = None;
        task.timeout_time = None;
        self.save_task(task, SaveOptions::default()).await
    }
}

#[async_trait]
impl ScheduledTaskService for ScheduledTaskProcessor {
    async fn process_scheduled_task(&self, task: ScheduledTask) -> AutomationResult<ScheduledTask> {
        self.process(task).await.map(ProcessOutcome::into_task)
    }

    #[instrument(skip(self))]
    async fn sweep_due_scheduled_tasks(&self) -> AutomationResult<SweepReport> {
        let timer = Instant::now();

        let now = self.clock.now();
        let due_tasks = self.task_repo.find_due(now).await?;
        info!("开始扫描到期的定时任务，共 {} 个候选", due_tasks.len());

        let mut report = SweepReport::default();
        for task in due_tasks {
            report.examined += 1;
            let task_id = task.id;
            match self.process(task).await {
                Ok(ProcessOutcome::Executed(task)) => report.record_processed(task.status),
                Ok(ProcessOutcome::Skipped(..)) => report.skipped += 1,
                Err(e) => {
                    report.errors += 1;
                    StructuredLogger::log_system_error(
                        "scheduler",
                        &format!("process_scheduled_task({task_id})"),
                        &e,
                    );
                }
            }
        }

        self.metrics
            .record_sweep_duration("scheduled_tasks", timer.elapsed().as_secs_f64());
        StructuredLogger::log_sweep_finished(
            "scheduled_tasks",
            report.examined,
            report.processed,
            report.errors,
        );
        Ok(report)
    }
}
