use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use automation_core::{
    models::{
        ObjectWorkflowStep, ScheduledTask, StepTrigger, TaskConfiguration, TimePeriod,
    },
    traits::{
        CompletedStepRepository, ScheduledTaskLogRepository, ScheduledTaskService,
        StalledTaskService, Task, WorkflowStepRepository, WorkflowStepService,
    },
    AppConfig, Clock, SystemClock, TaskRegistry,
};
use automation_dispatcher::{ObjectWorkflowService, ScheduledTaskProcessor, StalledTaskRecovery};
use automation_infrastructure::{DatabaseManager, MetricsCollector};

/// 什么都不做的任务，用于冒烟检查
struct NoopTask;

#[async_trait]
impl Task for NoopTask {
    async fn run(&self, _configuration: &TaskConfiguration) -> anyhow::Result<Value> {
        Ok(Value::Null)
    }
}

/// 把配置写入日志；配置中的 `message` 作为输出
struct LogTask;

#[async_trait]
impl Task for LogTask {
    async fn run(&self, configuration: &TaskConfiguration) -> anyhow::Result<Value> {
        let rendered = Value::Object(configuration.clone());
        info!(configuration = %rendered, "log 任务执行");
        Ok(configuration
            .get("message")
            .cloned()
            .unwrap_or(Value::Null))
    }
}

/// 内置任务注册表
pub fn builtin_registry() -> TaskRegistry {
    TaskRegistry::builder()
        .register("noop", NoopTask)
        .register("log", LogTask)
        .build()
}

/// 装配好的引擎：数据库、三个服务以及共享的注册表与时钟
pub struct Engine {
    config: AppConfig,
    db: DatabaseManager,
    processor: ScheduledTaskProcessor,
    recovery: StalledTaskRecovery,
    workflow: ObjectWorkflowService,
}

impl Engine {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let db = DatabaseManager::new(&config.database).await?;
        let registry = Arc::new(builtin_registry());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let metrics = Arc::new(MetricsCollector::new());

        let task_repo = db.scheduled_task_repository();
        let log_repo = db.scheduled_task_log_repository();
        let ledger = db.completed_step_repository();

        let processor = ScheduledTaskProcessor::new(
            task_repo.clone(),
            log_repo.clone(),
            registry.clone(),
            clock.clone(),
            metrics.clone(),
        );
        let recovery = StalledTaskRecovery::new(task_repo, log_repo, clock.clone(), metrics.clone());
        let workflow = ObjectWorkflowService::new(
            db.workflow_step_repository(),
            ledger,
            db.due_step_query(&config.object_classes),
            registry,
            clock,
            metrics,
        );

        Ok(Self {
            config,
            db,
            processor,
            recovery,
            workflow,
        })
    }

    pub async fn shutdown(&self) {
        self.db.close().await;
    }

    pub async fn migrate(&self) -> Result<()> {
        self.db.migrate().await
    }

    pub async fn sweep_tasks(&self) -> Result<()> {
        if self.config.engine.sweep_stalled_tasks {
            self.sweep_stalled().await?;
        }
        let report = self.processor.sweep_due_scheduled_tasks().await?;
        print_json(&serde_json::to_value(report)?)
    }

    pub async fn sweep_stalled(&self) -> Result<()> {
        let report = self.recovery.sweep_stalled_tasks().await?;
        print_json(&serde_json::to_value(report)?)
    }

    pub async fn sweep_workflows(&self, classes: Vec<String>) -> Result<()> {
        let classes = if classes.is_empty() {
            self.config.engine.workflow_object_classes.clone()
        } else {
            classes
        };
        if classes.is_empty() {
            return Err(anyhow::anyhow!(
                "没有要扫描的对象类型，请使用 --class 或配置 engine.workflow_object_classes"
            ));
        }
        let report = self.workflow.sweep_due_workflow_steps(&classes).await?;
        print_json(&serde_json::to_value(report)?)
    }

    pub async fn trigger(
        &self,
        object_class: &str,
        object_pk: &str,
        step_key: &str,
        trigger_value: Option<&str>,
    ) -> Result<()> {
        let outcome = self
            .workflow
            .process_workflow_step(object_class, object_pk, step_key, trigger_value)
            .await?;
        println!("{outcome:?}");
        Ok(())
    }

    pub async fn task_history(&self, task_id: i64, limit: i64) -> Result<()> {
        let logs = self
            .db
            .scheduled_task_log_repository()
            .find_by_task(task_id, limit)
            .await?;
        print_json(&serde_json::to_value(logs)?)
    }

    pub async fn object_history(&self, object_class: &str, object_pk: &str) -> Result<()> {
        let entries = self
            .db
            .completed_step_repository()
            .find_for_object(object_class, object_pk)
            .await?;
        print_json(&serde_json::to_value(entries)?)
    }

    pub async fn add_task(
        &self,
        name: &str,
        task_identifier: &str,
        configuration: Option<&str>,
        rules: &[String],
        timeout_seconds: Option<i64>,
    ) -> Result<()> {
        let mut task = ScheduledTask::new(name, task_identifier);
        task.configuration = parse_configuration(configuration)?;
        task.recurrence_rules = rules
            .iter()
            .map(|rule| {
                serde_json::from_str::<TimePeriod>(rule)
                    .with_context(|| format!("解析时间规则失败: {rule}"))
            })
            .collect::<Result<_>>()?;
        task.timeout_seconds =
            timeout_seconds.unwrap_or(self.config.engine.default_timeout_seconds);

        let created = self.processor.create_task(task).await?;
        print_json(&serde_json::to_value(created)?)
    }

    pub async fn add_step(
        &self,
        object_class: &str,
        step_key: &str,
        trigger: &str,
        trigger_data: Option<&str>,
        task_identifier: &str,
        configuration: Option<&str>,
    ) -> Result<()> {
        let trigger = trigger
            .parse::<StepTrigger>()
            .map_err(|e| anyhow::anyhow!(e))?;
        let mut step = ObjectWorkflowStep::new(object_class, step_key, trigger, task_identifier);
        step.step_trigger_data = trigger_data.map(str::to_string);
        step.task_configuration = parse_configuration(configuration)?;

        match trigger {
            StepTrigger::DateOffsetDays => {
                step.date_offset()?;
            }
            StepTrigger::PropertyChange => {
                step.watched_field()?;
            }
            StepTrigger::Manual => {}
        }

        let created = self.db.workflow_step_repository().create(&step).await?;
        print_json(&serde_json::to_value(created)?)
    }
}

fn parse_configuration(configuration: Option<&str>) -> Result<TaskConfiguration> {
    match configuration {
        None => Ok(TaskConfiguration::new()),
        Some(text) => match serde_json::from_str::<Value>(text).context("解析任务配置失败")? {
            Value::Object(map) => Ok(map),
            other => Err(anyhow::anyhow!("任务配置必须是JSON对象: {other}")),
        },
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
