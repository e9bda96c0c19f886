use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use automation_core::{config::DatabaseConfig, models::ObjectClassMapping};

use super::sqlite::{
    SqliteCompletedStepRepository, SqliteDueStepQuery, SqliteScheduledTaskLogRepository,
    SqliteScheduledTaskRepository, SqliteWorkflowStepRepository,
};

const SCHEMA: &[(&str, &str)] = &[
    (
        "创建定时任务表失败",
        r#"
        CREATE TABLE IF NOT EXISTS scheduled_tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            task_identifier TEXT NOT NULL,
            configuration TEXT NOT NULL DEFAULT '{}',
            recurrence_rules TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL DEFAULT 'PENDING',
            last_start_time TEXT,
            last_end_time TEXT,
            next_start_time TEXT,
            timeout_time TEXT,
            timeout_seconds INTEGER NOT NULL DEFAULT 3600,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    ),
    (
        "创建定时任务执行记录表失败",
        r#"
        CREATE TABLE IF NOT EXISTS scheduled_task_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id INTEGER NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            status TEXT NOT NULL,
            log_output TEXT,
            FOREIGN KEY (task_id) REFERENCES scheduled_tasks(id) ON DELETE CASCADE
        )
        "#,
    ),
    (
        "创建工作流步骤表失败",
        r#"
        CREATE TABLE IF NOT EXISTS object_workflow_steps (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            object_class TEXT NOT NULL,
            step_key TEXT NOT NULL,
            step_trigger TEXT NOT NULL,
            step_trigger_data TEXT,
            task_identifier TEXT NOT NULL,
            task_configuration TEXT NOT NULL DEFAULT '{}',
            UNIQUE (object_class, step_key)
        )
        "#,
    ),
    (
        "创建工作流完成记录表失败",
        r#"
        CREATE TABLE IF NOT EXISTS object_workflow_completed_steps (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            object_class TEXT NOT NULL,
            object_pk TEXT NOT NULL,
            step_key TEXT NOT NULL,
            trigger_value TEXT NOT NULL,
            status TEXT NOT NULL,
            completed_time TEXT NOT NULL,
            log_output TEXT,
            UNIQUE (object_class, object_pk, step_key, trigger_value)
        )
        "#,
    ),
    (
        "创建定时任务到期索引失败",
        "CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_due ON scheduled_tasks(status, next_start_time)",
    ),
    (
        "创建执行记录任务ID索引失败",
        "CREATE INDEX IF NOT EXISTS idx_scheduled_task_logs_task ON scheduled_task_logs(task_id, start_time)",
    ),
    (
        "创建工作流步骤触发索引失败",
        "CREATE INDEX IF NOT EXISTS idx_object_workflow_steps_trigger ON object_workflow_steps(object_class, step_trigger)",
    ),
];

/// SQLite 连接池与仓储工厂
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let connect_options = SqliteConnectOptions::from_str(&config.url)
            .with_context(|| format!("解析数据库URL失败: {}", config.url))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(config.connection_timeout_seconds));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect_with(connect_options)
            .await
            .context("创建数据库连接池失败")?;

        info!("数据库连接池已创建: {}", config.url);
        Ok(Self { pool })
    }

    /// 单连接的内存数据库，连接不会被回收，数据在进程内一直有效
    pub async fn in_memory() -> Result<Self> {
        let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("解析内存数据库URL失败")?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect_options)
            .await
            .context("创建内存数据库失败")?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 创建引擎使用的四张表及索引，可重复执行
    pub async fn migrate(&self) -> Result<()> {
        debug!("开始执行数据库迁移");
        for (context, sql) in SCHEMA {
            sqlx::query(sql).execute(&self.pool).await.context(*context)?;
        }
        info!("数据库迁移完成");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("数据库健康检查失败")?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn scheduled_task_repository(&self) -> Arc<SqliteScheduledTaskRepository> {
        Arc::new(SqliteScheduledTaskRepository::new(self.pool.clone()))
    }

    pub fn scheduled_task_log_repository(&self) -> Arc<SqliteScheduledTaskLogRepository> {
        Arc::new(SqliteScheduledTaskLogRepository::new(self.pool.clone()))
    }

    pub fn workflow_step_repository(&self) -> Arc<SqliteWorkflowStepRepository> {
        Arc::new(SqliteWorkflowStepRepository::new(self.pool.clone()))
    }

    pub fn completed_step_repository(&self) -> Arc<SqliteCompletedStepRepository> {
        Arc::new(SqliteCompletedStepRepository::new(self.pool.clone()))
    }

    pub fn due_step_query(&self, mappings: &[ObjectClassMapping]) -> Arc<SqliteDueStepQuery> {
        Arc::new(SqliteDueStepQuery::new(self.pool.clone(), mappings))
    }
}
