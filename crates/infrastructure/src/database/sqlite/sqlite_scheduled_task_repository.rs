use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::{debug, instrument};

use automation_core::{
    models::{Lookup, ScheduledTask},
    traits::ScheduledTaskRepository,
    AutomationError, AutomationResult,
};

use crate::database::mapping::{MappingHelpers, RepositoryErrorHelpers};

const TASK_COLUMNS: &str = "id, name, task_identifier, configuration, recurrence_rules, status, \
    last_start_time, last_end_time, next_start_time, timeout_time, timeout_seconds, created_at, updated_at";

pub struct SqliteScheduledTaskRepository {
    pool: SqlitePool,
}

impl SqliteScheduledTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &SqliteRow) -> AutomationResult<ScheduledTask> {
        Ok(ScheduledTask {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            task_identifier: row.try_get("task_identifier")?,
            configuration: MappingHelpers::parse_json_column(row, "configuration")?,
            recurrence_rules: MappingHelpers::parse_json_column(row, "recurrence_rules")?,
            status: row.try_get("status")?,
            last_start_time: row.try_get("last_start_time")?,
            last_end_time: row.try_get("last_end_time")?,
            next_start_time: row.try_get("next_start_time")?,
            timeout_time: row.try_get("timeout_time")?,
            timeout_seconds: row.try_get("timeout_seconds")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// 条件更新没有命中时，区分任务不存在与状态已变化
    async fn lookup_miss(&self, id: i64) -> AutomationResult<Lookup<ScheduledTask>> {
        let exists = sqlx::query("SELECT 1 FROM scheduled_tasks WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error("查询", "定时任务", e))?;
        Ok(if exists.is_some() {
            Lookup::Stale
        } else {
            Lookup::NotFound
        })
    }

    async fn fetch_many(
        &self,
        sql: &str,
        now: DateTime<Utc>,
    ) -> AutomationResult<Vec<ScheduledTask>> {
        let rows = sqlx::query(sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error("查询", "定时任务", e))?;
        rows.iter().map(Self::row_to_task).collect()
    }
}

#[async_trait]
impl ScheduledTaskRepository for SqliteScheduledTaskRepository {
    #[instrument(skip(self, task), fields(task.name = %task.name))]
    async fn create(&self, task: &ScheduledTask) -> AutomationResult<ScheduledTask> {
        let configuration = MappingHelpers::to_json_text(&task.configuration, "configuration")?;
        let rules = MappingHelpers::to_json_text(&task.recurrence_rules, "recurrence_rules")?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO scheduled_tasks (name, task_identifier, configuration, recurrence_rules, status,
                last_start_time, last_end_time, next_start_time, timeout_time, timeout_seconds, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(&task.name)
        .bind(&task.task_identifier)
        .bind(configuration)
        .bind(rules)
        .bind(task.status)
        .bind(task.last_start_time)
        .bind(task.last_end_time)
        .bind(task.next_start_time)
        .bind(task.timeout_time)
        .bind(task.timeout_seconds)
        .bind(task.created_at)
        .bind(task.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error("创建", "定时任务", e))?;

        let created = Self::row_to_task(&row)?;
        debug!("创建定时任务成功: {} (ID: {})", created.name, created.id);
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> AutomationResult<Option<ScheduledTask>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM scheduled_tasks WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error("查询", "定时任务", e))?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self, task), fields(task.id = task.id))]
    async fn update(&self, task: &ScheduledTask) -> AutomationResult<()> {
        let configuration = MappingHelpers::to_json_text(&task.configuration, "configuration")?;
        let rules = MappingHelpers::to_json_text(&task.recurrence_rules, "recurrence_rules")?;

        let result = sqlx::query(
            r#"
            UPDATE scheduled_tasks
            SET name = ?2, task_identifier = ?3, configuration = ?4, recurrence_rules = ?5, status = ?6,
                last_start_time = ?7, last_end_time = ?8, next_start_time = ?9, timeout_time = ?10,
                timeout_seconds = ?11, updated_at = ?12
            WHERE id = ?1
            "#,
        )
        .bind(task.id)
        .bind(&task.name)
        .bind(&task.task_identifier)
        .bind(configuration)
        .bind(rules)
        .bind(task.status)
        .bind(task.last_start_time)
        .bind(task.last_end_time)
        .bind(task.next_start_time)
        .bind(task.timeout_time)
        .bind(task.timeout_seconds)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error("更新", "定时任务", e))?;

        if result.rows_affected() == 0 {
            return Err(AutomationError::ScheduledTaskNotFound { id: task.id });
        }
        Ok(())
    }

    async fn find_due(&self, now: DateTime<Utc>) -> AutomationResult<Vec<ScheduledTask>> {
        self.fetch_many(
            &format!(
                "SELECT {TASK_COLUMNS} FROM scheduled_tasks \
                 WHERE status <> 'RUNNING' AND next_start_time IS NOT NULL AND next_start_time <= ?1 \
                 ORDER BY next_start_time, id"
            ),
            now,
        )
        .await
    }

    async fn find_stalled(&self, now: DateTime<Utc>) -> AutomationResult<Vec<ScheduledTask>> {
        self.fetch_many(
            &format!(
                "SELECT {TASK_COLUMNS} FROM scheduled_tasks \
                 WHERE status = 'RUNNING' AND timeout_time IS NOT NULL AND timeout_time <= ?1 \
                 ORDER BY timeout_time, id"
            ),
            now,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn try_claim(
        &self,
        id: i64,
        started_at: DateTime<Utc>,
        timeout_time: DateTime<Utc>,
    ) -> AutomationResult<Lookup<ScheduledTask>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE scheduled_tasks
            SET status = 'RUNNING', last_start_time = ?2, timeout_time = ?3, updated_at = ?2
            WHERE id = ?1 AND status <> 'RUNNING'
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(started_at)
        .bind(timeout_time)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error("认领", "定时任务", e))?;

        match row {
            Some(row) => Ok(Lookup::Found(Self::row_to_task(&row)?)),
            None => self.lookup_miss(id).await,
        }
    }

    #[instrument(skip(self))]
    async fn mark_timed_out(
        &self,
        id: i64,
        expected_timeout_time: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        next_start_time: Option<DateTime<Utc>>,
    ) -> AutomationResult<Lookup<ScheduledTask>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE scheduled_tasks
            SET status = 'FAILED', last_end_time = ?3, next_start_time = ?4, updated_at = ?3
            WHERE id = ?1 AND status = 'RUNNING' AND timeout_time = ?2
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(expected_timeout_time)
        .bind(ended_at)
        .bind(next_start_time)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error("超时回收", "定时任务", e))?;

        match row {
            Some(row) => Ok(Lookup::Found(Self::row_to_task(&row)?)),
            None => self.lookup_miss(id).await,
        }
    }
}
