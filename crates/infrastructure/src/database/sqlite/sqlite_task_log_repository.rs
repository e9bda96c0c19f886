use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::debug;

use automation_core::{
    models::ScheduledTaskLog, traits::ScheduledTaskLogRepository, AutomationResult,
};

use crate::database::mapping::RepositoryErrorHelpers;

pub struct SqliteScheduledTaskLogRepository {
    pool: SqlitePool,
}

impl SqliteScheduledTaskLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_log(row: &SqliteRow) -> AutomationResult<ScheduledTaskLog> {
        Ok(ScheduledTaskLog {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            status: row.try_get("status")?,
            log_output: row.try_get("log_output")?,
        })
    }
}

#[async_trait]
impl ScheduledTaskLogRepository for SqliteScheduledTaskLogRepository {
    async fn create(&self, log: &ScheduledTaskLog) -> AutomationResult<ScheduledTaskLog> {
        let row = sqlx::query(
            r#"
            INSERT INTO scheduled_task_logs (task_id, start_time, end_time, status, log_output)
            VALUES (?1, ?2, ?3, ?4, ?5)
            RETURNING id, task_id, start_time, end_time, status, log_output
            "#,
        )
        .bind(log.task_id)
        .bind(log.start_time)
        .bind(log.end_time)
        .bind(log.status)
        .bind(&log.log_output)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error("创建", "定时任务执行记录", e))?;

        let created = Self::row_to_log(&row)?;
        debug!(
            "记录定时任务 {} 的执行结果: {} (记录ID: {})",
            created.task_id, created.status, created.id
        );
        Ok(created)
    }

    async fn find_by_task(
        &self,
        task_id: i64,
        limit: i64,
    ) -> AutomationResult<Vec<ScheduledTaskLog>> {
        let rows = sqlx::query(
            r#"
            SELECT id, task_id, start_time, end_time, status, log_output
            FROM scheduled_task_logs
            WHERE task_id = ?1
            ORDER BY start_time DESC, id DESC
            LIMIT ?2
            "#,
        )
        .bind(task_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error("查询", "定时任务执行记录", e))?;

        rows.iter().map(Self::row_to_log).collect()
    }
}
