use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::{debug, instrument};

use automation_core::{
    models::{
        CompletedStepKey, LedgerWrite, ObjectWorkflowCompletedStep, ObjectWorkflowStep,
        StepTrigger,
    },
    traits::{CompletedStepRepository, WorkflowStepRepository},
    AutomationResult,
};

use crate::database::mapping::{MappingHelpers, RepositoryErrorHelpers};

const STEP_COLUMNS: &str =
    "id, object_class, step_key, step_trigger, step_trigger_data, task_identifier, task_configuration";

const COMPLETED_COLUMNS: &str =
    "object_class, object_pk, step_key, trigger_value, status, completed_time, log_output";

pub struct SqliteWorkflowStepRepository {
    pool: SqlitePool,
}

impl SqliteWorkflowStepRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_step(row: &SqliteRow) -> AutomationResult<ObjectWorkflowStep> {
        Ok(ObjectWorkflowStep {
            id: row.try_get("id")?,
            object_class: row.try_get("object_class")?,
            step_key: row.try_get("step_key")?,
            step_trigger: row.try_get("step_trigger")?,
            step_trigger_data: row.try_get("step_trigger_data")?,
            task_identifier: row.try_get("task_identifier")?,
            task_configuration: MappingHelpers::parse_json_column(row, "task_configuration")?,
        })
    }
}

#[async_trait]
impl WorkflowStepRepository for SqliteWorkflowStepRepository {
    async fn create(&self, step: &ObjectWorkflowStep) -> AutomationResult<ObjectWorkflowStep> {
        let configuration =
            MappingHelpers::to_json_text(&step.task_configuration, "task_configuration")?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO object_workflow_steps
                (object_class, step_key, step_trigger, step_trigger_data, task_identifier, task_configuration)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            RETURNING {STEP_COLUMNS}
            "#
        ))
        .bind(&step.object_class)
        .bind(&step.step_key)
        .bind(step.step_trigger)
        .bind(&step.step_trigger_data)
        .bind(&step.task_identifier)
        .bind(configuration)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error("创建", "工作流步骤", e))?;

        let created = Self::row_to_step(&row)?;
        debug!(
            "创建工作流步骤成功: {}/{} ({})",
            created.object_class, created.step_key, created.step_trigger
        );
        Ok(created)
    }

    async fn find(
        &self,
        object_class: &str,
        step_key: &str,
    ) -> AutomationResult<Option<ObjectWorkflowStep>> {
        let row = sqlx::query(&format!(
            "SELECT {STEP_COLUMNS} FROM object_workflow_steps WHERE object_class = ?1 AND step_key = ?2"
        ))
        .bind(object_class)
        .bind(step_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error("查询", "工作流步骤", e))?;

        row.as_ref().map(Self::row_to_step).transpose()
    }

    async fn find_by_trigger(
        &self,
        object_class: &str,
        trigger: StepTrigger,
    ) -> AutomationResult<Vec<ObjectWorkflowStep>> {
        let rows = sqlx::query(&format!(
            "SELECT {STEP_COLUMNS} FROM object_workflow_steps \
             WHERE object_class = ?1 AND step_trigger = ?2 ORDER BY step_key"
        ))
        .bind(object_class)
        .bind(trigger)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error("查询", "工作流步骤", e))?;

        rows.iter().map(Self::row_to_step).collect()
    }
}

/// 步骤完成账本
///
/// 复合键上的唯一约束保证每个 (对象, 步骤, 触发值) 只有一行。
pub struct SqliteCompletedStepRepository {
    pool: SqlitePool,
}

impl SqliteCompletedStepRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_completed(row: &SqliteRow) -> AutomationResult<ObjectWorkflowCompletedStep> {
        Ok(ObjectWorkflowCompletedStep {
            key: CompletedStepKey {
                object_class: row.try_get("object_class")?,
                object_pk: row.try_get("object_pk")?,
                step_key: row.try_get("step_key")?,
                trigger_value: row.try_get("trigger_value")?,
            },
            status: row.try_get("status")?,
            completed_time: row.try_get("completed_time")?,
            log_output: row.try_get("log_output")?,
        })
    }
}

#[async_trait]
impl CompletedStepRepository for SqliteCompletedStepRepository {
    async fn find(
        &self,
        key: &CompletedStepKey,
    ) -> AutomationResult<Option<ObjectWorkflowCompletedStep>> {
        let row = sqlx::query(&format!(
            "SELECT {COMPLETED_COLUMNS} FROM object_workflow_completed_steps \
             WHERE object_class = ?1 AND object_pk = ?2 AND step_key = ?3 AND trigger_value = ?4"
        ))
        .bind(&key.object_class)
        .bind(&key.object_pk)
        .bind(&key.step_key)
        .bind(&key.trigger_value)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error("查询", "工作流完成记录", e))?;

        row.as_ref().map(Self::row_to_completed).transpose()
    }

    /// 先尝试插入；键已存在时只覆盖非 COMPLETED 的记录
    #[instrument(skip(self, step), fields(workflow.key = %step.key))]
    async fn record(&self, step: &ObjectWorkflowCompletedStep) -> AutomationResult<LedgerWrite> {
        let key = &step.key;

        let inserted = sqlx::query(
            r#"
            INSERT INTO object_workflow_completed_steps
                (object_class, object_pk, step_key, trigger_value, status, completed_time, log_output)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (object_class, object_pk, step_key, trigger_value) DO NOTHING
            "#,
        )
        .bind(&key.object_class)
        .bind(&key.object_pk)
        .bind(&key.step_key)
        .bind(&key.trigger_value)
        .bind(step.status)
        .bind(step.completed_time)
        .bind(&step.log_output)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error("创建", "工作流完成记录", e))?;

        if inserted.rows_affected() == 1 {
            return Ok(LedgerWrite::Inserted);
        }

        let replaced = sqlx::query(
            r#"
            UPDATE object_workflow_completed_steps
            SET status = ?5, completed_time = ?6, log_output = ?7
            WHERE object_class = ?1 AND object_pk = ?2 AND step_key = ?3 AND trigger_value = ?4
              AND status <> 'COMPLETED'
            "#,
        )
        .bind(&key.object_class)
        .bind(&key.object_pk)
        .bind(&key.step_key)
        .bind(&key.trigger_value)
        .bind(step.status)
        .bind(step.completed_time)
        .bind(&step.log_output)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error("更新", "工作流完成记录", e))?;

        Ok(if replaced.rows_affected() == 1 {
            LedgerWrite::Replaced
        } else {
            LedgerWrite::DuplicateIgnored
        })
    }

    async fn find_for_object(
        &self,
        object_class: &str,
        object_pk: &str,
    ) -> AutomationResult<Vec<ObjectWorkflowCompletedStep>> {
        let rows = sqlx::query(&format!(
            "SELECT {COMPLETED_COLUMNS} FROM object_workflow_completed_steps \
             WHERE object_class = ?1 AND object_pk = ?2 ORDER BY completed_time DESC, id DESC"
        ))
        .bind(object_class)
        .bind(object_pk)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::database_error("查询", "工作流完成记录", e))?;

        rows.iter().map(Self::row_to_completed).collect()
    }
}
