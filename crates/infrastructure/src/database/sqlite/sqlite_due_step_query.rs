//! 日期偏移步骤的批量查询
//!
//! 一次查询返回某对象类型的全部实例：被监听字段的当前值，以及在该值下
//! 已完成的排序最靠前的步骤。排序由调用方按偏移天数降序给出。

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::debug;

use automation_core::{
    models::{DueStepCandidate, ObjectClassMapping},
    traits::DueStepQuery,
    AutomationError, AutomationResult,
};

use crate::database::mapping::RepositoryErrorHelpers;

pub struct SqliteDueStepQuery {
    pool: SqlitePool,
    mappings: HashMap<String, ObjectClassMapping>,
}

impl SqliteDueStepQuery {
    pub fn new(pool: SqlitePool, mappings: &[ObjectClassMapping]) -> Self {
        let mappings = mappings
            .iter()
            .map(|mapping| (mapping.object_class.clone(), mapping.clone()))
            .collect();
        Self { pool, mappings }
    }

    fn mapping(&self, object_class: &str) -> AutomationResult<&ObjectClassMapping> {
        let mapping = self.mappings.get(object_class).ok_or_else(|| {
            AutomationError::UnmappedObjectClass {
                object_class: object_class.to_string(),
            }
        })?;
        mapping.validate()?;
        Ok(mapping)
    }

    fn build_query<'a>(
        mapping: &ObjectClassMapping,
        column: &str,
        object_class: &'a str,
        ranked_step_keys: &'a [String],
    ) -> QueryBuilder<'a, Sqlite> {
        let table = &mapping.table;
        let pk = &mapping.primary_key;

        let mut builder = QueryBuilder::new(format!(
            r#"SELECT CAST(o."{pk}" AS TEXT) AS object_pk, CAST(o."{column}" AS TEXT) AS watched_value, MIN(CASE c.step_key"#
        ));
        for (rank, step_key) in ranked_step_keys.iter().enumerate() {
            builder
                .push(" WHEN ")
                .push_bind(step_key.as_str())
                .push(format!(" THEN {rank}"));
        }
        builder.push(format!(
            r#" END) AS completed_rank FROM "{table}" o LEFT JOIN object_workflow_completed_steps c ON c.object_class = "#
        ));
        builder.push_bind(object_class);
        builder.push(format!(
            r#" AND c.object_pk = CAST(o."{pk}" AS TEXT) AND c.trigger_value = CAST(o."{column}" AS TEXT) AND c.status = 'COMPLETED' AND c.step_key IN ("#
        ));
        {
            let mut keys = builder.separated(", ");
            for step_key in ranked_step_keys {
                keys.push_bind(step_key.as_str());
            }
        }
        builder.push(format!(
            r#") WHERE o."{column}" IS NOT NULL GROUP BY o."{pk}", o."{column}" ORDER BY o."{pk}""#
        ));
        builder
    }
}

#[async_trait]
impl DueStepQuery for SqliteDueStepQuery {
    async fn find_due_step_candidates(
        &self,
        object_class: &str,
        field: &str,
        ranked_step_keys: &[String],
    ) -> AutomationResult<Vec<DueStepCandidate>> {
        let mapping = self.mapping(object_class)?;
        if ranked_step_keys.is_empty() {
            return Ok(Vec::new());
        }
        let column = mapping.column_for(field)?;

        let mut builder = Self::build_query(mapping, column, object_class, ranked_step_keys);
        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::database_error("查询", "日期偏移候选对象", e))?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let rank: Option<i64> = row.try_get("completed_rank")?;
            let last_completed_step_key = rank
                .and_then(|rank| usize::try_from(rank).ok())
                .and_then(|rank| ranked_step_keys.get(rank))
                .cloned();
            candidates.push(DueStepCandidate {
                object_pk: row.try_get("object_pk")?,
                watched_value: row.try_get("watched_value")?,
                last_completed_step_key,
            });
        }

        debug!(
            "对象类型 {} 字段 {} 共有 {} 个候选对象",
            object_class,
            field,
            candidates.len()
        );
        Ok(candidates)
    }
}
