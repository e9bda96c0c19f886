//! 行映射与错误转换的共用工具
//!
//! SQLite 中 JSON 字段以 TEXT 存储，读取时在这里统一解析。

use serde::de::DeserializeOwned;
use sqlx::{sqlite::SqliteRow, Row};
use tracing::error;

use automation_core::{AutomationError, AutomationResult};

pub struct MappingHelpers;

impl MappingHelpers {
    /// 解析 TEXT 列中的 JSON；列为 NULL 或空字符串时返回默认值
    pub fn parse_json_column<T>(row: &SqliteRow, column: &str) -> AutomationResult<T>
    where
        T: DeserializeOwned + Default,
    {
        let text: Option<String> = row.try_get(column)?;
        match text.as_deref().map(str::trim) {
            None | Some("") => Ok(T::default()),
            Some(json) => serde_json::from_str(json).map_err(|e| {
                AutomationError::Serialization(format!("解析字段 {column} 失败: {e}"))
            }),
        }
    }

    pub fn to_json_text<T: serde::Serialize>(value: &T, column: &str) -> AutomationResult<String> {
        serde_json::to_string(value)
            .map_err(|e| AutomationError::Serialization(format!("序列化字段 {column} 失败: {e}")))
    }
}

/// 仓储操作失败时记录上下文并转换为统一错误
pub struct RepositoryErrorHelpers;

impl RepositoryErrorHelpers {
    pub fn database_error(operation: &str, entity: &str, err: sqlx::Error) -> AutomationError {
        error!(
            operation = operation,
            entity = entity,
            error = %err,
            "数据库操作失败"
        );
        AutomationError::Database(err)
    }
}
