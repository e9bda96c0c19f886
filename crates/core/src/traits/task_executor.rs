//! 任务实现接口定义
//!
//! 定时任务与工作流步骤都通过字符串标识解析出 `Task` 实现并调用 `run`。
//! `run` 返回的值作为执行日志保存；返回的错误被记录为 FAILED，不会向外传播。
//!
//! ```rust
//! use async_trait::async_trait;
//! use automation_core::models::TaskConfiguration;
//! use automation_core::traits::Task;
//!
//! struct Greeter;
//!
//! #[async_trait]
//! impl Task for Greeter {
//!     async fn run(&self, configuration: &TaskConfiguration) -> anyhow::Result<serde_json::Value> {
//!         let name = configuration.get("name").and_then(|v| v.as_str()).unwrap_or("world");
//!         Ok(serde_json::json!(format!("hello {name}")))
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::models::TaskConfiguration;
use crate::AutomationResult;

#[async_trait]
pub trait Task: Send + Sync {
    async fn run(&self, configuration: &TaskConfiguration) -> anyhow::Result<Value>;
}

/// 任务解析接口
///
/// 按标识解析任务实现。未注册的标识必须返回
/// `AutomationError::TaskImplementationNotFound`，与一般的查找失败
/// (`AutomationError::TaskLookup`) 区分开。
pub trait TaskResolver: Send + Sync {
    fn resolve(&self, identifier: &str) -> AutomationResult<Arc<dyn Task>>;

    fn contains(&self, identifier: &str) -> bool;

    fn identifiers(&self) -> Vec<String>;
}

/// 将任务返回值转为日志文本：`null` 不记录，字符串取原文，其它取 JSON
pub fn render_task_output(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// 任务错误的日志文本：包含完整的错误链
pub fn render_task_error(error: &anyhow::Error) -> String {
    format!("{error:#}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_task_output() {
        assert_eq!(render_task_output(&Value::Null), None);
        assert_eq!(render_task_output(&json!("done")), Some("done".to_string()));
        assert_eq!(
            render_task_output(&json!({"sent": 3})),
            Some(r#"{"sent":3}"#.to_string())
        );
    }

    #[test]
    fn test_render_task_error_includes_context() {
        let err = anyhow::anyhow!("connection refused").context("发送邮件失败");
        assert_eq!(render_task_error(&err), "发送邮件失败: connection refused");
    }
}
