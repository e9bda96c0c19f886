use thiserror::Error;

/// 自动化引擎错误类型定义
///
/// 定义类错误（步骤定义缺失、任务标识无法解析）与基础设施错误分开建模，
/// 任务执行本身抛出的错误不会出现在这里，它们总是被记录为 FAILED 结果。
#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("定时任务未找到: {id}")]
    ScheduledTaskNotFound { id: i64 },

    #[error("工作流步骤未找到: {object_class}/{step_key}")]
    StepNotFound {
        object_class: String,
        step_key: String,
    },

    #[error("没有任务实现: {identifier}")]
    TaskImplementationNotFound { identifier: String },

    #[error("任务实现查找失败: {identifier} - {message}")]
    TaskLookup { identifier: String, message: String },

    #[error("对象类型未配置映射: {object_class}")]
    UnmappedObjectClass { object_class: String },

    #[error("无效的时间规则: {0}")]
    InvalidTimePeriod(String),

    #[error("无效的触发数据: {step_key} - {message}")]
    InvalidTriggerData { step_key: String, message: String },

    #[error("无效的超时时间: {0} 秒")]
    InvalidTimeout(i64),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl AutomationError {
    pub fn step_not_found<S: Into<String>>(object_class: S, step_key: S) -> Self {
        Self::StepNotFound {
            object_class: object_class.into(),
            step_key: step_key.into(),
        }
    }

    pub fn task_not_found<S: Into<String>>(identifier: S) -> Self {
        Self::TaskImplementationNotFound {
            identifier: identifier.into(),
        }
    }

    pub fn invalid_trigger<S: Into<String>>(step_key: S, message: S) -> Self {
        Self::InvalidTriggerData {
            step_key: step_key.into(),
            message: message.into(),
        }
    }

    /// 是否属于配置/定义类错误（需要人工修正，而不是重试）
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            AutomationError::StepNotFound { .. }
                | AutomationError::TaskImplementationNotFound { .. }
                | AutomationError::TaskLookup { .. }
                | AutomationError::UnmappedObjectClass { .. }
                | AutomationError::InvalidTimePeriod(_)
                | AutomationError::InvalidTriggerData { .. }
                | AutomationError::InvalidTimeout(_)
        )
    }

    /// 唯一约束冲突（例如并发写入工作流完成记录）
    pub fn is_unique_violation(&self) -> bool {
        match self {
            AutomationError::Database(sqlx::Error::Database(db_err)) => {
                db_err.is_unique_violation()
            }
            _ => false,
        }
    }
}

impl From<serde_json::Error> for AutomationError {
    fn from(err: serde_json::Error) -> Self {
        AutomationError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for AutomationError {
    fn from(err: anyhow::Error) -> Self {
        AutomationError::Internal(err.to_string())
    }
}

/// 统一的Result类型
pub type AutomationResult<T> = std::result::Result<T, AutomationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_errors_are_classified() {
        assert!(AutomationError::step_not_found("Account", "welcome").is_definition_error());
        assert!(AutomationError::task_not_found("send_mail").is_definition_error());
        assert!(AutomationError::InvalidTimeout(0).is_definition_error());
        assert!(!AutomationError::Internal("boom".into()).is_definition_error());
    }

    #[test]
    fn test_error_messages() {
        let err = AutomationError::step_not_found("Account", "welcome");
        assert_eq!(err.to_string(), "工作流步骤未找到: Account/welcome");

        let err = AutomationError::ScheduledTaskNotFound { id: 7 };
        assert_eq!(err.to_string(), "定时任务未找到: 7");
    }
}
