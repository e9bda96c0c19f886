use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::traits::{Task, TaskResolver};
use crate::{AutomationError, AutomationResult};

type TaskFactory = Arc<dyn Fn() -> anyhow::Result<Arc<dyn Task>> + Send + Sync>;

/// 任务注册表：标识 -> 任务工厂
///
/// 启动时通过 `TaskRegistry::builder()` 构建后注入调度器和工作流服务，
/// 构建完成后不可修改。
#[derive(Clone, Default)]
pub struct TaskRegistry {
    factories: HashMap<String, TaskFactory>,
}

impl TaskRegistry {
    pub fn builder() -> TaskRegistryBuilder {
        TaskRegistryBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("identifiers", &self.identifiers())
            .finish()
    }
}

impl TaskResolver for TaskRegistry {
    fn resolve(&self, identifier: &str) -> AutomationResult<Arc<dyn Task>> {
        let factory = self
            .factories
            .get(identifier)
            .ok_or_else(|| AutomationError::TaskImplementationNotFound {
                identifier: identifier.to_string(),
            })?;

        factory().map_err(|e| AutomationError::TaskLookup {
            identifier: identifier.to_string(),
            message: format!("{e:#}"),
        })
    }

    fn contains(&self, identifier: &str) -> bool {
        self.factories.contains_key(identifier)
    }

    fn identifiers(&self) -> Vec<String> {
        let mut identifiers: Vec<String> = self.factories.keys().cloned().collect();
        identifiers.sort();
        identifiers
    }
}

#[derive(Default)]
pub struct TaskRegistryBuilder {
    factories: HashMap<String, TaskFactory>,
}

impl TaskRegistryBuilder {
    /// 注册一个共享实例，每次解析返回同一个 `Arc`
    pub fn register<T>(self, identifier: impl Into<String>, task: T) -> Self
    where
        T: Task + 'static,
    {
        let task: Arc<dyn Task> = Arc::new(task);
        self.register_factory(identifier, move || Ok(Arc::clone(&task)))
    }

    /// 注册一个工厂，每次解析时调用；工厂出错时解析返回 `TaskLookup`
    pub fn register_factory<F>(mut self, identifier: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<Arc<dyn Task>> + Send + Sync + 'static,
    {
        self.factories.insert(identifier.into(), Arc::new(factory));
        self
    }

    pub fn build(self) -> TaskRegistry {
        TaskRegistry {
            factories: self.factories,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskConfiguration;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Echo;

    #[async_trait]
    impl Task for Echo {
        async fn run(&self, configuration: &TaskConfiguration) -> anyhow::Result<Value> {
            Ok(Value::Object(configuration.clone()))
        }
    }

    #[tokio::test]
    async fn test_resolve_registered_task() {
        let registry = TaskRegistry::builder().register("echo", Echo).build();
        assert!(registry.contains("echo"));

        let task = registry.resolve("echo").unwrap();
        let mut configuration = TaskConfiguration::new();
        configuration.insert("a".to_string(), json!(1));
        assert_eq!(task.run(&configuration).await.unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_not_found_is_distinct_from_lookup_failure() {
        let registry = TaskRegistry::builder()
            .register_factory("broken", || Err(anyhow::anyhow!("缺少SMTP配置")))
            .build();

        match registry.resolve("missing") {
            Err(AutomationError::TaskImplementationNotFound { identifier }) => {
                assert_eq!(identifier, "missing")
            }
            other => panic!("unexpected: {:?}", other.err()),
        }

        match registry.resolve("broken") {
            Err(AutomationError::TaskLookup { identifier, message }) => {
                assert_eq!(identifier, "broken");
                assert!(message.contains("SMTP"));
            }
            other => panic!("unexpected: {:?}", other.err()),
        }
    }

    #[test]
    fn test_identifiers_are_sorted() {
        let registry = TaskRegistry::builder()
            .register("b", Echo)
            .register("a", Echo)
            .build();
        assert_eq!(registry.identifiers(), vec!["a", "b"]);
        assert_eq!(registry.len(), 2);
    }
}
