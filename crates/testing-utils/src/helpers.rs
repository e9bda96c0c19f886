//! 任务实现的测试替身

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::Value;

use automation_core::{models::TaskConfiguration, traits::Task};

/// 记录调用次数与收到的配置，可选地在返回前等待一段时间
#[derive(Debug, Clone, Default)]
pub struct RecordingTask {
    calls: Arc<AtomicUsize>,
    configurations: Arc<Mutex<Vec<TaskConfiguration>>>,
    output: Value,
    delay: Option<Duration>,
}

impl RecordingTask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = output;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn configurations(&self) -> Vec<TaskConfiguration> {
        self.configurations.lock().unwrap().clone()
    }

    pub fn last_configuration(&self) -> Option<TaskConfiguration> {
        self.configurations.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Task for RecordingTask {
    async fn run(&self, configuration: &TaskConfiguration) -> anyhow::Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.configurations
            .lock()
            .unwrap()
            .push(configuration.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.output.clone())
    }
}

/// 前 `failures` 次调用返回错误，之后成功
#[derive(Debug, Clone)]
pub struct FailingTask {
    calls: Arc<AtomicUsize>,
    failures: usize,
    message: String,
}

impl FailingTask {
    /// 总是失败
    pub fn always(message: &str) -> Self {
        Self::times(usize::MAX, message)
    }

    pub fn times(failures: usize, message: &str) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            failures,
            message: message.to_string(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Task for FailingTask {
    async fn run(&self, _configuration: &TaskConfiguration) -> anyhow::Result<Value> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(anyhow!("{}", self.message))
        } else {
            Ok(Value::String("recovered".to_string()))
        }
    }
}
