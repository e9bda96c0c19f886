use serde::{Deserialize, Serialize};

use crate::models::MAX_TIMEOUT_SECONDS;

/// 引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 新建定时任务的默认超时时间
    pub default_timeout_seconds: i64,
    /// `sweep-workflows` 未指定对象类型时扫描的类型
    #[serde(default)]
    pub workflow_object_classes: Vec<String>,
    /// 扫描到期任务前是否先回收超时任务
    pub sweep_stalled_tasks: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: 3600,
            workflow_object_classes: Vec::new(),
            sweep_stalled_tasks: true,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_timeout_seconds <= 0 {
            return Err(anyhow::anyhow!("默认超时时间必须大于0"));
        }
        if self.default_timeout_seconds > MAX_TIMEOUT_SECONDS {
            return Err(anyhow::anyhow!(
                "默认超时时间不能超过 {} 秒",
                MAX_TIMEOUT_SECONDS
            ));
        }

        if self
            .workflow_object_classes
            .iter()
            .any(|class| class.trim().is_empty())
        {
            return Err(anyhow::anyhow!("工作流对象类型名不能为空"));
        }

        Ok(())
    }
}
