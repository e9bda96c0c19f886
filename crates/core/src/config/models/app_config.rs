use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::{database::DatabaseConfig, engine::EngineConfig, logging::LoggingConfig};
use crate::models::ObjectClassMapping;

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
    /// 参与日期偏移扫描的对象类型及其存储映射
    #[serde(default)]
    pub object_classes: Vec<ObjectClassMapping>,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序：
    /// 1. 默认配置
    /// 2. 配置文件（TOML）
    /// 3. 环境变量覆盖（前缀 `AUTOMATION_`，层级分隔符 `__`）
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults = Self::default();
        let mut builder = ConfigBuilder::builder()
            .set_default("database.url", defaults.database.url)?
            .set_default("database.max_connections", defaults.database.max_connections)?
            .set_default("database.min_connections", defaults.database.min_connections)?
            .set_default(
                "database.connection_timeout_seconds",
                defaults.database.connection_timeout_seconds,
            )?
            .set_default(
                "database.idle_timeout_seconds",
                defaults.database.idle_timeout_seconds,
            )?
            .set_default(
                "engine.default_timeout_seconds",
                defaults.engine.default_timeout_seconds,
            )?
            .set_default(
                "engine.sweep_stalled_tasks",
                defaults.engine.sweep_stalled_tasks,
            )?
            .set_default("logging.level", defaults.logging.level)?
            .set_default("logging.format", defaults.logging.format)?;

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/automation.toml", "automation.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("AUTOMATION")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.engine.validate().context("引擎配置验证失败")?;
        self.logging.validate().context("日志配置验证失败")?;

        let mut seen = HashSet::new();
        for mapping in &self.object_classes {
            mapping
                .validate()
                .with_context(|| format!("对象类型映射验证失败: {}", mapping.object_class))?;
            if !seen.insert(mapping.object_class.as_str()) {
                return Err(anyhow::anyhow!(
                    "对象类型映射重复: {}",
                    mapping.object_class
                ));
            }
        }

        for class in &self.engine.workflow_object_classes {
            if !seen.contains(class.as_str()) {
                return Err(anyhow::anyhow!("工作流对象类型未配置映射: {}", class));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[database]
url = "sqlite::memory:"
max_connections = 2
min_connections = 1
connection_timeout_seconds = 5
idle_timeout_seconds = 60

[engine]
default_timeout_seconds = 600
workflow_object_classes = ["Account"]
sweep_stalled_tasks = false

[logging]
level = "debug"
format = "json"

[[object_classes]]
object_class = "Account"
table = "accounts"
primary_key = "id"

[object_classes.fields]
expiresAt = "expires_at"
"#;

    #[test]
    fn test_from_toml() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.database.max_connections, 2);
        assert_eq!(config.engine.default_timeout_seconds, 600);
        assert!(!config.engine.sweep_stalled_tasks);
        assert_eq!(config.logging.format, "json");
        assert_eq!(
            config.object_classes[0].column_for("expiresAt").unwrap(),
            "expires_at"
        );
    }

    #[test]
    fn test_load_from_file_with_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[engine]\ndefault_timeout_seconds = 120").unwrap();

        let config = AppConfig::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(config.engine.default_timeout_seconds, 120);
        assert!(config.engine.sweep_stalled_tasks);
        assert_eq!(config.logging.level, "info");
        assert!(config.object_classes.is_empty());
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/nonexistent/automation.toml")).is_err());
    }

    #[test]
    fn test_workflow_class_requires_mapping() {
        let mut config = AppConfig::default();
        config.engine.workflow_object_classes = vec!["Contact".to_string()];
        assert!(config.validate().is_err());

        config
            .object_classes
            .push(ObjectClassMapping::new("Contact", "contacts", "id"));
        assert!(config.validate().is_ok());

        config
            .object_classes
            .push(ObjectClassMapping::new("Contact", "contacts_v2", "id"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip_preserves_mappings() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        let reparsed = AppConfig::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(reparsed.object_classes, config.object_classes);
    }
}
