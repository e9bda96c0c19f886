//! 对象类型到存储表的显式映射
//!
//! 领域对象只以“类型名 + 主键”被引用。批量日期偏移查询需要知道对象类型
//! 存在哪张表、主键列以及字段对应的列，这些信息在代码或配置中显式给出。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{AutomationError, AutomationResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectClassMapping {
    pub object_class: String,
    pub table: String,
    pub primary_key: String,
    /// 字段名 -> 列名；未列出的字段按同名列处理
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl ObjectClassMapping {
    pub fn new(
        object_class: impl Into<String>,
        table: impl Into<String>,
        primary_key: impl Into<String>,
    ) -> Self {
        Self {
            object_class: object_class.into(),
            table: table.into(),
            primary_key: primary_key.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>, column: impl Into<String>) -> Self {
        self.fields.insert(field.into(), column.into());
        self
    }

    /// 字段对应的列名（已校验为合法标识符）
    pub fn column_for<'a>(&'a self, field: &'a str) -> AutomationResult<&'a str> {
        let column = self.fields.get(field).map(String::as_str).unwrap_or(field);
        ensure_identifier(column)?;
        Ok(column)
    }

    /// 表名、主键列以及所有映射列都必须是合法的 SQL 标识符
    pub fn validate(&self) -> AutomationResult<()> {
        if self.object_class.trim().is_empty() {
            return Err(AutomationError::Configuration(
                "对象类型名不能为空".to_string(),
            ));
        }
        ensure_identifier(&self.table)?;
        ensure_identifier(&self.primary_key)?;
        for column in self.fields.values() {
            ensure_identifier(column)?;
        }
        Ok(())
    }
}

fn ensure_identifier(name: &str) -> AutomationResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(AutomationError::Configuration(format!(
            "非法的表名或列名: '{name}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_lookup_defaults_to_field_name() {
        let mapping = ObjectClassMapping::new("Account", "accounts", "id")
            .with_field("expiresAt", "expires_at");
        assert_eq!(mapping.column_for("expiresAt").unwrap(), "expires_at");
        assert_eq!(mapping.column_for("created_at").unwrap(), "created_at");
    }

    #[test]
    fn test_rejects_unsafe_identifiers() {
        let mapping = ObjectClassMapping::new("Account", "accounts; DROP TABLE x", "id");
        assert!(mapping.validate().is_err());

        let mapping = ObjectClassMapping::new("Account", "accounts", "id");
        assert!(mapping.column_for("name\"--").is_err());
        assert!(mapping.validate().is_ok());
    }
}
