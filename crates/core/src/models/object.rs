use serde_json::Value;

/// 可被工作流读取字段的领域对象
///
/// 引擎不嵌入领域对象，只通过字段名读取值；缺失字段与 `null` 都视为 `None`。
pub trait WorkflowObject {
    fn field_value(&self, field: &str) -> Option<Value>;
}

impl WorkflowObject for Value {
    fn field_value(&self, field: &str) -> Option<Value> {
        match self.get(field) {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.clone()),
        }
    }
}

impl WorkflowObject for serde_json::Map<String, Value> {
    fn field_value(&self, field: &str) -> Option<Value> {
        match self.get(field) {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.clone()),
        }
    }
}

/// 字段值的文本形式：字符串取原文，其它类型取 JSON 表示
pub fn field_value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_and_missing_fields_are_none() {
        let object = json!({"status": "active", "owner": null});
        assert_eq!(object.field_value("status"), Some(json!("active")));
        assert_eq!(object.field_value("owner"), None);
        assert_eq!(object.field_value("missing"), None);
    }

    #[test]
    fn test_field_value_text() {
        assert_eq!(field_value_text(&json!("2024-03-10")), "2024-03-10");
        assert_eq!(field_value_text(&json!(42)), "42");
    }
}
