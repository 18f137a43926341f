//! 工具参数 JSON Schema：由 schemars 从参数结构体生成，并在调用前校验模型给出的参数
//!
//! 校验覆盖 function calling 实际用到的子集：object、required、properties 的 type（含 type 数组）、
//! minimum / maximum、additionalProperties: false。

use schemars::{schema_for, JsonSchema};
use serde_json::{json, Value};

/// 由参数结构体生成 function.parameters（去掉 $schema / title 等元信息）
pub fn parameters_schema_for<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| json!({"type": "object"}));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
        if obj.get("definitions").and_then(|d| d.as_object()).is_some_and(|d| d.is_empty()) {
            obj.remove("definitions");
        }
    }
    value
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn check_property(name: &str, schema: &Value, value: &Value) -> Result<(), String> {
    let allowed: Vec<&str> = match schema.get("type") {
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(ts)) => ts.iter().filter_map(|t| t.as_str()).collect(),
        _ => Vec::new(),
    };
    if !allowed.is_empty() && !allowed.iter().any(|t| type_matches(t, value)) {
        return Err(format!(
            "field '{}' must be of type {}",
            name,
            allowed.join(" or ")
        ));
    }
    if let Some(n) = value.as_f64() {
        if let Some(min) = schema.get("minimum").and_then(|m| m.as_f64()) {
            if n < min {
                return Err(format!("field '{}' must be >= {}", name, min));
            }
        }
        if let Some(max) = schema.get("maximum").and_then(|m| m.as_f64()) {
            if n > max {
                return Err(format!("field '{}' must be <= {}", name, max));
            }
        }
    }
    Ok(())
}

/// 按工具声明的 schema 校验参数；不通过时返回原因
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    let obj = match args {
        Value::Object(obj) => obj,
        Value::String(raw) => return Err(format!("arguments are not valid JSON: {}", raw)),
        other => return Err(format!("arguments must be a JSON object, got {}", other)),
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for key in required.iter().filter_map(|k| k.as_str()) {
            if !obj.contains_key(key) {
                return Err(format!("missing required field '{}'", key));
            }
        }
    }

    let properties = schema.get("properties").and_then(|p| p.as_object());
    let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));
    for (key, value) in obj {
        match properties.and_then(|p| p.get(key)) {
            Some(prop) => check_property(key, prop, value)?,
            None if closed => return Err(format!("unexpected field '{}'", key)),
            None => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[allow(dead_code)]
    #[derive(Deserialize, JsonSchema)]
    #[serde(deny_unknown_fields)]
    struct Args {
        /// query text
        query: String,
        lang: Option<String>,
        num_results: Option<u32>,
    }

    #[test]
    fn test_generated_schema_shape() {
        let schema = parameters_schema_for::<Args>();
        assert_eq!(schema["type"], "object");
        assert!(schema.get("$schema").is_none());
        assert!(schema.get("title").is_none());
        assert_eq!(schema["required"], json!(["query"]));
        assert!(schema["properties"]["num_results"].is_object());
    }

    #[test]
    fn test_validate_args() {
        let schema = parameters_schema_for::<Args>();
        assert!(validate_args(&schema, &json!({"query": "rust"})).is_ok());
        assert!(validate_args(&schema, &json!({"query": "rust", "lang": null})).is_ok());
        assert!(validate_args(&schema, &json!({"query": "rust", "num_results": 5})).is_ok());

        let missing = validate_args(&schema, &json!({})).unwrap_err();
        assert!(missing.contains("query"));
        assert!(validate_args(&schema, &json!({"query": 42})).is_err());
        assert!(validate_args(&schema, &json!({"query": "x", "num_results": "3"})).is_err());
        assert!(validate_args(&schema, &json!({"query": "x", "num_results": -1})).is_err());
        assert!(validate_args(&schema, &json!({"query": "x", "extra": 1})).is_err());
        assert!(validate_args(&schema, &json!("{broken")).is_err());
        assert!(validate_args(&schema, &json!([1, 2])).is_err());
    }
}
