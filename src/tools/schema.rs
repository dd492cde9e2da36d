//! 工具参数 JSON Schema 生成（schemars 自动生成）
//!
//! TypedTool 的参数 schema 由 Input 类型推导，注入规划提示词，减少 LLM 参数格式错误。

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// 返回类型 T 的 JSON Schema
pub fn schema_for_type<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    serde_json::to_value(&schema).unwrap_or_else(|_| empty_object_schema())
}

/// 无参数或参数格式不限
pub fn empty_object_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {},
        "required": []
    })
}

/// 按 JSON Schema 校验参数（用于非 TypedTool）；schema 本身非法时同样视为校验失败
pub fn validate_against_schema(schema: &Value, args: &Value) -> Result<(), String> {
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| format!("schema validation failed: invalid schema: {e}"))?;
    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| e.to_string())
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(format!("schema validation failed: {}", errors.join("; ")))
    }
}
