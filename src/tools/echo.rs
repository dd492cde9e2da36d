//! Echo 工具（测试与离线演示用）

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::{ToolContext, TypedTool};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EchoArgs {
    /// 需要回显的文本
    pub text: String,
}

/// Echo 工具：回显文本
pub struct EchoTool;

#[async_trait]
impl TypedTool for EchoTool {
    type Input = EchoArgs;

    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo text back. Args: {\"text\": \"message\"}"
    }

    async fn run(&self, input: EchoArgs, _ctx: &ToolContext) -> Result<Value, String> {
        Ok(Value::String(input.text))
    }
}
