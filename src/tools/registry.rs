//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / schema / validate / timeout / execute），
//! 由 ToolRegistry 按名注册与查找；ToolExecutor 在调用前校验参数并施加超时。
//! TypedTool 以强类型 Input 描述参数：schema 由 schemars 生成，校验即反序列化。

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::tools::schema::{empty_object_schema, schema_for_type, validate_against_schema};
use crate::tools::SafeFs;

/// 每次工具调用的上下文：所属 Agent / 线程、沙箱文件系统句柄、取消信号
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub agent_id: String,
    pub thread_id: Option<String>,
    pub fs: Option<Arc<SafeFs>>,
    /// 超时或 Agent 中止时被取消；长任务应在 await 点检查
    pub cancel: CancellationToken,
    pub metadata: Value,
}

impl ToolContext {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            thread_id: None,
            fs: None,
            cancel: CancellationToken::new(),
            metadata: Value::Null,
        }
    }

    pub fn with_fs(mut self, fs: Arc<SafeFs>) -> Self {
        self.fs = Some(fs);
        self
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    /// 取文件系统句柄；工具需要而上下文未提供时返回错误文本
    pub fn require_fs(&self) -> Result<&SafeFs, String> {
        self.fs
            .as_deref()
            .ok_or_else(|| "no filesystem handle in tool context".to_string())
    }
}

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、可选自定义校验与超时、异步执行
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（计划步骤中的 tools 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认是任意对象
    fn parameters_schema(&self) -> Value {
        empty_object_schema()
    }

    /// schema 层校验；默认按 parameters_schema 做完整 JSON Schema 校验
    fn check_arguments(&self, args: &Value) -> Result<(), String> {
        validate_against_schema(&self.parameters_schema(), args)
    }

    /// 自定义校验，独立于 schema 校验
    fn validate(&self, _args: &Value) -> bool {
        true
    }

    /// 工具自身的超时，优先于执行器默认值
    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, String>;
}

/// 强类型工具：参数先反序列化为 Input 再执行
#[async_trait]
pub trait TypedTool: Send + Sync + 'static {
    type Input: DeserializeOwned + JsonSchema + Send + 'static;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn validate(&self, _input: &Self::Input) -> bool {
        true
    }

    fn timeout(&self) -> Option<Duration> {
        None
    }

    async fn run(&self, input: Self::Input, ctx: &ToolContext) -> Result<Value, String>;
}

/// 把 TypedTool 适配为 Tool
pub struct TypedToolAdapter<T: TypedTool> {
    inner: T,
    schema: Value,
    _input: PhantomData<fn() -> T::Input>,
}

impl<T: TypedTool> TypedToolAdapter<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            schema: schema_for_type::<T::Input>(),
            _input: PhantomData,
        }
    }

    fn parse(args: &Value) -> Result<T::Input, String> {
        serde_json::from_value(args.clone())
            .map_err(|e| format!("schema validation failed: {e}"))
    }
}

#[async_trait]
impl<T: TypedTool> Tool for TypedToolAdapter<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    fn check_arguments(&self, args: &Value) -> Result<(), String> {
        Self::parse(args).map(|_| ())
    }

    fn validate(&self, args: &Value) -> bool {
        Self::parse(args)
            .map(|input| self.inner.validate(&input))
            .unwrap_or(false)
    }

    fn timeout(&self) -> Option<Duration> {
        self.inner.timeout()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, String> {
        let input = Self::parse(&args)?;
        self.inner.run(input, ctx).await
    }
}

/// 工具注册表：按名称存储 Arc<dyn Tool>；重复注册时告警并覆盖（后注册者生效）
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_typed<T: TypedTool>(&mut self, tool: T) {
        self.register(TypedToolAdapter::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "tool re-registered, previous definition replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// 已注册工具名（排序，便于提示与错误信息稳定）
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 工具 schema JSON（name / description / parameters），拼入规划提示词
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = self
            .tool_names()
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                serde_json::json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "parameters": tool.parameters_schema()
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::EchoTool;

    struct Named(&'static str, &'static str);

    #[async_trait]
    impl Tool for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            self.1
        }

        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, String> {
            Ok(Value::String(self.1.to_string()))
        }
    }

    #[test]
    fn test_reregister_last_wins() {
        let mut registry = ToolRegistry::new();
        registry.register(Named("t", "first"));
        registry.register(Named("t", "second"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("t").unwrap().description(), "second");
    }

    #[test]
    fn test_tool_names_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(Named("zeta", ""));
        registry.register(Named("alpha", ""));
        assert_eq!(registry.tool_names(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_typed_tool_schema_and_check() {
        let mut registry = ToolRegistry::new();
        registry.register_typed(EchoTool);
        let echo = registry.get("echo").unwrap();
        assert!(echo.parameters_schema()["properties"]["text"].is_object());
        assert!(echo.check_arguments(&serde_json::json!({"text": "hi"})).is_ok());
        assert!(echo.check_arguments(&serde_json::json!({"text": 3})).is_err());
        assert!(registry.to_schema_json().contains("\"echo\""));
    }
}
