//! 工具执行器
//!
//! execute_tool 依次做：查找 → schema 校验 → 自定义校验 → 在截止时间内执行。
//! 任何失败都折叠为 success=false 的 ToolResult，执行器本身从不返回 Err；
//! 超时会取消该调用的 CancellationToken 并 abort 工具任务。每次调用输出结构化审计日志（JSON）。

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::timeout;

use crate::core::{AgentError, TaskScheduler};
use crate::tools::{Tool, ToolContext, ToolRegistry};

/// 一次工具调用请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            arguments,
        }
    }
}

/// 一次工具调用结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub success: bool,
    pub output: Value,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ToolResult {
    fn failure(tool_call_id: &str, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            tool_call_id: tool_call_id.to_string(),
            success: false,
            output: Value::Null,
            error: Some(error.into()),
            duration_ms,
        }
    }

    /// 输出的文本形式：字符串原样返回，其它 JSON 序列化
    pub fn output_text(&self) -> String {
        match &self.output {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for ToolResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(e) => write!(f, "{e}"),
            None => write!(f, "{}", self.output_text()),
        }
    }
}

/// 工具执行器：持有注册表、默认超时与并发调度器
pub struct ToolExecutor {
    registry: ToolRegistry,
    default_timeout: Duration,
    scheduler: TaskScheduler,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, default_timeout: Duration) -> Self {
        Self {
            registry,
            default_timeout,
            scheduler: TaskScheduler::default(),
        }
    }

    /// execute_tools 同时在途的调用上限
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.scheduler = TaskScheduler::new(max_concurrent);
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn max_concurrent(&self) -> usize {
        self.scheduler.max_concurrent()
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn execute_tool(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolResult {
        self.execute_call(ToolCall::new(name, args), ctx).await
    }

    /// 执行单个调用；从不返回 Err，失败体现在 ToolResult 中
    pub async fn execute_call(&self, call: ToolCall, ctx: &ToolContext) -> ToolResult {
        let start = Instant::now();
        let result = self.dispatch(&call, ctx).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(AgentError::ToolNotFound(_)) => "not_found",
            Err(AgentError::ToolValidation(_)) => "invalid",
            Err(AgentError::ToolTimeout(_)) => "timeout",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.name,
            "call_id": call.id,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview(&call.arguments),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(output) => ToolResult {
                tool_call_id: call.id,
                success: true,
                output,
                error: None,
                duration_ms,
            },
            Err(e) => ToolResult::failure(&call.id, e.to_string(), duration_ms),
        }
    }

    async fn dispatch(&self, call: &ToolCall, ctx: &ToolContext) -> Result<Value, AgentError> {
        let tool = self.registry.get(&call.name).ok_or_else(|| {
            AgentError::ToolNotFound(format!(
                "'{}'; available tools: [{}]",
                call.name,
                self.registry.tool_names().join(", ")
            ))
        })?;

        tool.check_arguments(&call.arguments)
            .map_err(|e| AgentError::ToolValidation(format!("{}: {e}", call.name)))?;
        if !tool.validate(&call.arguments) {
            return Err(AgentError::ToolValidation(format!(
                "{}: arguments rejected by tool validator",
                call.name
            )));
        }
        if ctx.cancel.is_cancelled() {
            return Err(AgentError::ToolExecutionFailed(format!(
                "{}: cancelled before start",
                call.name
            )));
        }

        let deadline = tool.timeout().unwrap_or(self.default_timeout);
        let cancel = ctx.cancel.child_token();
        let call_ctx = ToolContext {
            cancel: cancel.clone(),
            ..ctx.clone()
        };
        let args = call.arguments.clone();
        let mut handle = tokio::spawn(async move { tool.execute(args, &call_ctx).await });

        match timeout(deadline, &mut handle).await {
            Ok(Ok(Ok(output))) => Ok(output),
            Ok(Ok(Err(e))) => Err(AgentError::ToolExecutionFailed(format!("{}: {e}", call.name))),
            Ok(Err(join)) if join.is_panic() => Err(AgentError::ToolExecutionFailed(format!(
                "{}: tool panicked",
                call.name
            ))),
            Ok(Err(_)) => Err(AgentError::ToolExecutionFailed(format!(
                "{}: tool task cancelled",
                call.name
            ))),
            Err(_) => {
                cancel.cancel();
                handle.abort();
                Err(AgentError::ToolTimeout(format!(
                    "'{}' timeout after {}ms",
                    call.name,
                    deadline.as_millis()
                )))
            }
        }
    }

    /// 并发执行多个调用（全部结算语义）：单个失败不影响其它调用，结果与输入位置一一对应
    pub async fn execute_tools(&self, calls: Vec<ToolCall>, ctx: &ToolContext) -> Vec<ToolResult> {
        let futures = calls.into_iter().map(|call| async move {
            let _permit = match self.scheduler.acquire_tool().await {
                Ok(permit) => permit,
                Err(e) => {
                    return ToolResult::failure(&call.id, format!("{}: {e}", call.name), 0);
                }
            };
            self.execute_call(call, ctx).await
        });
        join_all(futures).await
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
