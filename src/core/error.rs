//! Agent 错误类型
//!
//! 工具相关错误只用于生成 ToolResult 的错误文本，不会从 ToolExecutor 抛出；
//! 主循环内的任何错误都在 Agent 顶层被捕获一次，转为失败的 AgentResult。

use thiserror::Error;

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    /// 未调用 initialize() 注入 ReasoningPolicy 与 ToolExecutor
    #[error("Agent not initialized: reasoning policy and tool executor are required")]
    NotInitialized,

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// 调用方通过 abort handle 中止
    #[error("Agent aborted")]
    Aborted,

    #[error("Agent execution failed: {0}")]
    Execution(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool validation failed: {0}")]
    ToolValidation(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Path escape attempt: {0}")]
    PathEscape(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("No checkpoint for thread: {0}")]
    NoCheckpoint(String),
}
