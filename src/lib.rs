//! Drone - Rust 智能体执行内核
//!
//! 模块划分：
//! - **agent**: 计划 / 执行 / 反思状态机、事件流、检查点恢复
//! - **checkpoint**: AgentState 快照存储（内存 / SQLite / 降级 no-op）
//! - **config**: 应用配置加载（TOML + 环境变量）与 AgentConfig 校验
//! - **core**: 错误、状态、错误分类与恢复、工具并发调度、Agent 构建器
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 消息、token 估算与预算、上下文窗口
//! - **observability**: tracing 初始化
//! - **react**: 推理策略（Plan-Execute：Planner + Critic）、事件与钩子
//! - **tools**: Tool / TypedTool、注册表、执行器、沙箱文件系统工具

pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use agent::{Agent, AgentResult, TaskContext};
pub use config::{AgentConfig, AppConfig, ReasoningPattern};
pub use core::{AgentBuilder, AgentError};
