//! 推理策略抽象
//!
//! Agent 只依赖 ReasoningPolicy：生成计划、执行步骤、反思、判断是否继续。
//! 目前实现 Plan-Execute（PlanExecutePolicy）；ReAct / Tree-of-Thought 可作为新实现接入。

use async_trait::async_trait;

use crate::core::{AgentError, AgentState, Observation, Plan, PlanStep, Reflection};
use crate::memory::Message;
use crate::react::EventBus;
use crate::tools::{ToolContext, ToolExecutor, ToolResult};

/// 规划与反思时可见的上下文
#[derive(Debug, Clone, Default)]
pub struct PolicyContext {
    pub task: String,
    /// ContextWindow 中的历史（未启用记忆时为空）
    pub history: Vec<Message>,
    pub tool_names: Vec<String>,
    /// 已注册工具的 schema JSON，拼入规划提示词
    pub tool_schema: String,
    pub thread_id: Option<String>,
    pub iteration: u32,
}

/// 执行单个步骤所需的句柄
pub struct StepContext<'a> {
    pub executor: &'a ToolExecutor,
    pub events: &'a EventBus,
    pub tool_context: ToolContext,
    pub history: &'a [Message],
    pub iteration: u32,
}

/// 单个步骤的执行结果
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub step_number: usize,
    pub success: bool,
    pub observations: Vec<Observation>,
    pub tool_results: Vec<ToolResult>,
}

impl StepResult {
    /// 首个失败观察的内容
    pub fn first_error(&self) -> Option<&str> {
        self.observations
            .iter()
            .find(|o| !o.success)
            .map(|o| o.content.as_str())
    }
}

#[async_trait]
pub trait ReasoningPolicy: Send + Sync {
    async fn generate_plan(&self, task: &str, ctx: &PolicyContext) -> Result<Plan, AgentError>;

    async fn execute_step(
        &self,
        step: &PlanStep,
        ctx: &StepContext<'_>,
    ) -> Result<StepResult, AgentError>;

    async fn reflect(
        &self,
        results: &[StepResult],
        goal: &str,
        ctx: &PolicyContext,
    ) -> Result<Reflection, AgentError>;

    fn should_continue(&self, state: &AgentState) -> bool;

    /// 累计消耗的 token（估算）
    fn token_usage(&self) -> u64 {
        0
    }
}
