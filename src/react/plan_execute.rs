//! Plan-Execute 策略
//!
//! 计划生成一次；每个步骤按列表顺序调用其工具，每次调用产生一条 Observation；
//! 一轮步骤结束后由 Critic 反思。启用自我修正时，失败的工具调用按 ErrorRecoveryPolicy 重试。

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::AgentConfig;
use crate::core::{
    retry_with_recovery, AgentError, AgentState, ErrorRecoveryPolicy, Observation, Plan, PlanStep,
    RecoveryOutcome, Reflection,
};
use crate::llm::LlmClient;
use crate::memory::{TokenBudget, TokenMeter};
use crate::react::{
    Critic, Planner, PolicyContext, ReasoningPolicy, StepContext, StepResult, DEFAULT_SYSTEM_PROMPT,
};
use crate::tools::{ToolCall, ToolResult};

pub struct PlanExecutePolicy {
    planner: Planner,
    critic: Critic,
    meter: Arc<TokenMeter>,
    budget: TokenBudget,
    recovery: Option<ErrorRecoveryPolicy>,
}

impl PlanExecutePolicy {
    pub fn new(llm: Arc<dyn LlmClient>, config: &AgentConfig) -> Self {
        Self::with_meter(llm, config, Arc::new(TokenMeter::default()))
    }

    /// 使用外部 meter（例如自定义估算比例）
    pub fn with_meter(llm: Arc<dyn LlmClient>, config: &AgentConfig, meter: Arc<TokenMeter>) -> Self {
        let system_prompt = config
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        Self {
            planner: Planner::new(llm.clone(), system_prompt, meter.clone()),
            critic: Critic::new(llm, meter.clone()),
            meter,
            budget: TokenBudget::new(config.token_budget),
            recovery: config
                .enable_self_correction
                .then(ErrorRecoveryPolicy::new),
        }
    }

    /// 替换（或启用）自我修正所用的恢复策略
    pub fn with_recovery_policy(mut self, policy: ErrorRecoveryPolicy) -> Self {
        self.recovery = Some(policy);
        self
    }

    pub fn self_correction_enabled(&self) -> bool {
        self.recovery.is_some()
    }

    async fn call_tool(&self, ctx: &StepContext<'_>, name: &str, arguments: Value) -> ToolResult {
        let call = ToolCall::new(name, arguments);
        ctx.events.tool_call(&call);
        ctx.executor.execute_call(call, &ctx.tool_context).await
    }

    async fn call_with_recovery(&self, ctx: &StepContext<'_>, name: &str, arguments: &Value) -> Attempt {
        let Some(policy) = &self.recovery else {
            let result = self.call_tool(ctx, name, arguments.clone()).await;
            return Attempt {
                tool: name.to_string(),
                result,
            };
        };
        let outcome = retry_with_recovery(policy, Some(name), |hint| {
            let tool = hint.alternative_tool.unwrap_or_else(|| name.to_string());
            let arguments = arguments.clone();
            async move {
                let result = self.call_tool(ctx, &tool, arguments).await;
                let attempt = Attempt { tool, result };
                if attempt.result.success {
                    Ok(attempt)
                } else {
                    Err(attempt)
                }
            }
        })
        .await;
        match outcome {
            RecoveryOutcome::Recovered { value, .. } => value,
            RecoveryOutcome::Skipped { error, .. } | RecoveryOutcome::Escalated { error, .. } => error,
        }
    }
}

/// 一次（可能换用备用工具的）调用结果
struct Attempt {
    tool: String,
    result: ToolResult,
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.result)
    }
}

fn observation_for(step: &PlanStep, tool: &str, result: &ToolResult) -> Observation {
    let content = if result.success {
        result.output_text()
    } else {
        result.error.clone().unwrap_or_else(|| "tool failed".to_string())
    };
    let mut obs = Observation::new(content, result.success)
        .with_metadata("step", step.number)
        .with_metadata("tool", tool)
        .with_metadata("toolCallId", result.tool_call_id.as_str())
        .with_metadata("durationMs", result.duration_ms);
    if let Some(artifacts) = result.output.get("artifacts").filter(|a| a.is_array()) {
        obs = obs.with_metadata("artifacts", artifacts.clone());
    }
    obs
}

#[async_trait]
impl ReasoningPolicy for PlanExecutePolicy {
    async fn generate_plan(&self, task: &str, ctx: &PolicyContext) -> Result<Plan, AgentError> {
        Ok(self.planner.plan(task, ctx).await)
    }

    async fn execute_step(
        &self,
        step: &PlanStep,
        ctx: &StepContext<'_>,
    ) -> Result<StepResult, AgentError> {
        if step.tools.is_empty() {
            let obs = Observation::new(format!("Step {}: {}", step.number, step.description), true)
                .with_metadata("step", step.number);
            return Ok(StepResult {
                step_number: step.number,
                success: true,
                observations: vec![obs],
                tool_results: Vec::new(),
            });
        }

        let mut observations = Vec::with_capacity(step.tools.len());
        let mut tool_results = Vec::with_capacity(step.tools.len());
        for planned in &step.tools {
            let attempt = self
                .call_with_recovery(ctx, &planned.name, &planned.arguments)
                .await;
            observations.push(observation_for(step, &attempt.tool, &attempt.result));
            tool_results.push(attempt.result);
        }
        Ok(StepResult {
            step_number: step.number,
            success: tool_results.iter().all(|r| r.success),
            observations,
            tool_results,
        })
    }

    async fn reflect(
        &self,
        results: &[StepResult],
        goal: &str,
        ctx: &PolicyContext,
    ) -> Result<Reflection, AgentError> {
        Ok(self.critic.reflect(results, goal, ctx).await)
    }

    fn should_continue(&self, state: &AgentState) -> bool {
        !state.status.is_terminal() && !self.budget.is_exhausted(state.tokens_used)
    }

    fn token_usage(&self) -> u64 {
        self.meter.total()
    }
}
