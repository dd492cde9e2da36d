//! Planner：生成多步计划
//!
//! 提示词 = system prompt + 历史 + 任务 / 可用工具 / 输出格式；LLM 的 token 流读完后，
//! 从 ```json 代码块（或首个 {...} 片段）中解析 {steps, estimatedComplexity, estimatedTokens}。
//! 缺失、格式错误或 steps 为空时退回单步计划（描述为原始任务），从不返回错误。

use std::sync::Arc;

use serde_json::Value;

use crate::core::{Plan, PlanStep, StepTool};
use crate::llm::{complete_collected, LlmClient};
use crate::memory::{Message, TokenMeter};
use crate::react::PolicyContext;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an autonomous agent. Break the task into a short \
sequence of concrete steps and use the available tools to carry them out.";

/// 从 LLM 输出中截取 JSON 文本：优先 ```json 代码块，其次首个 '{' 到最后一个 '}'
pub fn extract_json(output: &str) -> Option<&str> {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 字符串原样、数字转字符串；null 与空串视为缺失
pub(crate) fn json_value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// 同时接受 camelCase 与 snake_case 键
pub(crate) fn field<'a>(obj: &'a Value, camel: &str, snake: &str) -> Option<&'a Value> {
    obj.get(camel).or_else(|| obj.get(snake))
}

fn step_from_json(index: usize, json: &Value) -> PlanStep {
    let number = json
        .get("number")
        .and_then(|n| n.as_u64())
        .map(|n| n as usize)
        .unwrap_or(index + 1);
    let description = json
        .get("description")
        .and_then(json_value_to_string)
        .unwrap_or_else(|| format!("Step {number}"));

    let mut step = PlanStep::new(number, description);
    step.tools = match json.get("tools") {
        Some(Value::Array(tools)) => tools
            .iter()
            .filter_map(|t| serde_json::from_value::<StepTool>(t.clone()).ok())
            .filter(|t| !t.name.is_empty())
            .collect(),
        Some(single @ (Value::String(_) | Value::Object(_))) => {
            serde_json::from_value::<StepTool>(single.clone()).ok().into_iter().collect()
        }
        _ => Vec::new(),
    };
    step.dependencies = json
        .get("dependencies")
        .and_then(|d| d.as_array())
        .map(|deps| deps.iter().filter_map(|d| d.as_u64()).map(|d| d as usize).collect())
        .unwrap_or_default();
    step.estimated_complexity =
        field(json, "estimatedComplexity", "estimated_complexity").and_then(json_value_to_string);
    step.expected_outcome =
        field(json, "expectedOutcome", "expected_outcome").and_then(json_value_to_string);
    step
}

/// 宽松解析计划 JSON；steps 缺失或为空返回 None
pub fn plan_from_json(json: &Value) -> Option<Plan> {
    let steps = json.get("steps")?.as_array()?;
    if steps.is_empty() {
        return None;
    }
    let mut plan = Plan::new(
        steps
            .iter()
            .enumerate()
            .map(|(i, s)| step_from_json(i, s))
            .collect(),
    );
    plan.estimated_complexity =
        field(json, "estimatedComplexity", "estimated_complexity").and_then(json_value_to_string);
    plan.estimated_tokens = field(json, "estimatedTokens", "estimated_tokens").and_then(|t| t.as_u64());
    Some(plan)
}

/// 解析 LLM 输出为计划；失败返回原因，调用方决定兜底
pub fn parse_plan(output: &str) -> Result<Plan, String> {
    let json_str = extract_json(output).ok_or("no JSON object in planner output")?;
    let value: Value = serde_json::from_str(json_str).map_err(|e| format!("invalid plan JSON: {e}"))?;
    plan_from_json(&value).ok_or_else(|| "plan has no steps".to_string())
}

/// 调用 LLM 并把本次用量记入 meter（优先取客户端的真实用量增量）
pub(crate) async fn ask(
    llm: &dyn LlmClient,
    meter: &TokenMeter,
    messages: &[Message],
) -> Result<String, String> {
    let before = llm.token_usage().2;
    let response = complete_collected(llm, messages).await?;
    let delta = llm.token_usage().2.saturating_sub(before);
    meter.record(delta, messages, &response);
    Ok(response)
}

/// Planner：持有 LLM、system prompt 与共享的 token 计数
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
    meter: Arc<TokenMeter>,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>, meter: Arc<TokenMeter>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
            meter,
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn build_prompt(&self, task: &str, ctx: &PolicyContext) -> Vec<Message> {
        let mut messages = vec![Message::system(self.system_prompt.clone())];
        messages.extend(ctx.history.iter().cloned());

        let tools = if ctx.tool_names.is_empty() {
            "(none)".to_string()
        } else {
            format!("{}\n\n{}", ctx.tool_names.join(", "), ctx.tool_schema)
        };
        messages.push(Message::user(format!(
            "## Task\n{task}\n\n\
             ## Available tools\n{tools}\n\n\
             ## Output\n\
             Reply with a single ```json block of the form\n\
             {{\"steps\": [{{\"number\": 1, \"description\": \"...\", \
             \"tools\": [{{\"name\": \"<tool>\", \"arguments\": {{}}}}], \
             \"dependencies\": [], \"expectedOutcome\": \"...\"}}], \
             \"estimatedComplexity\": \"low|medium|high\", \"estimatedTokens\": 1000}}\n\
             Only use tools from the list above; a step may have no tools."
        )));
        messages
    }

    pub async fn plan(&self, task: &str, ctx: &PolicyContext) -> Plan {
        let messages = self.build_prompt(task, ctx);
        tracing::debug!(prompt = %messages.last().map(|m| m.content.as_str()).unwrap_or(""), "planning");

        let response = match ask(self.llm.as_ref(), &self.meter, &messages).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "planner LLM call failed, using single-step plan");
                return Plan::fallback(task);
            }
        };
        match parse_plan(&response) {
            Ok(plan) => {
                tracing::info!(steps = plan.steps.len(), "plan generated");
                plan
            }
            Err(e) => {
                tracing::warn!(error = %e, "plan parse failed, using single-step plan");
                Plan::fallback(task)
            }
        }
    }
}
