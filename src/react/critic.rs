//! Critic：对一轮迭代的步骤结果做反思
//!
//! 把目标、每步成败与观察内容交给 LLM，要求返回 {goalAchieved, issues, nextActions, shouldContinue}。
//! LLM 出错或输出无法解析时给出保守反思（未达成、停止），问题写入 issues。

use std::sync::Arc;

use serde_json::Value;

use crate::core::Reflection;
use crate::memory::{Message, TokenMeter};
use crate::react::planner::{ask, extract_json, field, json_value_to_string};
use crate::react::{PolicyContext, StepResult};

/// 提示词中单条观察的最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 500;

fn preview(text: &str) -> String {
    if text.chars().count() > OBSERVATION_PREVIEW_CHARS {
        format!("{}...", text.chars().take(OBSERVATION_PREVIEW_CHARS).collect::<String>())
    } else {
        text.to_string()
    }
}

fn string_list(json: &Value, camel: &str, snake: &str) -> Vec<String> {
    field(json, camel, snake)
        .and_then(|v| v.as_array())
        .map(|items| items.iter().filter_map(json_value_to_string).collect())
        .unwrap_or_default()
}

/// 解析反思 JSON；goalAchieved 必须存在，shouldContinue 缺省为 false
pub fn parse_reflection(output: &str) -> Result<Reflection, String> {
    let json_str = extract_json(output).ok_or("no JSON object in reflection output")?;
    let json: Value =
        serde_json::from_str(json_str).map_err(|e| format!("invalid reflection JSON: {e}"))?;
    let goal_achieved = field(&json, "goalAchieved", "goal_achieved")
        .and_then(|v| v.as_bool())
        .ok_or("reflection is missing goalAchieved")?;
    let should_continue = field(&json, "shouldContinue", "should_continue")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    Ok(Reflection {
        goal_achieved,
        issues: string_list(&json, "issues", "issues"),
        next_actions: string_list(&json, "nextActions", "next_actions"),
        should_continue,
        timestamp: chrono::Utc::now(),
    })
}

pub struct Critic {
    llm: Arc<dyn crate::llm::LlmClient>,
    meter: Arc<TokenMeter>,
}

impl Critic {
    pub fn new(llm: Arc<dyn crate::llm::LlmClient>, meter: Arc<TokenMeter>) -> Self {
        Self { llm, meter }
    }

    /// 相同输入得到相同提示词
    pub fn build_prompt(&self, results: &[StepResult], goal: &str, ctx: &PolicyContext) -> Vec<Message> {
        let mut outcomes = String::new();
        for result in results {
            let status = if result.success { "succeeded" } else { "failed" };
            outcomes.push_str(&format!("- Step {}: {status}\n", result.step_number));
            for obs in &result.observations {
                let mark = if obs.success { "ok" } else { "error" };
                outcomes.push_str(&format!("  - [{mark}] {}\n", preview(&obs.content)));
            }
        }
        if outcomes.is_empty() {
            outcomes.push_str("(no steps were executed)\n");
        }

        let mut messages = vec![Message::system(
            "You review the progress of an autonomous agent and decide whether its goal is met.",
        )];
        messages.extend(ctx.history.iter().cloned());
        messages.push(Message::user(format!(
            "## Goal\n{goal}\n\n\
             ## Step outcomes (iteration {})\n{outcomes}\n\
             ## Output\n\
             Reply with a single ```json block of the form\n\
             {{\"goalAchieved\": true|false, \"issues\": [\"...\"], \
             \"nextActions\": [\"...\"], \"shouldContinue\": true|false}}",
            ctx.iteration + 1
        )));
        messages
    }

    pub async fn reflect(&self, results: &[StepResult], goal: &str, ctx: &PolicyContext) -> Reflection {
        let messages = self.build_prompt(results, goal, ctx);
        let response = match ask(self.llm.as_ref(), &self.meter, &messages).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "critic LLM call failed, stopping conservatively");
                return Reflection::conservative(format!("reflection failed: {e}"));
            }
        };
        match parse_reflection(&response) {
            Ok(reflection) => {
                tracing::info!(
                    goal_achieved = reflection.goal_achieved,
                    should_continue = reflection.should_continue,
                    "reflection"
                );
                reflection
            }
            Err(e) => {
                tracing::warn!(error = %e, "reflection parse failed, stopping conservatively");
                Reflection::conservative(format!("reflection unparseable: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Observation;
    use crate::llm::MockLlmClient;

    fn results() -> Vec<StepResult> {
        vec![StepResult {
            step_number: 1,
            success: false,
            observations: vec![Observation::new("Tool not found: 'x'", false)],
            tool_results: vec![],
        }]
    }

    #[test]
    fn test_parse_reflection_variants() {
        let r = parse_reflection(
            "```json\n{\"goalAchieved\": false, \"issues\": [\"missing file\"], \"nextActions\": [\"retry\"], \"shouldContinue\": true}\n```",
        )
        .unwrap();
        assert!(!r.goal_achieved && r.should_continue);
        assert_eq!(r.issues, vec!["missing file"]);
        assert_eq!(r.next_actions, vec!["retry"]);

        let r = parse_reflection("{\"goal_achieved\": true}").unwrap();
        assert!(r.goal_achieved && !r.should_continue);

        assert!(parse_reflection("{\"shouldContinue\": true}").is_err());
        assert!(parse_reflection("looks fine to me").is_err());
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let critic = Critic::new(Arc::new(MockLlmClient::new()), Arc::new(TokenMeter::default()));
        let ctx = PolicyContext::default();
        let a = critic.build_prompt(&results(), "goal", &ctx);
        let b = critic.build_prompt(&results(), "goal", &ctx);
        assert_eq!(a, b);
        assert!(a.last().unwrap().content.contains("[error] Tool not found"));
    }

    #[tokio::test]
    async fn test_unparseable_reflection_is_conservative() {
        let llm = MockLlmClient::with_responses(["sure, all good"]);
        let critic = Critic::new(Arc::new(llm), Arc::new(TokenMeter::default()));
        let r = critic.reflect(&results(), "goal", &PolicyContext::default()).await;
        assert!(!r.goal_achieved);
        assert!(!r.should_continue);
        assert!(r.issues[0].contains("unparseable"));
    }

    #[tokio::test]
    async fn test_provider_error_is_conservative() {
        let llm = MockLlmClient::new();
        llm.push_error("connection reset");
        let critic = Critic::new(Arc::new(llm), Arc::new(TokenMeter::default()));
        let r = critic.reflect(&results(), "goal", &PolicyContext::default()).await;
        assert!(r.ends_loop());
        assert!(r.issues[0].contains("connection reset"));
    }
}
