//! 错误恢复策略
//!
//! classify 按固定优先级把错误文本映射为类别；handle_error 按类别阈值决定重试或上报。
//! 不接入 Agent 主循环，由调用方显式使用（或通过 retry_with_recovery 包装一次可重试操作）。

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;

use serde::{Deserialize, Serialize};

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Timeout,
    Syntax,
    ToolExecution,
    Logic,
    Unknown,
}

/// 匹配顺序即优先级，先命中者胜出
const CLASSIFIERS: &[(ErrorCategory, &[&str])] = &[
    (ErrorCategory::Validation, &["validation", "schema", "invalid argument"]),
    (ErrorCategory::Timeout, &["timeout", "timed out"]),
    (ErrorCategory::Syntax, &["syntax", "unexpected token", "parse error"]),
    (ErrorCategory::ToolExecution, &["tool", "execute", "execution"]),
    (ErrorCategory::Logic, &["logic", "assertion", "incorrect"]),
];

/// 大小写不敏感的子串匹配
pub fn classify(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    CLASSIFIERS
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
        .map(|(category, _)| *category)
        .unwrap_or(ErrorCategory::Unknown)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryStrategy {
    Retry,
    Skip,
    Escalate,
    Alternative,
}

/// 单次失败的恢复建议
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecovery {
    pub strategy: RecoveryStrategy,
    pub correction: Option<String>,
    pub alternative_tool: Option<String>,
    pub reason: String,
}

impl ErrorRecovery {
    fn escalate(reason: String) -> Self {
        Self {
            strategy: RecoveryStrategy::Escalate,
            correction: None,
            alternative_tool: None,
            reason,
        }
    }
}

/// 调用方提供的失败上下文；attempt 从 0 开始
#[derive(Debug, Clone, Default)]
pub struct RecoveryContext {
    pub attempt: u32,
    pub tool_name: Option<String>,
}

/// 各类别允许的重试次数上限（attempt 达到阈值即上报）
#[derive(Debug, Clone, Copy)]
pub struct RecoveryThresholds {
    pub validation: u32,
    pub timeout: u32,
    pub syntax: u32,
    pub tool_execution: u32,
    pub logic: u32,
}

impl Default for RecoveryThresholds {
    fn default() -> Self {
        Self {
            validation: 2,
            timeout: 2,
            syntax: 2,
            tool_execution: 3,
            logic: 2,
        }
    }
}

impl RecoveryThresholds {
    /// Unknown 没有阈值：永远直接上报
    pub fn for_category(&self, category: ErrorCategory) -> Option<u32> {
        match category {
            ErrorCategory::Validation => Some(self.validation),
            ErrorCategory::Timeout => Some(self.timeout),
            ErrorCategory::Syntax => Some(self.syntax),
            ErrorCategory::ToolExecution => Some(self.tool_execution),
            ErrorCategory::Logic => Some(self.logic),
            ErrorCategory::Unknown => None,
        }
    }
}

/// 错误恢复策略：分类 + 阈值 + 可选的备用工具映射
#[derive(Debug, Clone, Default)]
pub struct ErrorRecoveryPolicy {
    thresholds: RecoveryThresholds,
    alternatives: HashMap<String, String>,
}

impl ErrorRecoveryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thresholds(mut self, thresholds: RecoveryThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// 工具执行失败后可改用的备用工具
    pub fn with_alternative(mut self, tool: impl Into<String>, alternative: impl Into<String>) -> Self {
        self.alternatives.insert(tool.into(), alternative.into());
        self
    }

    pub fn classify(&self, message: &str) -> ErrorCategory {
        classify(message)
    }

    pub fn handle_error(&self, message: &str, ctx: &RecoveryContext) -> ErrorRecovery {
        let category = classify(message);
        let Some(threshold) = self.thresholds.for_category(category) else {
            return ErrorRecovery::escalate(format!("Unrecognized error, no automatic recovery: {message}"));
        };
        if ctx.attempt >= threshold {
            return ErrorRecovery::escalate(format!(
                "{category:?} error persisted after {} attempts: {message}",
                ctx.attempt
            ));
        }

        let alternative_tool = match (category, ctx.tool_name.as_deref()) {
            (ErrorCategory::ToolExecution, Some(tool)) if ctx.attempt >= 1 => {
                self.alternatives.get(tool).cloned()
            }
            _ => None,
        };
        let strategy = if alternative_tool.is_some() {
            RecoveryStrategy::Alternative
        } else {
            RecoveryStrategy::Retry
        };

        ErrorRecovery {
            strategy,
            correction: Some(correction_for(category).to_string()),
            alternative_tool,
            reason: format!(
                "{category:?} error, attempt {} of {threshold}: {message}",
                ctx.attempt + 1
            ),
        }
    }
}

fn correction_for(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::Validation => "Check the arguments against the tool's parameter schema.",
        ErrorCategory::Timeout => "Retry with a smaller unit of work or a longer deadline.",
        ErrorCategory::Syntax => "Fix the malformed output; emit exactly one valid JSON object.",
        ErrorCategory::ToolExecution => "Inspect the tool error and adjust the arguments before retrying.",
        ErrorCategory::Logic => "Re-check the reasoning that produced this result.",
        ErrorCategory::Unknown => "",
    }
}

/// 交给被重试操作的提示：第几次尝试、修正建议、备用工具
#[derive(Debug, Clone, Default)]
pub struct RetryAttempt {
    pub attempt: u32,
    pub correction: Option<String>,
    pub alternative_tool: Option<String>,
}

#[derive(Debug)]
pub enum RecoveryOutcome<T, E> {
    Recovered { value: T, attempts: u32 },
    Skipped { error: E, recovery: ErrorRecovery },
    Escalated { error: E, recovery: ErrorRecovery },
}

/// 在 policy 的阈值内重试 op；Escalate / Skip 立即结束这条失败链
pub async fn retry_with_recovery<T, E, F, Fut>(
    policy: &ErrorRecoveryPolicy,
    tool_name: Option<&str>,
    mut op: F,
) -> RecoveryOutcome<T, E>
where
    E: Display,
    F: FnMut(RetryAttempt) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut next = RetryAttempt::default();
    loop {
        let attempt = next.attempt;
        let error = match op(next).await {
            Ok(value) => {
                return RecoveryOutcome::Recovered {
                    value,
                    attempts: attempt + 1,
                }
            }
            Err(e) => e,
        };

        let ctx = RecoveryContext {
            attempt,
            tool_name: tool_name.map(String::from),
        };
        let recovery = policy.handle_error(&error.to_string(), &ctx);
        match recovery.strategy {
            RecoveryStrategy::Escalate => {
                tracing::warn!(attempt, reason = %recovery.reason, "recovery escalated");
                return RecoveryOutcome::Escalated { error, recovery };
            }
            RecoveryStrategy::Skip => return RecoveryOutcome::Skipped { error, recovery },
            RecoveryStrategy::Retry | RecoveryStrategy::Alternative => {
                tracing::info!(attempt, reason = %recovery.reason, "recovery retry");
                next = RetryAttempt {
                    attempt: attempt + 1,
                    correction: recovery.correction,
                    alternative_tool: recovery.alternative_tool,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_examples() {
        assert_eq!(classify("schema validation failed"), ErrorCategory::Validation);
        assert_eq!(classify("Request Timed Out"), ErrorCategory::Timeout);
        assert_eq!(classify("unexpected token }"), ErrorCategory::Syntax);
        assert_eq!(classify("failed to execute command"), ErrorCategory::ToolExecution);
        assert_eq!(classify("assertion left == right"), ErrorCategory::Logic);
        assert_eq!(classify("the moon is made of cheese"), ErrorCategory::Unknown);
    }

    #[test]
    fn test_classify_priority_first_match_wins() {
        // 同时包含 timeout 与 tool：timeout 优先
        assert_eq!(classify("tool call timeout"), ErrorCategory::Timeout);
        assert_eq!(classify("schema parse error"), ErrorCategory::Validation);
    }

    #[test]
    fn test_unknown_escalates_immediately() {
        let policy = ErrorRecoveryPolicy::new();
        let r = policy.handle_error("something odd", &RecoveryContext::default());
        assert_eq!(r.strategy, RecoveryStrategy::Escalate);
    }

    #[test]
    fn test_thresholds_per_category() {
        let policy = ErrorRecoveryPolicy::new();
        let at = |attempt| RecoveryContext { attempt, tool_name: None };

        assert_eq!(policy.handle_error("request timed out", &at(1)).strategy, RecoveryStrategy::Retry);
        assert_eq!(policy.handle_error("request timed out", &at(2)).strategy, RecoveryStrategy::Escalate);

        assert_eq!(policy.handle_error("tool execution failed", &at(2)).strategy, RecoveryStrategy::Retry);
        assert_eq!(policy.handle_error("tool execution failed", &at(3)).strategy, RecoveryStrategy::Escalate);
    }

    #[test]
    fn test_retry_carries_correction() {
        let policy = ErrorRecoveryPolicy::new();
        let r = policy.handle_error("schema validation failed", &RecoveryContext::default());
        assert_eq!(r.strategy, RecoveryStrategy::Retry);
        assert!(r.correction.unwrap().contains("schema"));
    }

    #[test]
    fn test_alternative_tool_after_first_failure() {
        let policy = ErrorRecoveryPolicy::new().with_alternative("fetch", "fetch_cached");
        let ctx = RecoveryContext {
            attempt: 1,
            tool_name: Some("fetch".into()),
        };
        let r = policy.handle_error("tool execution failed", &ctx);
        assert_eq!(r.strategy, RecoveryStrategy::Alternative);
        assert_eq!(r.alternative_tool.as_deref(), Some("fetch_cached"));
    }

    #[tokio::test]
    async fn test_retry_with_recovery_recovers() {
        let policy = ErrorRecoveryPolicy::new();
        let outcome = retry_with_recovery(&policy, None, |a| async move {
            if a.attempt < 1 {
                Err("request timed out".to_string())
            } else {
                Ok(a.attempt)
            }
        })
        .await;
        assert!(matches!(outcome, RecoveryOutcome::Recovered { value: 1, attempts: 2 }));
    }

    #[tokio::test]
    async fn test_retry_with_recovery_is_bounded() {
        let policy = ErrorRecoveryPolicy::new();
        let mut calls = 0;
        let outcome: RecoveryOutcome<(), String> = retry_with_recovery(&policy, None, |_| {
            calls += 1;
            async { Err("schema validation failed".to_string()) }
        })
        .await;
        assert!(matches!(outcome, RecoveryOutcome::Escalated { .. }));
        assert_eq!(calls, 3);
    }
}
