//! Mock LLM 客户端（用于测试与离线运行，无需 API）
//!
//! 有脚本时按顺序回放预设回复；脚本耗尽后按提示词类型给出默认回复：
//! 规划提示词 → 单步 echo 计划，反思提示词 → 目标已达成。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::{LlmClient, TokenStream};
use crate::memory::{Message, Role};

/// 流式输出时每段字符数
const CHUNK_CHARS: usize = 16;

#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<String, String>>>,
    calls: AtomicUsize,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 依次回放的回复
    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(responses.into_iter().map(|r| Ok(r.into())).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    /// 追加一次失败回复
    pub fn push_error(&self, error: impl Into<String>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Err(error.into()));
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_scripted(&self) -> Option<Result<String, String>> {
        self.script.lock().ok().and_then(|mut s| s.pop_front())
    }
}

fn default_reply(messages: &[Message]) -> String {
    let last_user = messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or("(no input)");

    if last_user.contains("goalAchieved") {
        return "```json\n{\"goalAchieved\": true, \"issues\": [], \"nextActions\": [], \"shouldContinue\": false}\n```"
            .to_string();
    }

    let task = last_user
        .lines()
        .skip_while(|l| !l.starts_with("## Task"))
        .nth(1)
        .unwrap_or(last_user);
    let plan = serde_json::json!({
        "steps": [{
            "number": 1,
            "description": format!("Echo the task: {task}"),
            "tools": [{"name": "echo", "arguments": {"text": format!("Echo from Mock: {task}")}}],
            "dependencies": [],
            "estimatedComplexity": "low",
            "expectedOutcome": "The task text is echoed back"
        }],
        "estimatedComplexity": "low",
        "estimatedTokens": 200
    });
    format!("```json\n{plan}\n```")
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.next_scripted()
            .unwrap_or_else(|| Ok(default_reply(messages)))
    }

    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, String> {
        let content = self.complete(messages).await?;
        let chars: Vec<char> = content.chars().collect();
        let chunks: Vec<Result<String, String>> = chars
            .chunks(CHUNK_CHARS)
            .map(|c| Ok(c.iter().collect()))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::complete_collected;

    #[tokio::test]
    async fn test_scripted_then_default() {
        let llm = MockLlmClient::with_responses(["first reply that is longer than one chunk"]);
        let first = complete_collected(&llm, &[Message::user("hi")]).await.unwrap();
        assert_eq!(first, "first reply that is longer than one chunk");

        let second = complete_collected(&llm, &[Message::user("## Task\nsay hi")]).await.unwrap();
        assert!(second.contains("Echo from Mock: say hi"));
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_scripted_error() {
        let llm = MockLlmClient::new();
        llm.push_error("rate limited");
        assert_eq!(llm.complete(&[]).await.unwrap_err(), "rate limited");
    }
}
