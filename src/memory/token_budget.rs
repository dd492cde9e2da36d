//! Token 估算与预算
//!
//! 估算只是近似：字符数 × 比例（默认 0.25，约 4 字符/token），用于软淘汰与预算判断，不做精确计费。

use std::sync::atomic::{AtomicU64, Ordering};

use crate::memory::Message;

/// 默认比例：约 4 字符一个 token
pub const DEFAULT_TOKEN_RATIO: f64 = 0.25;

/// Token 估算器（字符计数近似）
#[derive(Debug, Clone, Copy)]
pub struct TokenEstimator {
    ratio: f64,
}

impl TokenEstimator {
    pub fn new(ratio: f64) -> Self {
        let ratio = if ratio.is_finite() && ratio > 0.0 {
            ratio
        } else {
            DEFAULT_TOKEN_RATIO
        };
        Self { ratio }
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn estimate_chars(&self, chars: usize) -> usize {
        (chars as f64 * self.ratio).ceil() as usize
    }

    pub fn estimate(&self, text: &str) -> usize {
        self.estimate_chars(text.chars().count())
    }

    /// 按序列化后的消息字符数估算（role 与 JSON 结构也算在内）
    pub fn message_chars(message: &Message) -> usize {
        serde_json::to_string(message)
            .map(|s| s.chars().count())
            .unwrap_or_else(|_| message.content.chars().count())
    }

    pub fn estimate_messages(&self, messages: &[Message]) -> usize {
        self.estimate_chars(messages.iter().map(Self::message_chars).sum())
    }
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_RATIO)
    }
}

/// Token 预算：累计用量达到上限即视为耗尽（硬上限，与模型判断无关）
#[derive(Debug, Clone, Copy)]
pub struct TokenBudget {
    total_budget: u64,
}

impl TokenBudget {
    pub fn new(total_budget: u64) -> Self {
        Self { total_budget }
    }

    pub fn total_budget(&self) -> u64 {
        self.total_budget
    }

    pub fn is_exhausted(&self, used: u64) -> bool {
        used >= self.total_budget
    }

    pub fn remaining(&self, used: u64) -> u64 {
        self.total_budget.saturating_sub(used)
    }
}

/// 累计 token 计数：优先使用 LLM 返回的真实用量，否则按提示词 + 回复估算
#[derive(Debug, Default)]
pub struct TokenMeter {
    estimator: TokenEstimator,
    used: AtomicU64,
}

impl TokenMeter {
    pub fn new(estimator: TokenEstimator) -> Self {
        Self {
            estimator,
            used: AtomicU64::new(0),
        }
    }

    /// 记录一次 LLM 调用，返回本次计入的 token 数
    pub fn record(&self, provider_delta: u64, prompt: &[Message], response: &str) -> u64 {
        let tokens = if provider_delta > 0 {
            provider_delta
        } else {
            (self.estimator.estimate_messages(prompt) + self.estimator.estimate(response)) as u64
        };
        self.used.fetch_add(tokens, Ordering::Relaxed);
        tokens
    }

    pub fn total(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_uses_ratio() {
        let est = TokenEstimator::default();
        assert_eq!(est.estimate("abcdefgh"), 2);
        assert_eq!(est.estimate("abcde"), 2);
        assert_eq!(TokenEstimator::new(1.0).estimate("你好"), 2);
    }

    #[test]
    fn test_invalid_ratio_falls_back() {
        assert_eq!(TokenEstimator::new(0.0).ratio(), DEFAULT_TOKEN_RATIO);
        assert_eq!(TokenEstimator::new(f64::NAN).ratio(), DEFAULT_TOKEN_RATIO);
    }

    #[test]
    fn test_budget_is_hard_ceiling() {
        let budget = TokenBudget::new(100);
        assert!(!budget.is_exhausted(99));
        assert!(budget.is_exhausted(100));
        assert_eq!(budget.remaining(130), 0);
    }

    #[test]
    fn test_meter_prefers_provider_usage() {
        let meter = TokenMeter::default();
        assert_eq!(meter.record(42, &[Message::user("hi")], "ok"), 42);
        let estimated = meter.record(0, &[Message::user("hello world")], "fine");
        assert!(estimated > 0);
        assert_eq!(meter.total(), 42 + estimated);
    }
}
