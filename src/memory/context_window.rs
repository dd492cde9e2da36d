//! 上下文窗口：按 token 预算保留最近的消息
//!
//! 追加后从最旧的消息开始淘汰，直到估算值不超过 max_tokens；至少保留一条消息。
//! summarize_and_compress 把除最后两条外的消息替换成一条摘要。

use std::future::Future;

use crate::memory::{Message, TokenEstimator};

#[derive(Debug, Clone)]
pub struct ContextWindow {
    messages: Vec<Message>,
    max_tokens: usize,
    estimator: TokenEstimator,
    /// 所有消息序列化后的字符数之和，避免每次淘汰都重新序列化
    total_chars: usize,
}

impl ContextWindow {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_tokens,
            estimator: TokenEstimator::default(),
            total_chars: 0,
        }
    }

    /// 自定义字符 → token 比例
    pub fn with_ratio(mut self, ratio: f64) -> Self {
        self.estimator = TokenEstimator::new(ratio);
        self
    }

    pub fn add_message(&mut self, message: Message) {
        self.total_chars += TokenEstimator::message_chars(&message);
        self.messages.push(message);
        self.trim();
    }

    pub fn add_messages(&mut self, messages: impl IntoIterator<Item = Message>) {
        for message in messages {
            self.total_chars += TokenEstimator::message_chars(&message);
            self.messages.push(message);
        }
        self.trim();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.total_chars = 0;
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn estimated_tokens(&self) -> usize {
        self.estimator.estimate_chars(self.total_chars)
    }

    /// 超出预算时从队首淘汰；只剩一条仍超出时只告警，不清空
    fn trim(&mut self) {
        let mut evicted = 0;
        while self.estimated_tokens() > self.max_tokens && self.messages.len() > 1 {
            let oldest = self.messages.remove(0);
            self.total_chars = self
                .total_chars
                .saturating_sub(TokenEstimator::message_chars(&oldest));
            evicted += 1;
        }
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.messages.len(), "context window evicted messages");
        }
        if self.messages.len() == 1 && self.estimated_tokens() > self.max_tokens {
            tracing::warn!(
                tokens = self.estimated_tokens(),
                max_tokens = self.max_tokens,
                "single message exceeds context window budget"
            );
        }
    }

    /// 用 summarizer 把除最后两条外的消息压成一条 system 摘要。
    /// 少于 3 条时不动并返回 Ok(false)；summarizer 失败时窗口保持原样。
    pub async fn summarize_and_compress<F, Fut, E>(&mut self, summarizer: F) -> Result<bool, E>
    where
        F: FnOnce(Vec<Message>) -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        if self.messages.len() < 3 {
            return Ok(false);
        }
        let split = self.messages.len() - 2;
        let summary = summarizer(self.messages[..split].to_vec()).await?;

        let tail = self.messages.split_off(split);
        self.clear();
        self.add_messages(
            std::iter::once(Message::system(format!(
                "Summary of earlier context:\n{summary}"
            )))
            .chain(tail),
        );
        Ok(true)
    }
}
