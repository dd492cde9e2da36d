//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

use crate::config::LlmSection;

pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{complete_collected, LlmClient, TokenStream};

/// 按 [llm] 段创建客户端：provider = "openai" 且有 API Key 时走真实端点，否则用 Mock
pub fn create_llm_from_config(cfg: &LlmSection) -> Arc<dyn LlmClient> {
    let api_key = cfg
        .api_key
        .clone()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok());
    match (cfg.provider.as_str(), api_key) {
        ("openai", Some(key)) => {
            tracing::info!(model = %cfg.model, "using OpenAI-compatible LLM");
            Arc::new(OpenAiClient::new(cfg.base_url.as_deref(), &cfg.model, Some(&key)))
        }
        ("openai", None) => {
            tracing::warn!("provider is openai but no API key is set, falling back to mock LLM");
            Arc::new(MockLlmClient::new())
        }
        _ => Arc::new(MockLlmClient::new()),
    }
}
