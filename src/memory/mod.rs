//! 记忆层：对话消息、token 估算与预算、按预算淘汰的上下文窗口

pub mod context_window;
pub mod conversation;
pub mod token_budget;

pub use context_window::ContextWindow;
pub use conversation::{Message, Role};
pub use token_budget::{TokenBudget, TokenEstimator, TokenMeter, DEFAULT_TOKEN_RATIO};
