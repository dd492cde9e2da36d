//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DRONE__*` 覆盖（双下划线表示嵌套，如 `DRONE__AGENT__MAX_ITERATIONS=3`）。
//! AgentConfig 是运行时使用的已校验视图，由 AppConfig::agent_config() 生成。

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::AgentError;

/// 推理模式；目前只有 plan-execute 有实现
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasoningPattern {
    #[default]
    PlanExecute,
    React,
    TreeOfThought,
}

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub checkpoint: CheckpointSection,
    pub memory: MemorySection,
    pub logging: LoggingSection,
}

/// [agent] 段：循环上限、预算与开关
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub name: String,
    pub model: Option<String>,
    pub reasoning_pattern: ReasoningPattern,
    pub max_iterations: u32,
    pub token_budget: u64,
    pub enable_self_correction: bool,
    pub enable_memory: bool,
    pub enable_checkpointing: bool,
    pub system_prompt: Option<String>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            name: "drone".to_string(),
            model: None,
            reasoning_pattern: ReasoningPattern::PlanExecute,
            max_iterations: 5,
            token_budget: 100_000,
            enable_self_correction: false,
            enable_memory: true,
            enable_checkpointing: false,
            system_prompt: None,
        }
    }
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// mock / openai（openai 需要 api_key 或 OPENAI_API_KEY）
    pub provider: String,
    pub model: String,
    /// OpenAI 兼容端点，未设置时用官方地址
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            api_key: None,
        }
    }
}

/// [tools] 段：沙箱目录、超时与并发
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 文件系统工具的沙箱根目录，未设置时不注册文件系统工具
    pub workspace_root: Option<PathBuf>,
    pub tool_timeout_secs: u64,
    pub max_concurrent: usize,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            workspace_root: None,
            tool_timeout_secs: 30,
            max_concurrent: 3,
        }
    }
}

/// [checkpoint] 段：未设置 path 时使用内存存储
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CheckpointSection {
    pub path: Option<PathBuf>,
}

/// [memory] 段：上下文窗口
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub max_tokens: usize,
    /// 每字符的 token 估算比例
    pub token_ratio: f64,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            max_tokens: 8000,
            token_ratio: crate::memory::DEFAULT_TOKEN_RATIO,
        }
    }
}

/// [logging] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// RUST_LOG 未设置时使用的过滤级别
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Agent 运行配置；创建 Agent 前必须 validate
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub name: String,
    pub model: Option<String>,
    pub reasoning_pattern: ReasoningPattern,
    pub max_iterations: u32,
    pub token_budget: u64,
    pub enable_self_correction: bool,
    pub enable_memory: bool,
    pub enable_checkpointing: bool,
    pub tool_timeout: Duration,
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AppConfig::default().agent_config()
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.max_iterations == 0 {
            return Err(AgentError::InvalidConfig(
                "max_iterations must be greater than 0".into(),
            ));
        }
        if self.token_budget == 0 {
            return Err(AgentError::InvalidConfig(
                "token_budget must be greater than 0".into(),
            ));
        }
        if self.tool_timeout.is_zero() {
            return Err(AgentError::InvalidConfig(
                "tool_timeout must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

impl AppConfig {
    pub fn agent_config(&self) -> AgentConfig {
        let agent = &self.agent;
        AgentConfig {
            name: agent.name.clone(),
            model: agent.model.clone().or_else(|| Some(self.llm.model.clone())),
            reasoning_pattern: agent.reasoning_pattern,
            max_iterations: agent.max_iterations,
            token_budget: agent.token_budget,
            enable_self_correction: agent.enable_self_correction,
            enable_memory: agent.enable_memory,
            enable_checkpointing: agent.enable_checkpointing,
            tool_timeout: Duration::from_secs(self.tools.tool_timeout_secs),
            system_prompt: agent.system_prompt.clone(),
        }
    }
}

/// 加载配置：config/default.toml（存在时）→ 指定文件 → DRONE__* 环境变量
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        builder = builder.add_source(config::File::from(path.clone()).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DRONE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = AgentConfig::default();
        assert_eq!(config.max_iterations, 5);
        assert_eq!(config.reasoning_pattern, ReasoningPattern::PlanExecute);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_limits_rejected() {
        let config = AgentConfig {
            max_iterations: 0,
            ..AgentConfig::default()
        };
        assert!(matches!(config.validate(), Err(AgentError::InvalidConfig(_))));

        let config = AgentConfig {
            token_budget: 0,
            ..AgentConfig::default()
        };
        assert!(matches!(config.validate(), Err(AgentError::InvalidConfig(_))));
    }

    #[test]
    fn test_load_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[agent]\nmax_iterations = 2\nreasoning_pattern = \"tree-of-thought\"\n\n[tools]\ntool_timeout_secs = 7\n\n[llm]\nmodel = \"m\""
        )
        .unwrap();
        let app = load_config(Some(file.path().to_path_buf())).unwrap();
        let config = app.agent_config();
        assert_eq!(config.max_iterations, 2);
        assert_eq!(config.reasoning_pattern, ReasoningPattern::TreeOfThought);
        assert_eq!(config.tool_timeout, Duration::from_secs(7));
        assert_eq!(config.model.as_deref(), Some("m"));
        assert_eq!(app.memory.max_tokens, 8000);
    }
}
