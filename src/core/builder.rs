//! Agent 构建器：显式注入所有依赖
//!
//! 每次 build 都得到独立配置的 Agent（无全局单例），测试可以并行构建互不影响的实例。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::Agent;
use crate::checkpoint::CheckpointStore;
use crate::config::{AgentConfig, AppConfig, ReasoningPattern};
use crate::core::{AgentError, ErrorRecoveryPolicy};
use crate::llm::{create_llm_from_config, LlmClient, MockLlmClient};
use crate::memory::{ContextWindow, TokenEstimator, TokenMeter, DEFAULT_TOKEN_RATIO};
use crate::react::{AgentHook, PlanExecutePolicy, ReasoningPolicy};
use crate::tools::{
    register_filesystem_tools, EchoTool, SafeFs, Tool, ToolExecutor, ToolRegistry, TypedTool,
};

pub struct AgentBuilder {
    config: AgentConfig,
    llm: Option<Arc<dyn LlmClient>>,
    policy: Option<Arc<dyn ReasoningPolicy>>,
    registry: ToolRegistry,
    workspace: Option<PathBuf>,
    checkpoints: Option<Arc<CheckpointStore>>,
    hooks: Vec<Arc<dyn AgentHook>>,
    recovery: Option<ErrorRecoveryPolicy>,
    max_concurrent: usize,
    context_tokens: usize,
    token_ratio: f64,
}

impl AgentBuilder {
    /// 只注册 echo 工具；其余按需添加
    pub fn new(config: AgentConfig) -> Self {
        let mut registry = ToolRegistry::new();
        registry.register_typed(EchoTool);
        Self {
            config,
            llm: None,
            policy: None,
            registry,
            workspace: None,
            checkpoints: None,
            hooks: Vec::new(),
            recovery: None,
            max_concurrent: 3,
            context_tokens: 8000,
            token_ratio: DEFAULT_TOKEN_RATIO,
        }
    }

    /// 按应用配置装配：LLM 后端、沙箱文件系统工具、检查点存储、上下文窗口
    pub fn from_app_config(app: &AppConfig) -> Self {
        let mut builder = Self::new(app.agent_config())
            .with_llm(create_llm_from_config(&app.llm))
            .with_max_concurrent_tools(app.tools.max_concurrent)
            .with_context_window(app.memory.max_tokens, app.memory.token_ratio);
        if let Some(root) = &app.tools.workspace_root {
            builder = builder.with_filesystem_tools(root.clone());
        }
        if let Some(path) = &app.checkpoint.path {
            builder = builder.with_checkpoint_store(Arc::new(CheckpointStore::open_sqlite(path)));
        }
        builder
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 自定义推理策略，替代按 reasoning_pattern 构建的默认策略
    pub fn with_policy(mut self, policy: Arc<dyn ReasoningPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.registry.register(tool);
        self
    }

    pub fn with_typed_tool<T: TypedTool>(mut self, tool: T) -> Self {
        self.registry.register_typed(tool);
        self
    }

    /// 注册文件系统工具，沙箱根为 workspace（build 时创建）
    pub fn with_filesystem_tools(mut self, workspace: impl Into<PathBuf>) -> Self {
        register_filesystem_tools(&mut self.registry);
        self.workspace = Some(workspace.into());
        self
    }

    /// 同时开启 enable_checkpointing
    pub fn with_checkpoint_store(mut self, store: Arc<CheckpointStore>) -> Self {
        self.config.enable_checkpointing = true;
        self.checkpoints = Some(store);
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn AgentHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// 同时开启 enable_self_correction
    pub fn with_recovery_policy(mut self, policy: ErrorRecoveryPolicy) -> Self {
        self.config.enable_self_correction = true;
        self.recovery = Some(policy);
        self
    }

    pub fn with_max_concurrent_tools(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.config.tool_timeout = timeout;
        self
    }

    pub fn with_context_window(mut self, max_tokens: usize, token_ratio: f64) -> Self {
        self.context_tokens = max_tokens;
        self.token_ratio = token_ratio;
        self
    }

    fn build_policy(&mut self) -> Result<Arc<dyn ReasoningPolicy>, AgentError> {
        if let Some(policy) = self.policy.take() {
            return Ok(policy);
        }
        match self.config.reasoning_pattern {
            ReasoningPattern::PlanExecute => {
                let llm = self.llm.take().unwrap_or_else(|| {
                    tracing::warn!("no LLM configured, using mock LLM");
                    Arc::new(MockLlmClient::new())
                });
                let meter = Arc::new(TokenMeter::new(TokenEstimator::new(self.token_ratio)));
                let mut policy = PlanExecutePolicy::with_meter(llm, &self.config, meter);
                if let Some(recovery) = self.recovery.take() {
                    policy = policy.with_recovery_policy(recovery);
                }
                Ok(Arc::new(policy))
            }
            other => Err(AgentError::InvalidConfig(format!(
                "reasoning pattern {other:?} is not implemented"
            ))),
        }
    }

    pub fn build(mut self) -> Result<Agent, AgentError> {
        self.config.validate()?;
        let policy = self.build_policy()?;

        let fs = match &self.workspace {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(|e| {
                    AgentError::InvalidConfig(format!("workspace {}: {e}", root.display()))
                })?;
                Some(Arc::new(SafeFs::new(root)))
            }
            None => None,
        };

        let registry = std::mem::take(&mut self.registry);
        tracing::info!(
            tools = ?registry.tool_names(),
            max_concurrent = self.max_concurrent,
            "tool registry ready"
        );
        let executor = ToolExecutor::new(registry, self.config.tool_timeout)
            .with_max_concurrent(self.max_concurrent);

        let mut agent = Agent::new(self.config)?;
        agent.initialize(policy, Arc::new(executor));
        agent.set_context_window(
            ContextWindow::new(self.context_tokens).with_ratio(self.token_ratio),
        );
        if let Some(fs) = fs {
            agent.set_filesystem(fs);
        }
        if let Some(store) = self.checkpoints {
            agent.set_checkpoint_store(store);
        }
        for hook in self.hooks {
            agent.subscribe(hook);
        }
        Ok(agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_rejected_before_agent_exists() {
        let config = AgentConfig {
            token_budget: 0,
            ..AgentConfig::default()
        };
        assert!(matches!(
            AgentBuilder::new(config).build(),
            Err(AgentError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_unimplemented_pattern_rejected() {
        let config = AgentConfig {
            reasoning_pattern: ReasoningPattern::React,
            ..AgentConfig::default()
        };
        let err = AgentBuilder::new(config).build().err().unwrap();
        assert!(err.to_string().contains("React"));
    }

    #[test]
    fn test_independent_instances() {
        let dir = tempfile::tempdir().unwrap();
        let a = AgentBuilder::new(AgentConfig::default())
            .with_filesystem_tools(dir.path().join("ws"))
            .build()
            .unwrap();
        let b = AgentBuilder::new(AgentConfig::default()).build().unwrap();
        assert_ne!(a.id(), b.id());
        assert!(a.is_initialized() && b.is_initialized());
        assert!(dir.path().join("ws").is_dir());
        assert!(!b.config().enable_checkpointing);
    }
}
