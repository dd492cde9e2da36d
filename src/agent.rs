//! Agent：计划 / 执行 / 反思的状态机
//!
//! idle → planning → executing → reflecting → (executing | complete | failed | aborted)。
//! 计划每个任务只生成一次，每轮迭代按顺序重新执行同一计划的步骤，再做一次反思。
//! 循环内的任何错误在 run 中被捕获一次，转为 success=false 的 AgentResult；
//! 只有未调用 initialize() 时 execute 才返回 Err。

use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::checkpoint::CheckpointStore;
use crate::config::AgentConfig;
use crate::core::{AgentError, AgentState, AgentStatus, Observation, Reflection};
use crate::memory::{ContextWindow, Message};
use crate::react::{
    AgentEvent, AgentEventPayload, AgentHook, EventBus, PolicyContext, ReasoningPolicy,
    StepContext,
};
use crate::tools::{SafeFs, ToolContext, ToolExecutor};

/// 默认上下文窗口大小（估算 token）
const DEFAULT_CONTEXT_TOKENS: usize = 8000;

/// 调用方提供的任务上下文
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    /// 检查点所属线程；未提供时每次执行生成新的线程 id
    pub thread_id: Option<String>,
    /// 原样传给工具（ToolContext.metadata）
    pub metadata: Value,
}

impl TaskContext {
    pub fn with_thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
            metadata: Value::Null,
        }
    }
}

/// 一次运行的结果；迭代上限耗尽与目标达成都报告 success=true
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub success: bool,
    /// 按产生顺序拼接的观察内容
    pub output: String,
    /// observation.metadata.artifacts 展平，保序、保留重复
    pub artifacts: Vec<String>,
    pub tokens_used: u64,
    pub iterations: u32,
    pub duration: Duration,
    pub error: Option<String>,
    /// 检查点所属线程；TaskContext 未指定时为本次生成的 id，可直接传给 resume
    pub thread_id: String,
}

pub struct Agent {
    id: String,
    config: AgentConfig,
    state: AgentState,
    policy: Option<Arc<dyn ReasoningPolicy>>,
    executor: Option<Arc<ToolExecutor>>,
    checkpoints: Option<Arc<CheckpointStore>>,
    events: EventBus,
    memory: ContextWindow,
    fs: Option<Arc<SafeFs>>,
    abort: CancellationToken,
}

impl Agent {
    /// 校验配置；非法配置不会产生 Agent
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        config.validate()?;
        let checkpoints = config
            .enable_checkpointing
            .then(|| Arc::new(CheckpointStore::in_memory()));
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            config,
            state: AgentState::default(),
            policy: None,
            executor: None,
            checkpoints,
            events: EventBus::new(),
            memory: ContextWindow::new(DEFAULT_CONTEXT_TOKENS),
            fs: None,
            abort: CancellationToken::new(),
        })
    }

    /// 注入推理策略与工具执行器；execute 之前必须调用
    pub fn initialize(&mut self, policy: Arc<dyn ReasoningPolicy>, executor: Arc<ToolExecutor>) {
        self.policy = Some(policy);
        self.executor = Some(executor);
    }

    pub fn is_initialized(&self) -> bool {
        self.policy.is_some() && self.executor.is_some()
    }

    pub fn subscribe(&mut self, hook: Arc<dyn AgentHook>) {
        self.events.subscribe(hook);
    }

    pub fn set_checkpoint_store(&mut self, store: Arc<CheckpointStore>) {
        self.checkpoints = Some(store);
    }

    pub fn checkpoint_store(&self) -> Option<Arc<CheckpointStore>> {
        self.checkpoints.clone()
    }

    pub fn set_context_window(&mut self, window: ContextWindow) {
        self.memory = window;
    }

    /// 文件系统工具使用的沙箱句柄，随 ToolContext 传给工具
    pub fn set_filesystem(&mut self, fs: Arc<SafeFs>) {
        self.fs = Some(fs);
    }

    /// 取消后：当前步骤结束即停止，进行中的工具收到取消信号
    pub fn abort_handle(&self) -> CancellationToken {
        self.abort.clone()
    }

    pub fn state(&self) -> AgentState {
        self.state.clone()
    }

    pub fn config(&self) -> AgentConfig {
        self.config.clone()
    }

    pub fn id(&self) -> String {
        self.id.clone()
    }

    pub fn memory(&self) -> &ContextWindow {
        &self.memory
    }

    fn components(&self) -> Result<(Arc<dyn ReasoningPolicy>, Arc<ToolExecutor>), AgentError> {
        match (&self.policy, &self.executor) {
            (Some(policy), Some(executor)) => Ok((policy.clone(), executor.clone())),
            _ => Err(AgentError::NotInitialized),
        }
    }

    pub async fn execute(&mut self, task: &str, ctx: TaskContext) -> Result<AgentResult, AgentError> {
        let (policy, executor) = self.components()?;
        self.state = AgentState::for_task(task);
        if self.config.enable_memory {
            self.memory.clear();
            self.remember(Message::user(task));
        }
        let thread_id = ctx
            .thread_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        tracing::info!(agent = %self.id, thread = %thread_id, task, "agent run started");
        Ok(self.run(policy, executor, &thread_id, ctx, true).await)
    }

    /// 从线程最新检查点恢复并继续循环（已有计划时不重新规划）
    pub async fn resume(&mut self, thread_id: &str, ctx: TaskContext) -> Result<AgentResult, AgentError> {
        let (policy, executor) = self.components()?;
        let checkpoint = self
            .checkpoints
            .as_ref()
            .and_then(|store| store.get_latest(thread_id))
            .ok_or_else(|| AgentError::NoCheckpoint(thread_id.to_string()))?;

        self.state = checkpoint.state;
        if self.config.enable_memory {
            self.memory.clear();
            self.memory.add_messages(self.state.history.clone());
        }
        tracing::info!(
            agent = %self.id,
            thread = thread_id,
            checkpoint = %checkpoint.id,
            iteration = self.state.current_iteration,
            "resuming from checkpoint"
        );
        if self.state.status == AgentStatus::Complete {
            let result = self.build_result(thread_id, Duration::ZERO, None);
            self.events.emit(AgentEventPayload::Complete {
                result: result.clone(),
            });
            return Ok(result);
        }
        self.state.status = AgentStatus::Idle;
        self.state.end_time = None;
        let needs_plan = self.state.plan.is_none();
        let task = self.state.task.clone();
        let ctx = TaskContext {
            thread_id: Some(thread_id.to_string()),
            ..ctx
        };
        if needs_plan {
            tracing::debug!(task = %task, "checkpoint has no plan, planning again");
        }
        Ok(self.run(policy, executor, thread_id, ctx, needs_plan).await)
    }

    /// 与 execute 相同，另把事件发送到 tx；未初始化时发送一次 agent-error
    pub async fn execute_with_events(
        &mut self,
        task: &str,
        ctx: TaskContext,
        tx: mpsc::UnboundedSender<AgentEvent>,
    ) -> Result<AgentResult, AgentError> {
        self.events.set_sink(Some(tx));
        let result = self.execute(task, ctx).await;
        if let Err(e) = &result {
            self.events.emit(AgentEventPayload::Error {
                error: e.to_string(),
                result: None,
            });
        }
        self.events.set_sink(None);
        result
    }

    /// 事件流形式的 execute：恰好一个终止事件（agent-complete 或 agent-error）
    pub fn stream<'a>(
        &'a mut self,
        task: &'a str,
        ctx: TaskContext,
    ) -> Pin<Box<dyn Stream<Item = AgentEvent> + Send + 'a>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = stream::once(async move {
            let _ = self.execute_with_events(task, ctx, tx).await;
        })
        .filter_map(|_| async { None::<AgentEvent> });
        let events = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|e| (e, rx)) });
        Box::pin(stream::select(driver, events))
    }

    async fn run(
        &mut self,
        policy: Arc<dyn ReasoningPolicy>,
        executor: Arc<ToolExecutor>,
        thread_id: &str,
        ctx: TaskContext,
        needs_plan: bool,
    ) -> AgentResult {
        let started = Instant::now();
        let tokens = TokenSync {
            base_tokens: self.state.tokens_used,
            base_usage: policy.token_usage(),
        };

        let outcome = self
            .drive(policy.as_ref(), &executor, thread_id, &ctx, needs_plan, &tokens)
            .await;
        self.state.tokens_used = tokens.current(policy.as_ref());

        let error = match outcome {
            Ok(()) => {
                self.set_status(AgentStatus::Complete);
                None
            }
            Err(AgentError::Aborted) => {
                self.set_status(AgentStatus::Aborted);
                self.abort = CancellationToken::new();
                Some(AgentError::Aborted.to_string())
            }
            Err(e) => {
                tracing::error!(agent = %self.id, error = %e, "agent run failed");
                self.set_status(AgentStatus::Failed);
                Some(e.to_string())
            }
        };
        self.state.end_time = Some(Utc::now());
        self.checkpoint(thread_id, "final");

        let result = self.build_result(thread_id, started.elapsed(), error);
        tracing::info!(
            agent = %self.id,
            success = result.success,
            iterations = result.iterations,
            tokens = result.tokens_used,
            duration_ms = result.duration.as_millis() as u64,
            "agent run finished"
        );
        match &result.error {
            None => self.events.emit(AgentEventPayload::Complete {
                result: result.clone(),
            }),
            Some(error) => self.events.emit(AgentEventPayload::Error {
                error: error.clone(),
                result: Some(result.clone()),
            }),
        }
        result
    }

    async fn drive(
        &mut self,
        policy: &dyn ReasoningPolicy,
        executor: &ToolExecutor,
        thread_id: &str,
        ctx: &TaskContext,
        needs_plan: bool,
        tokens: &TokenSync,
    ) -> Result<(), AgentError> {
        let task = self.state.task.clone();

        if needs_plan {
            self.set_status(AgentStatus::Planning);
            let plan = policy
                .generate_plan(&task, &self.policy_context(executor, thread_id))
                .await?;
            self.state.tokens_used = tokens.current(policy);
            self.events.plan_generated(&plan);
            self.state.plan = Some(plan);
            self.checkpoint(thread_id, "plan");
        }
        let plan = self
            .state
            .plan
            .clone()
            .ok_or_else(|| AgentError::Execution("no plan to execute".into()))?;

        while self.state.current_iteration < self.config.max_iterations
            && policy.should_continue(&self.state)
        {
            let iteration = self.state.current_iteration;
            let mut results = Vec::with_capacity(plan.steps.len());

            for (index, step) in plan.steps.iter().enumerate() {
                if self.abort.is_cancelled() {
                    return Err(AgentError::Aborted);
                }
                self.state.current_step = index;
                self.set_status(AgentStatus::Executing);
                self.events.step_started(step, iteration);

                let history = self.history();
                let tool_context = self.tool_context(thread_id, ctx);
                let result = {
                    let step_ctx = StepContext {
                        executor,
                        events: &self.events,
                        tool_context,
                        history: &history,
                        iteration,
                    };
                    policy.execute_step(step, &step_ctx).await?
                };

                for observation in &result.observations {
                    self.events.observation(observation);
                    self.state.observations.push(observation.clone());
                    self.remember_observation(observation);
                }
                self.state.tokens_used = tokens.current(policy);
                results.push(result);
            }
            if self.abort.is_cancelled() {
                return Err(AgentError::Aborted);
            }

            self.set_status(AgentStatus::Reflecting);
            let mut pctx = self.policy_context(executor, thread_id);
            pctx.iteration = iteration;
            let reflection = policy.reflect(&results, &task, &pctx).await?;
            self.state.tokens_used = tokens.current(policy);
            self.events.reflection(&reflection);
            self.remember_reflection(&reflection);
            let ends_loop = reflection.ends_loop();
            self.state.reflections.push(reflection);

            if ends_loop {
                break;
            }
            self.state.current_iteration += 1;
            self.checkpoint(thread_id, "iteration");
        }
        Ok(())
    }

    fn set_status(&mut self, status: AgentStatus) {
        let from = self.state.status;
        if from != status {
            tracing::debug!(agent = %self.id, ?from, to = ?status, "status");
            self.state.status = status;
            self.events.status_change(from, status);
        }
    }

    fn history(&self) -> Vec<Message> {
        if self.config.enable_memory {
            self.memory.messages().to_vec()
        } else {
            Vec::new()
        }
    }

    fn policy_context(&self, executor: &ToolExecutor, thread_id: &str) -> PolicyContext {
        PolicyContext {
            task: self.state.task.clone(),
            history: self.history(),
            tool_names: executor.tool_names(),
            tool_schema: executor.registry().to_schema_json(),
            thread_id: Some(thread_id.to_string()),
            iteration: self.state.current_iteration,
        }
    }

    fn tool_context(&self, thread_id: &str, ctx: &TaskContext) -> ToolContext {
        let mut tool_context = ToolContext::new(self.id.clone()).with_thread(thread_id);
        tool_context.cancel = self.abort.child_token();
        tool_context.metadata = ctx.metadata.clone();
        if let Some(fs) = &self.fs {
            tool_context = tool_context.with_fs(fs.clone());
        }
        tool_context
    }

    fn remember(&mut self, message: Message) {
        self.memory.add_message(message);
        self.state.history = self.memory.messages().to_vec();
    }

    fn remember_observation(&mut self, observation: &Observation) {
        if !self.config.enable_memory {
            return;
        }
        let mark = if observation.success { "ok" } else { "error" };
        self.remember(Message::assistant(format!(
            "Observation [{mark}]: {}",
            observation.content
        )));
    }

    fn remember_reflection(&mut self, reflection: &Reflection) {
        if !self.config.enable_memory {
            return;
        }
        let mut text = format!(
            "Reflection: goal achieved = {}, continue = {}",
            reflection.goal_achieved, reflection.should_continue
        );
        if !reflection.issues.is_empty() {
            text.push_str(&format!("; issues: {}", reflection.issues.join("; ")));
        }
        self.remember(Message::assistant(text));
    }

    fn checkpoint(&self, thread_id: &str, phase: &str) {
        if !self.config.enable_checkpointing {
            return;
        }
        if let Some(store) = &self.checkpoints {
            store.save(thread_id, &self.id, &self.state, json!({ "phase": phase }));
        }
    }

    fn build_result(&self, thread_id: &str, duration: Duration, error: Option<String>) -> AgentResult {
        let output = self
            .state
            .observations
            .iter()
            .map(|o| o.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let artifacts = self
            .state
            .observations
            .iter()
            .flat_map(|o| o.artifacts())
            .collect();
        AgentResult {
            success: error.is_none(),
            output,
            artifacts,
            tokens_used: self.state.tokens_used,
            iterations: self.state.reflections.len() as u32,
            duration,
            error,
            thread_id: thread_id.to_string(),
        }
    }
}

/// 把策略的累计 token 换算为本次运行的 tokens_used
struct TokenSync {
    base_tokens: u64,
    base_usage: u64,
}

impl TokenSync {
    fn current(&self, policy: &dyn ReasoningPolicy) -> u64 {
        self.base_tokens + policy.token_usage().saturating_sub(self.base_usage)
    }
}
