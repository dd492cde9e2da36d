//! Agent 端到端集成测试

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use async_trait::async_trait;
    use chrono::Utc;
    use futures_util::StreamExt;
    use serde_json::{json, Value};

    use drone::checkpoint::CheckpointStore;
    use drone::core::{AgentState, AgentStatus, Observation, Plan, PlanStep, Reflection};
    use drone::llm::MockLlmClient;
    use drone::react::{
        AgentEventPayload, AgentHook, PolicyContext, ReasoningPolicy, StepContext, StepResult,
    };
    use drone::tools::{Tool, ToolCall, ToolContext, ToolExecutor, ToolRegistry};
    use drone::{Agent, AgentBuilder, AgentConfig, AgentError, TaskContext};

    /// 可配置的桩策略：步骤数、第几步失败、第几次反思停止
    struct StubPolicy {
        steps: usize,
        fail_step: Option<usize>,
        stop_after: usize,
        plans: AtomicUsize,
        reflections: AtomicUsize,
    }

    impl StubPolicy {
        fn new(steps: usize, stop_after: usize) -> Self {
            Self {
                steps,
                fail_step: None,
                stop_after,
                plans: AtomicUsize::new(0),
                reflections: AtomicUsize::new(0),
            }
        }

        fn failing_at(mut self, step: usize) -> Self {
            self.fail_step = Some(step);
            self
        }
    }

    #[async_trait]
    impl ReasoningPolicy for StubPolicy {
        async fn generate_plan(&self, _task: &str, _ctx: &PolicyContext) -> Result<Plan, AgentError> {
            self.plans.fetch_add(1, Ordering::SeqCst);
            Ok(Plan::new(
                (1..=self.steps)
                    .map(|n| PlanStep::new(n, format!("step {n}")))
                    .collect(),
            ))
        }

        async fn execute_step(
            &self,
            step: &PlanStep,
            _ctx: &StepContext<'_>,
        ) -> Result<StepResult, AgentError> {
            if self.fail_step == Some(step.number) {
                return Err(AgentError::Execution(format!("step {} exploded", step.number)));
            }
            Ok(StepResult {
                step_number: step.number,
                success: true,
                observations: vec![Observation::new(format!("ran {}", step.number), true)],
                tool_results: vec![],
            })
        }

        async fn reflect(
            &self,
            _results: &[StepResult],
            _goal: &str,
            _ctx: &PolicyContext,
        ) -> Result<Reflection, AgentError> {
            let n = self.reflections.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Reflection {
                goal_achieved: false,
                issues: vec![],
                next_actions: vec![],
                should_continue: n < self.stop_after,
                timestamp: Utc::now(),
            })
        }

        fn should_continue(&self, state: &AgentState) -> bool {
            !state.status.is_terminal()
        }
    }

    /// 永不返回的工具
    struct NeverResolves;

    #[async_trait]
    impl Tool for NeverResolves {
        fn name(&self) -> &str {
            "hang"
        }

        fn description(&self) -> &str {
            "never resolves"
        }

        fn timeout(&self) -> Option<Duration> {
            Some(Duration::from_millis(50))
        }

        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, String> {
            std::future::pending::<()>().await;
            Ok(Value::Null)
        }
    }

    fn empty_executor() -> Arc<ToolExecutor> {
        Arc::new(ToolExecutor::new(ToolRegistry::new(), Duration::from_secs(5)))
    }

    fn stub_agent(config: AgentConfig, policy: Arc<StubPolicy>) -> Agent {
        let mut agent = Agent::new(config).unwrap();
        agent.initialize(policy, empty_executor());
        agent
    }

    fn plan_reply(tools: Value) -> String {
        let plan = json!({
            "steps": [{"number": 1, "description": "use tools", "tools": tools}],
            "estimatedComplexity": "low",
            "estimatedTokens": 100
        });
        format!("```json\n{plan}\n```")
    }

    const STOP_REFLECTION: &str =
        "```json\n{\"goalAchieved\": false, \"issues\": [], \"nextActions\": [], \"shouldContinue\": false}\n```";

    #[tokio::test]
    async fn test_first_reflection_stop_completes_after_one_iteration() {
        let policy = Arc::new(StubPolicy::new(2, 1));
        let mut agent = stub_agent(AgentConfig::default(), policy.clone());

        let result = agent.execute("x", TaskContext::default()).await.unwrap();

        assert!(result.success);
        assert_eq!(result.iterations, 1);
        assert_eq!(agent.state().status, AgentStatus::Complete);
        assert_eq!(policy.reflections.load(Ordering::SeqCst), 1);
        assert_eq!(result.output, "ran 1\nran 2");
    }

    #[tokio::test]
    async fn test_uninitialized_agent_is_rejected() {
        let mut agent = Agent::new(AgentConfig::default()).unwrap();
        let err = agent.execute("x", TaskContext::default()).await.unwrap_err();
        assert_eq!(err, AgentError::NotInitialized);

        let events: Vec<_> = agent.stream("x", TaskContext::default()).collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].payload,
            AgentEventPayload::Error { result: None, .. }
        ));
    }

    #[tokio::test]
    async fn test_invalid_config_never_builds_agent() {
        let config = AgentConfig {
            max_iterations: 0,
            ..AgentConfig::default()
        };
        assert!(matches!(Agent::new(config), Err(AgentError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_failing_step_keeps_plan_and_observations() {
        let policy = Arc::new(StubPolicy::new(3, 1).failing_at(2));
        let mut agent = stub_agent(AgentConfig::default(), policy);

        let result = agent.execute("x", TaskContext::default()).await.unwrap();

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("step 2 exploded"));
        let state = agent.state();
        assert_eq!(state.status, AgentStatus::Failed);
        assert_eq!(state.plan.unwrap().steps.len(), 3);
        assert_eq!(state.observations.len(), 1);
        assert!(state.end_time.is_some());
    }

    #[tokio::test]
    async fn test_iteration_cap_reports_success() {
        let config = AgentConfig {
            max_iterations: 2,
            ..AgentConfig::default()
        };
        let mut agent = stub_agent(config, Arc::new(StubPolicy::new(1, usize::MAX)));
        let result = agent.execute("x", TaskContext::default()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.iterations, 2);
    }

    #[tokio::test]
    async fn test_hanging_tool_times_out_quickly() {
        let llm = MockLlmClient::with_responses([
            plan_reply(json!([{"name": "hang", "arguments": {}}])),
            STOP_REFLECTION.to_string(),
        ]);
        let mut agent = AgentBuilder::new(AgentConfig::default())
            .with_llm(Arc::new(llm))
            .with_tool(NeverResolves)
            .build()
            .unwrap();

        let start = Instant::now();
        let result = agent.execute("hang around", TaskContext::default()).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));

        let obs = &agent.state().observations[0];
        assert!(!obs.success);
        assert!(obs.content.contains("timeout"));
        assert_eq!(obs.metadata["tool"], "hang");
        // 工具失败不等于运行失败
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_stream_is_causally_ordered_with_one_terminal_event() {
        let mut agent = AgentBuilder::new(AgentConfig::default())
            .with_llm(Arc::new(MockLlmClient::new()))
            .build()
            .unwrap();

        let events: Vec<_> = agent.stream("say hi", TaskContext::default()).collect().await;
        let kinds: Vec<&str> = events.iter().map(|e| e.kind()).collect();

        assert_eq!(
            kinds,
            vec![
                "agent-plan",
                "agent-step-start",
                "agent-observation",
                "agent-reflection",
                "agent-complete"
            ]
        );
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        match &events[2].payload {
            AgentEventPayload::Observation { observation } => {
                assert_eq!(observation.content, "Echo from Mock: say hi")
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    struct Misbehaving {
        status_changes: AtomicUsize,
    }

    impl AgentHook for Misbehaving {
        fn on_step_started(&self, _step: &PlanStep, _iteration: u32) -> anyhow::Result<()> {
            panic!("subscriber bug");
        }

        fn on_observation(&self, _observation: &Observation) -> anyhow::Result<()> {
            anyhow::bail!("subscriber refused")
        }

        fn on_status_change(&self, _from: AgentStatus, _to: AgentStatus) -> anyhow::Result<()> {
            self.status_changes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failing_hooks_never_abort_the_run() {
        let hook = Arc::new(Misbehaving {
            status_changes: AtomicUsize::new(0),
        });
        let mut agent = stub_agent(AgentConfig::default(), Arc::new(StubPolicy::new(1, 1)));
        agent.subscribe(hook.clone());

        let result = agent.execute("x", TaskContext::default()).await.unwrap();

        assert!(result.success);
        // planning, executing, reflecting, complete
        assert_eq!(hook.status_changes.load(Ordering::SeqCst), 4);
    }

    /// 按发生顺序记录步骤、工具调用与观察
    #[derive(Default)]
    struct Recorder {
        log: Mutex<Vec<String>>,
        call_ids: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn push(&self, entry: String) {
            self.log.lock().unwrap().push(entry);
        }
    }

    impl AgentHook for Recorder {
        fn on_step_started(&self, step: &PlanStep, _iteration: u32) -> anyhow::Result<()> {
            self.push(format!("step {}", step.number));
            Ok(())
        }

        fn on_tool_call(&self, call: &ToolCall) -> anyhow::Result<()> {
            self.push(format!("call {} {}", call.name, call.arguments["text"]));
            self.call_ids.lock().unwrap().push(call.id.clone());
            Ok(())
        }

        fn on_observation(&self, observation: &Observation) -> anyhow::Result<()> {
            self.push(format!("observe {}", observation.content));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_tool_call_hook_fires_per_planned_tool_before_observations() {
        let plan = json!({
            "steps": [
                {"number": 1, "description": "two echoes", "tools": [
                    {"name": "echo", "arguments": {"text": "a"}},
                    {"name": "echo", "arguments": {"text": "b"}}
                ]},
                {"number": 2, "description": "one echo", "tools": [
                    {"name": "echo", "arguments": {"text": "c"}}
                ]}
            ]
        });
        let llm = MockLlmClient::with_responses([
            format!("```json\n{plan}\n```"),
            STOP_REFLECTION.to_string(),
        ]);
        let recorder = Arc::new(Recorder::default());
        let mut agent = AgentBuilder::new(AgentConfig::default())
            .with_llm(Arc::new(llm))
            .with_hook(recorder.clone())
            .build()
            .unwrap();

        let result = agent.execute("echo things", TaskContext::default()).await.unwrap();
        assert!(result.success);

        let log = recorder.log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec![
                "step 1",
                "call echo \"a\"",
                "call echo \"b\"",
                "observe a",
                "observe b",
                "step 2",
                "call echo \"c\"",
                "observe c",
            ]
        );

        let observed: Vec<String> = agent
            .state()
            .observations
            .iter()
            .map(|o| o.metadata["toolCallId"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(*recorder.call_ids.lock().unwrap(), observed);
    }

    #[tokio::test]
    async fn test_token_budget_stops_before_first_iteration() {
        let config = AgentConfig {
            token_budget: 1,
            ..AgentConfig::default()
        };
        let mut agent = AgentBuilder::new(config)
            .with_llm(Arc::new(MockLlmClient::new()))
            .build()
            .unwrap();

        let result = agent.execute("count tokens", TaskContext::default()).await.unwrap();

        assert!(result.tokens_used >= 1);
        assert_eq!(result.iterations, 0);
        assert!(agent.state().plan.is_some());
        assert!(agent.state().observations.is_empty());
    }

    #[tokio::test]
    async fn test_resume_continues_without_replanning() {
        let store = Arc::new(CheckpointStore::in_memory());
        let config = AgentConfig {
            enable_checkpointing: true,
            ..AgentConfig::default()
        };

        let mut first = stub_agent(config.clone(), Arc::new(StubPolicy::new(2, 1).failing_at(2)));
        first.set_checkpoint_store(store.clone());
        let failed = first
            .execute("resumable", TaskContext::with_thread("thread-1"))
            .await
            .unwrap();
        assert!(!failed.success);
        assert_eq!(
            store.get_latest("thread-1").unwrap().state.status,
            AgentStatus::Failed
        );

        let healthy = Arc::new(StubPolicy::new(2, 1));
        let mut second = stub_agent(config, healthy.clone());
        second.set_checkpoint_store(store.clone());
        let resumed = second
            .resume("thread-1", TaskContext::default())
            .await
            .unwrap();

        assert!(resumed.success);
        assert_eq!(healthy.plans.load(Ordering::SeqCst), 0);
        assert_eq!(second.state().task, "resumable");
        // 失败前的观察保留，恢复后的一轮追加两条
        assert_eq!(resumed.output, "ran 1\nran 1\nran 2");
        assert_eq!(
            store.get_latest("thread-1").unwrap().state.status,
            AgentStatus::Complete
        );
    }

    #[tokio::test]
    async fn test_resume_without_checkpoint() {
        let mut agent = stub_agent(AgentConfig::default(), Arc::new(StubPolicy::new(1, 1)));
        let err = agent
            .resume("nowhere", TaskContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::NoCheckpoint(_)));
    }

    #[tokio::test]
    async fn test_write_file_artifacts_flow_into_result() {
        let dir = tempfile::tempdir().unwrap();
        let llm = MockLlmClient::with_responses([
            plan_reply(json!([
                {"name": "write_file", "arguments": {"path": "out/hello.txt", "content": "hi"}},
                {"name": "read_file", "arguments": {"path": "out/hello.txt"}},
                {"name": "write_file", "arguments": {"path": "../escape.txt", "content": "x"}}
            ])),
            STOP_REFLECTION.to_string(),
        ]);
        let mut agent = AgentBuilder::new(AgentConfig::default())
            .with_llm(Arc::new(llm))
            .with_filesystem_tools(dir.path())
            .build()
            .unwrap();

        let result = agent.execute("write hello", TaskContext::default()).await.unwrap();

        assert_eq!(result.artifacts, vec!["out/hello.txt"]);
        let observations = agent.state().observations;
        assert_eq!(observations[1].content, "hi");
        assert!(!observations[2].success);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out/hello.txt")).unwrap(),
            "hi"
        );
        assert!(!dir.path().parent().unwrap().join("escape.txt").exists());
    }
}
