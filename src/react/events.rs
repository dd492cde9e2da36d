//! Agent 过程事件与钩子
//!
//! AgentEvent 可序列化为 JSON（type = agent-plan / agent-step-start / ...），供流式展示；
//! AgentHook 是进程内订阅者。EventBus 同时驱动两者：钩子返回 Err 或 panic 只记 warn，不影响主流程。

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::agent::AgentResult;
use crate::core::{AgentStatus, Observation, Plan, PlanStep, Reflection};
use crate::tools::ToolCall;

/// 事件负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum AgentEventPayload {
    #[serde(rename = "agent-plan")]
    Plan { plan: Plan },
    #[serde(rename = "agent-step-start")]
    StepStart { step: PlanStep, iteration: u32 },
    #[serde(rename = "agent-observation")]
    Observation { observation: Observation },
    #[serde(rename = "agent-reflection")]
    Reflection { reflection: Reflection },
    #[serde(rename = "agent-complete")]
    Complete { result: AgentResult },
    #[serde(rename = "agent-error")]
    Error {
        error: String,
        result: Option<AgentResult>,
    },
}

/// 带时间戳的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    #[serde(flatten)]
    pub payload: AgentEventPayload,
    pub timestamp: DateTime<Utc>,
}

impl AgentEvent {
    pub fn new(payload: AgentEventPayload) -> Self {
        Self {
            payload,
            timestamp: Utc::now(),
        }
    }

    /// agent-complete / agent-error
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.payload,
            AgentEventPayload::Complete { .. } | AgentEventPayload::Error { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self.payload {
            AgentEventPayload::Plan { .. } => "agent-plan",
            AgentEventPayload::StepStart { .. } => "agent-step-start",
            AgentEventPayload::Observation { .. } => "agent-observation",
            AgentEventPayload::Reflection { .. } => "agent-reflection",
            AgentEventPayload::Complete { .. } => "agent-complete",
            AgentEventPayload::Error { .. } => "agent-error",
        }
    }
}

/// 进程内订阅者；所有方法默认空实现，按需覆盖
pub trait AgentHook: Send + Sync {
    fn on_plan_generated(&self, _plan: &Plan) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_step_started(&self, _step: &PlanStep, _iteration: u32) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_tool_call(&self, _call: &ToolCall) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_observation(&self, _observation: &Observation) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_reflection(&self, _reflection: &Reflection) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_status_change(&self, _from: AgentStatus, _to: AgentStatus) -> anyhow::Result<()> {
        Ok(())
    }
}

/// 钩子列表 + 可选事件通道
#[derive(Default, Clone)]
pub struct EventBus {
    hooks: Vec<Arc<dyn AgentHook>>,
    sink: Option<mpsc::UnboundedSender<AgentEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, hook: Arc<dyn AgentHook>) {
        self.hooks.push(hook);
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    pub fn set_sink(&mut self, sink: Option<mpsc::UnboundedSender<AgentEvent>>) {
        self.sink = sink;
    }

    fn notify(&self, name: &str, f: impl Fn(&dyn AgentHook) -> anyhow::Result<()>) {
        for hook in &self.hooks {
            match catch_unwind(AssertUnwindSafe(|| f(hook.as_ref()))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(hook = name, error = %e, "hook failed"),
                Err(_) => tracing::warn!(hook = name, "hook panicked"),
            }
        }
    }

    /// 接收端已关闭时静默丢弃
    pub fn emit(&self, payload: AgentEventPayload) {
        if let Some(tx) = &self.sink {
            let _ = tx.send(AgentEvent::new(payload));
        }
    }

    pub fn plan_generated(&self, plan: &Plan) {
        self.notify("on_plan_generated", |h| h.on_plan_generated(plan));
        self.emit(AgentEventPayload::Plan { plan: plan.clone() });
    }

    pub fn step_started(&self, step: &PlanStep, iteration: u32) {
        self.notify("on_step_started", |h| h.on_step_started(step, iteration));
        self.emit(AgentEventPayload::StepStart {
            step: step.clone(),
            iteration,
        });
    }

    pub fn tool_call(&self, call: &ToolCall) {
        self.notify("on_tool_call", |h| h.on_tool_call(call));
    }

    pub fn observation(&self, observation: &Observation) {
        self.notify("on_observation", |h| h.on_observation(observation));
        self.emit(AgentEventPayload::Observation {
            observation: observation.clone(),
        });
    }

    pub fn reflection(&self, reflection: &Reflection) {
        self.notify("on_reflection", |h| h.on_reflection(reflection));
        self.emit(AgentEventPayload::Reflection {
            reflection: reflection.clone(),
        });
    }

    pub fn status_change(&self, from: AgentStatus, to: AgentStatus) {
        if from != to {
            self.notify("on_status_change", |h| h.on_status_change(from, to));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    impl AgentHook for Counting {
        fn on_plan_generated(&self, _plan: &Plan) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Broken;

    impl AgentHook for Broken {
        fn on_plan_generated(&self, _plan: &Plan) -> anyhow::Result<()> {
            panic!("hook bug");
        }

        fn on_observation(&self, _observation: &Observation) -> anyhow::Result<()> {
            anyhow::bail!("cannot observe")
        }
    }

    #[test]
    fn test_event_json_shape() {
        let event = AgentEvent::new(AgentEventPayload::Plan {
            plan: Plan::fallback("x"),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "agent-plan");
        assert_eq!(json["payload"]["plan"]["steps"][0]["description"], "x");
        assert!(json["timestamp"].is_string());
        assert!(!event.is_terminal());

        let back: AgentEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_failing_hooks_do_not_stop_others() {
        let counter = Arc::new(Counting(AtomicUsize::new(0)));
        let mut bus = EventBus::new();
        bus.subscribe(Arc::new(Broken));
        bus.subscribe(counter.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.set_sink(Some(tx));

        bus.plan_generated(&Plan::fallback("x"));
        bus.observation(&Observation::new("seen", true));

        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(rx.try_recv().unwrap().kind(), "agent-plan");
        assert_eq!(rx.try_recv().unwrap().kind(), "agent-observation");
    }
}
