//! 认知层：推理策略抽象、Plan-Execute 实现（Planner + Critic）、过程事件与钩子

pub mod critic;
pub mod events;
pub mod plan_execute;
pub mod planner;
pub mod policy;

pub use critic::{parse_reflection, Critic};
pub use events::{AgentEvent, AgentEventPayload, AgentHook, EventBus};
pub use plan_execute::PlanExecutePolicy;
pub use planner::{extract_json, parse_plan, plan_from_json, Planner, DEFAULT_SYSTEM_PROMPT};
pub use policy::{PolicyContext, ReasoningPolicy, StepContext, StepResult};
