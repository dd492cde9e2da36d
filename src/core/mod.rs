//! 核心层：错误、状态、错误恢复、工具并发调度、Agent 构建

pub mod builder;
pub mod error;
pub mod recovery;
pub mod state;
pub mod task_scheduler;

pub use builder::AgentBuilder;
pub use error::AgentError;
pub use recovery::{
    classify, retry_with_recovery, ErrorCategory, ErrorRecovery, ErrorRecoveryPolicy,
    RecoveryContext, RecoveryOutcome, RecoveryStrategy, RecoveryThresholds, RetryAttempt,
};
pub use state::{
    AgentState, AgentStatus, Observation, Plan, PlanStep, Reflection, StepTool,
};
pub use task_scheduler::TaskScheduler;
