//! 状态定义：AgentStatus、AgentState 与计划 / 观察 / 反思记录
//!
//! AgentState 由 Agent 独占并修改；整体可序列化，供 CheckpointStore 做快照与恢复。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::memory::Message;

/// Agent 状态机阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Planning,
    Executing,
    Reflecting,
    Complete,
    Failed,
    Aborted,
}

impl AgentStatus {
    /// 终态：complete / failed / aborted
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentStatus::Complete | AgentStatus::Failed | AgentStatus::Aborted
        )
    }
}

impl Default for AgentStatus {
    fn default() -> Self {
        AgentStatus::Idle
    }
}

/// 步骤中计划调用的工具；LLM 可以只给名字，也可以给 {"name", "arguments"}
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawStepTool")]
pub struct StepTool {
    pub name: String,
    pub arguments: Value,
}

impl StepTool {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, Value::Object(Default::default()))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawStepTool {
    Name(String),
    Call {
        name: String,
        #[serde(default, alias = "args")]
        arguments: Value,
    },
}

impl From<RawStepTool> for StepTool {
    fn from(raw: RawStepTool) -> Self {
        match raw {
            RawStepTool::Name(name) => StepTool::named(name),
            RawStepTool::Call { name, arguments } if arguments.is_null() => StepTool::named(name),
            RawStepTool::Call { name, arguments } => StepTool::new(name, arguments),
        }
    }
}

/// 计划中的单个步骤；dependencies 仅作参考元数据，执行顺序始终是列表顺序
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub number: usize,
    pub description: String,
    #[serde(default)]
    pub tools: Vec<StepTool>,
    #[serde(default)]
    pub dependencies: Vec<usize>,
    pub estimated_complexity: Option<String>,
    pub expected_outcome: Option<String>,
}

impl PlanStep {
    pub fn new(number: usize, description: impl Into<String>) -> Self {
        Self {
            number,
            description: description.into(),
            tools: Vec::new(),
            dependencies: Vec::new(),
            estimated_complexity: None,
            expected_outcome: None,
        }
    }

    pub fn with_tool(mut self, tool: StepTool) -> Self {
        self.tools.push(tool);
        self
    }
}

/// 每个任务生成一次的计划，之后只读
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
    pub estimated_complexity: Option<String>,
    pub estimated_tokens: Option<u64>,
}

impl Plan {
    pub fn new(steps: Vec<PlanStep>) -> Self {
        Self {
            steps,
            estimated_complexity: None,
            estimated_tokens: None,
        }
    }

    /// 解析失败时的兜底计划：单步，描述为原始任务文本
    pub fn fallback(task: &str) -> Self {
        Self::new(vec![PlanStep::new(1, task)])
    }
}

/// 一次步骤执行的观察结果；metadata.artifacts 可携带产物引用
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub content: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Value,
}

impl Observation {
    pub fn new(content: impl Into<String>, success: bool) -> Self {
        Self {
            content: content.into(),
            success,
            timestamp: Utc::now(),
            metadata: Value::Object(Default::default()),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        if !self.metadata.is_object() {
            self.metadata = Value::Object(Default::default());
        }
        if let Value::Object(map) = &mut self.metadata {
            map.insert(key.to_string(), value.into());
        }
        self
    }

    /// metadata.artifacts 中的字符串引用，保持原顺序
    pub fn artifacts(&self) -> Vec<String> {
        self.metadata
            .get("artifacts")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|a| a.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// 每轮迭代一次的反思；goal_achieved 或 !should_continue 即结束循环
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    pub goal_achieved: bool,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub next_actions: Vec<String>,
    pub should_continue: bool,
    pub timestamp: DateTime<Utc>,
}

impl Reflection {
    /// 保守反思：无法判断时一律停止
    pub fn conservative(issue: impl Into<String>) -> Self {
        Self {
            goal_achieved: false,
            issues: vec![issue.into()],
            next_actions: Vec::new(),
            should_continue: false,
            timestamp: Utc::now(),
        }
    }

    pub fn ends_loop(&self) -> bool {
        self.goal_achieved || !self.should_continue
    }
}

/// Agent 的完整运行状态
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub status: AgentStatus,
    pub task: String,
    pub current_iteration: u32,
    pub current_step: usize,
    pub plan: Option<Plan>,
    pub history: Vec<Message>,
    pub observations: Vec<Observation>,
    pub reflections: Vec<Reflection>,
    pub tokens_used: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl AgentState {
    /// 新任务的初始状态
    pub fn for_task(task: &str) -> Self {
        Self {
            task: task.to_string(),
            start_time: Some(Utc::now()),
            ..Self::default()
        }
    }
}
