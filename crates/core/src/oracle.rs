//! DecisionOracle trait: the abstraction over the reasoning service.
//!
//! An oracle looks at a conversation and decides what happens next: either
//! a final answer or a list of tool calls. The same oracle also produces
//! plans (for the scheduler) and reflections (for the retry controller).
//!
//! Implementations: LLM-backed adapters, scripted replays, test mocks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::OracleError;
use crate::tool::{ToolCall, ToolSpec};
use crate::turn::Turn;

/// What the oracle wants to happen next.
///
/// A final answer takes precedence. A decision with neither a final answer
/// nor tool calls ends the run with an empty answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Optional reasoning text accompanying tool calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
}

impl Decision {
    /// A decision that ends the run with `answer`.
    pub fn answer(answer: impl Into<String>) -> Self {
        Self {
            final_answer: Some(answer.into()),
            ..Self::default()
        }
    }

    /// A decision that requests the given tool calls.
    pub fn call_tools(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::default()
        }
    }

    pub fn with_thought(mut self, thought: impl Into<String>) -> Self {
        self.thought = Some(thought.into());
        self
    }

    /// True when the run should stop after this decision.
    pub fn is_terminal(&self) -> bool {
        self.final_answer.is_some() || self.tool_calls.is_empty()
    }
}

/// One entry of an oracle-generated plan.
///
/// `dependencies` are indices into the same list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub description: String,
    #[serde(default)]
    pub dependencies: Vec<usize>,
}

impl TaskDescriptor {
    pub fn new(description: impl Into<String>, dependencies: Vec<usize>) -> Self {
        Self {
            description: description.into(),
            dependencies,
        }
    }

    /// Parse a plan from oracle text.
    ///
    /// Accepts a fenced ```json block or bare JSON, either an array of
    /// descriptors or an object with a `tasks` array.
    pub fn parse_list(text: &str) -> Result<Vec<TaskDescriptor>, OracleError> {
        let trimmed = text.trim();
        let json_str = if let Some(start) = trimmed.find("```json") {
            let rest = &trimmed[start + 7..];
            rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim())
        } else if trimmed.starts_with('{') || trimmed.starts_with('[') {
            trimmed
        } else if let (Some(start), Some(end)) = (trimmed.find('['), trimmed.rfind(']'))
            && start < end
        {
            &trimmed[start..=end]
        } else {
            trimmed
        };

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum PlanShape {
            List(Vec<TaskDescriptor>),
            Wrapped { tasks: Vec<TaskDescriptor> },
        }

        match serde_json::from_str::<PlanShape>(json_str) {
            Ok(PlanShape::List(tasks)) | Ok(PlanShape::Wrapped { tasks }) => Ok(tasks),
            Err(e) => Err(OracleError::MalformedResponse(format!(
                "invalid plan JSON: {e}"
            ))),
        }
    }
}

/// Input to the reflect role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionRequest {
    pub task: String,
    pub action_log: Vec<String>,
    pub result: String,
}

impl ReflectionRequest {
    /// Render the request as a single prompt.
    pub fn prompt(&self) -> String {
        let actions = if self.action_log.is_empty() {
            "(no actions taken)".to_string()
        } else {
            self.action_log
                .iter()
                .map(|a| format!("- {a}"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        format!(
            "The following attempt at a task failed.\n\n\
             Task: {}\n\nActions:\n{}\n\nResult: {}\n\n\
             In a few sentences, explain what went wrong and what to do differently next time.",
            self.task, actions, self.result
        )
    }
}

/// The core DecisionOracle trait.
///
/// Injected explicitly into every controller; there is no global client.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    /// A human-readable name for this oracle.
    fn name(&self) -> &str;

    /// Decide the next step given the conversation so far.
    async fn decide(&self, turns: &[Turn], tools: &[ToolSpec]) -> Result<Decision, OracleError>;

    /// Decompose a goal into dependent tasks.
    ///
    /// Default implementation reports that planning is unsupported.
    async fn plan(
        &self,
        _goal: &str,
        _tools: &[ToolSpec],
    ) -> Result<Vec<TaskDescriptor>, OracleError> {
        Err(OracleError::Unavailable(format!(
            "Oracle '{}' does not support planning",
            self.name()
        )))
    }

    /// Produce a short critique of a failed attempt.
    ///
    /// Default implementation calls `decide` with the reflection prompt and
    /// an empty tool catalog.
    async fn reflect(&self, request: &ReflectionRequest) -> Result<String, OracleError> {
        let turns = [Turn::user(request.prompt())];
        let decision = self.decide(&turns, &[]).await?;
        decision
            .final_answer
            .or(decision.thought)
            .ok_or_else(|| OracleError::MalformedResponse("reflection produced no text".into()))
    }
}
