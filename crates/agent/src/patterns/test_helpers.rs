//! Shared test helpers for pattern tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use taskweave_core::error::{OracleError, ToolError};
use taskweave_core::oracle::{Decision, DecisionOracle, ReflectionRequest, TaskDescriptor};
use taskweave_core::tool::{Tool, ToolArguments, ToolCall, ToolRegistry, ToolSpec};
use taskweave_core::turn::{Turn, TurnRole};

/// An oracle that returns a sequence of scripted decisions.
///
/// Each call to `decide` returns the next entry in the queue.
/// Panics if more calls are made than entries provided.
pub struct SequentialMockOracle {
    responses: Mutex<Vec<Result<Decision, OracleError>>>,
    call_count: Mutex<usize>,
    seen_turns: Mutex<Vec<usize>>,
    seen_user_turns: Mutex<Vec<Vec<String>>>,
    reflections: Mutex<Vec<String>>,
    reflect_requests: Mutex<Vec<ReflectionRequest>>,
}

impl SequentialMockOracle {
    pub fn new(responses: Vec<Decision>) -> Self {
        Self::with_results(responses.into_iter().map(Ok).collect())
    }

    pub fn with_results(responses: Vec<Result<Decision, OracleError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            call_count: Mutex::new(0),
            seen_turns: Mutex::new(Vec::new()),
            seen_user_turns: Mutex::new(Vec::new()),
            reflections: Mutex::new(Vec::new()),
            reflect_requests: Mutex::new(Vec::new()),
        }
    }

    /// An oracle that answers immediately.
    pub fn single_answer(text: &str) -> Self {
        Self::new(vec![Decision::answer(text)])
    }

    /// An oracle that first requests tool calls, then answers.
    pub fn tool_then_answer(tool_calls: Vec<ToolCall>, answer: &str) -> Self {
        Self::new(vec![Decision::call_tools(tool_calls), Decision::answer(answer)])
    }

    /// Reflections returned in order by `reflect`.
    pub fn with_reflections(self, reflections: Vec<&str>) -> Self {
        *self.reflections.lock().unwrap() = reflections.into_iter().map(String::from).collect();
        self
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    /// Conversation length observed by each `decide` call.
    pub fn seen_turn_counts(&self) -> Vec<usize> {
        self.seen_turns.lock().unwrap().clone()
    }

    /// User turn texts observed by each `decide` call.
    pub fn seen_user_turns(&self) -> Vec<Vec<String>> {
        self.seen_user_turns.lock().unwrap().clone()
    }

    pub fn reflect_requests(&self) -> Vec<ReflectionRequest> {
        self.reflect_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionOracle for SequentialMockOracle {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn decide(&self, turns: &[Turn], _tools: &[ToolSpec]) -> Result<Decision, OracleError> {
        let mut count = self.call_count.lock().unwrap();
        let responses = self.responses.lock().unwrap();

        if *count >= responses.len() {
            panic!(
                "SequentialMockOracle: no more responses (call #{}, have {})",
                *count,
                responses.len()
            );
        }

        self.seen_turns.lock().unwrap().push(turns.len());
        self.seen_user_turns.lock().unwrap().push(
            turns
                .iter()
                .filter(|t| t.role == TurnRole::User)
                .map(Turn::text)
                .collect(),
        );
        let response = responses[*count].clone();
        *count += 1;
        response
    }

    async fn plan(&self, _goal: &str, _tools: &[ToolSpec]) -> Result<Vec<TaskDescriptor>, OracleError> {
        Err(OracleError::Unavailable("no plan scripted".into()))
    }

    async fn reflect(&self, request: &ReflectionRequest) -> Result<String, OracleError> {
        self.reflect_requests.lock().unwrap().push(request.clone());
        let mut reflections = self.reflections.lock().unwrap();
        if reflections.is_empty() {
            return Err(OracleError::Unavailable("no reflection scripted".into()));
        }
        Ok(reflections.remove(0))
    }
}

/// An oracle that requests a tool call forever.
#[derive(Default)]
pub struct LoopingOracle {
    calls: AtomicUsize,
}

impl LoopingOracle {
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DecisionOracle for LoopingOracle {
    fn name(&self) -> &str {
        "looping_mock"
    }

    async fn decide(&self, _turns: &[Turn], _tools: &[ToolSpec]) -> Result<Decision, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Decision::call_tools(vec![ToolCall::new(
            "echo",
            args(serde_json::json!({"text": "again"})),
        )]))
    }
}

/// How a [`KeyedMockOracle`] responds to a given goal.
#[derive(Clone)]
pub enum Behavior {
    /// Answer immediately.
    Answer(String),
    /// Sleep, then answer.
    DelayedAnswer(Duration, String),
    /// Never answer; keep requesting tool calls.
    Loop,
}

/// An oracle keyed by the last user turn, safe to share across concurrent runs.
///
/// Records the order in which goals were first seen and the peak number of
/// concurrent `decide` calls.
pub struct KeyedMockOracle {
    behaviors: HashMap<String, Behavior>,
    plan: Vec<TaskDescriptor>,
    started: Mutex<Vec<String>>,
    contexts: Mutex<HashMap<String, Vec<String>>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl KeyedMockOracle {
    pub fn new(plan: Vec<TaskDescriptor>) -> Self {
        Self {
            behaviors: HashMap::new(),
            plan,
            started: Mutex::new(Vec::new()),
            contexts: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn on(mut self, goal: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(goal.to_string(), behavior);
        self
    }

    /// Goals in the order their first decision was requested.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    /// Context turns (user turns before the goal) seen for `goal`.
    pub fn context_for(&self, goal: &str) -> Vec<String> {
        self.contexts
            .lock()
            .unwrap()
            .get(goal)
            .cloned()
            .unwrap_or_default()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DecisionOracle for KeyedMockOracle {
    fn name(&self) -> &str {
        "keyed_mock"
    }

    async fn decide(&self, turns: &[Turn], _tools: &[ToolSpec]) -> Result<Decision, OracleError> {
        let user_turns: Vec<String> = turns
            .iter()
            .filter(|t| t.role == TurnRole::User)
            .map(Turn::text)
            .collect();
        let Some((goal, context)) = user_turns.split_last() else {
            return Err(OracleError::MalformedResponse("no user turn".into()));
        };

        {
            let mut started = self.started.lock().unwrap();
            if !started.contains(goal) {
                started.push(goal.clone());
                self.contexts
                    .lock()
                    .unwrap()
                    .insert(goal.clone(), context.to_vec());
            }
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let decision = match self.behaviors.get(goal) {
            Some(Behavior::Answer(text)) => Decision::answer(text.as_str()),
            Some(Behavior::DelayedAnswer(delay, text)) => {
                tokio::time::sleep(*delay).await;
                Decision::answer(text.as_str())
            }
            Some(Behavior::Loop) => Decision::call_tools(vec![ToolCall::new(
                "echo",
                args(serde_json::json!({"text": "still working"})),
            )]),
            None => Decision::answer(format!("done: {goal}")),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(decision)
    }

    async fn plan(&self, _goal: &str, _tools: &[ToolSpec]) -> Result<Vec<TaskDescriptor>, OracleError> {
        Ok(self.plan.clone())
    }
}

// ── Tools ──

/// Echoes its `text` argument.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echoes back the input"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }
    async fn execute(&self, arguments: &ToolArguments) -> Result<String, ToolError> {
        arguments
            .get("text")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| ToolError::InvalidArguments("missing 'text'".into()))
    }
}

/// Always fails.
pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "fail"
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }
    async fn execute(&self, _arguments: &ToolArguments) -> Result<String, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "fail".into(),
            reason: "backend exploded".into(),
        })
    }
}

/// Sleeps for a long time before answering.
pub struct SlowTool;

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }
    fn description(&self) -> &str {
        "Takes a very long time"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }
    async fn execute(&self, _arguments: &ToolArguments) -> Result<String, ToolError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok("finally".into())
    }
}

/// Registry with `echo`, `fail`, and `slow`.
pub fn test_registry() -> ToolRegistry {
    ToolRegistry::new().with(EchoTool).with(FailingTool).with(SlowTool)
}

pub fn args(value: serde_json::Value) -> ToolArguments {
    value.as_object().cloned().unwrap_or_default()
}

/// Helper to create a tool call with a fixed ID.
pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: args(arguments),
    }
}

pub fn echo_call(id: &str, text: &str) -> ToolCall {
    tool_call(id, "echo", serde_json::json!({ "text": text }))
}
