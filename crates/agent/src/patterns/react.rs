//! ReAct pattern: decide → act → observe loop for a single task.
//!
//! Each iteration asks the oracle for a decision. A final answer ends the
//! run; otherwise every requested tool call is dispatched in order and its
//! result is appended to the conversation before the next decision.
//!
//! # Failure handling
//!
//! - Unknown tool names become error observations, the run continues.
//! - Tool errors and tool timeouts become error observations.
//! - Oracle errors and oracle timeouts are appended as error turns and
//!   consume the iteration.
//! - Running out of iterations fails with
//!   [`Error::MaxIterationsExceeded`], carrying the partial conversation.

use chrono::Utc;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use taskweave_config::IterationConfig;
use taskweave_core::error::{Error, OracleError, Result, ToolError};
use taskweave_core::event::{DomainEvent, EventBus};
use taskweave_core::oracle::{Decision, DecisionOracle};
use taskweave_core::tool::{ToolCall, ToolInvoker, ToolResult, ToolSpec};
use taskweave_core::turn::{ConversationState, Turn};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Timeouts applied to every oracle and tool call.
#[derive(Debug, Clone)]
pub struct IterationOptions {
    pub oracle_timeout: Duration,
    pub tool_timeout: Duration,
}

impl Default for IterationOptions {
    fn default() -> Self {
        Self::from(&IterationConfig::default())
    }
}

impl From<&IterationConfig> for IterationOptions {
    fn from(config: &IterationConfig) -> Self {
        Self {
            oracle_timeout: Duration::from_secs(config.oracle_timeout_secs),
            tool_timeout: Duration::from_secs(config.tool_timeout_secs),
        }
    }
}

/// Drives the ReAct loop.
///
/// Cheap to clone: the oracle, invoker, and resolved catalog are shared.
#[derive(Clone)]
pub struct IterationController {
    /// Decision oracle.
    oracle: Arc<dyn DecisionOracle>,
    /// Tool invoker.
    tools: Arc<dyn ToolInvoker>,
    /// Catalog resolved once at construction, keyed by tool name.
    catalog: Arc<HashMap<String, ToolSpec>>,
    /// Catalog in the order sent to the oracle.
    specs: Arc<[ToolSpec]>,
    /// Call timeouts.
    options: IterationOptions,
    /// Event bus.
    event_bus: Arc<EventBus>,
    /// Optional cancellation, checked before each iteration.
    cancel: Option<CancellationToken>,
}

/// The result of a completed run.
#[derive(Debug, Clone)]
pub struct IterationOutcome {
    /// The final answer text (empty when the oracle ended without one).
    pub answer: String,
    /// Every turn of the run.
    pub conversation: ConversationState,
    /// Number of iterations used.
    pub iterations: usize,
    /// Total tool calls dispatched.
    pub tool_calls_made: usize,
}

impl IterationController {
    /// Create a new controller. The tool catalog is resolved here.
    pub fn new(
        oracle: Arc<dyn DecisionOracle>,
        tools: Arc<dyn ToolInvoker>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let specs: Vec<ToolSpec> = tools.catalog();
        let catalog = specs
            .iter()
            .map(|spec| (spec.name.clone(), spec.clone()))
            .collect();
        Self {
            oracle,
            tools,
            catalog: Arc::new(catalog),
            specs: specs.into(),
            options: IterationOptions::default(),
            event_bus,
            cancel: None,
        }
    }

    /// Set the call timeouts.
    pub fn with_options(mut self, options: IterationOptions) -> Self {
        self.options = options;
        self
    }

    /// Abort between iterations once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// A copy of this controller that ignores cancellation.
    pub(crate) fn detached(&self) -> Self {
        Self {
            cancel: None,
            ..self.clone()
        }
    }

    /// The catalog sent to the oracle.
    pub fn tool_specs(&self) -> &[ToolSpec] {
        &self.specs
    }

    pub fn oracle(&self) -> &Arc<dyn DecisionOracle> {
        &self.oracle
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Run the loop for `goal` with at most `max_iterations` iterations.
    pub async fn run(&self, goal: &str, max_iterations: usize) -> Result<IterationOutcome> {
        self.run_with_context(&[], goal, max_iterations).await
    }

    /// Run the loop with extra context turns placed before the goal.
    ///
    /// Used by the scheduler (results of completed dependencies) and by the
    /// reflexion controller (earlier attempts and their reflections).
    pub async fn run_with_context(
        &self,
        context: &[String],
        goal: &str,
        max_iterations: usize,
    ) -> Result<IterationOutcome> {
        let mut conversation = ConversationState::new();
        for entry in context {
            conversation.append(Turn::user(entry.as_str()))?;
        }
        conversation.append(Turn::user(goal))?;

        let mut tool_calls_made = 0usize;

        info!(
            oracle = self.oracle.name(),
            max_iter = max_iterations,
            tools = self.specs.len(),
            "ReAct loop starting"
        );

        for iteration in 1..=max_iterations {
            if self.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
                info!(iteration, "ReAct loop cancelled");
                return Err(Error::Cancelled {
                    conversation: Box::new(conversation),
                });
            }

            debug!(iteration, turns = conversation.len(), "ReAct iteration");

            // ── Decide ──
            let decision = match self.decide(&conversation).await {
                Ok(decision) => decision,
                Err(e) => {
                    warn!(iteration, "Oracle call failed: {e}");
                    self.event_bus.publish(DomainEvent::ErrorOccurred {
                        context: "decide".into(),
                        error_message: e.to_string(),
                        timestamp: Utc::now(),
                    });
                    conversation.append(Turn::oracle_error(e.to_string()))?;
                    self.publish_iteration(&conversation, iteration, 0);
                    continue;
                }
            };

            // ── Check for final answer ──
            if decision.is_terminal() {
                let Decision {
                    final_answer,
                    thought,
                    ..
                } = decision;
                let answer = final_answer.unwrap_or_default();
                if answer.is_empty() {
                    debug!(iteration, "Oracle returned neither an answer nor tool calls");
                }
                conversation.append(Turn::oracle(answer.as_str()))?;
                if let Some(thought) = thought {
                    debug!(iteration, thought = %thought, "Final thought");
                }
                self.publish_iteration(&conversation, iteration, 0);

                info!(
                    iterations = iteration,
                    tool_calls = tool_calls_made,
                    "ReAct loop completed"
                );

                return Ok(IterationOutcome {
                    answer,
                    conversation,
                    iterations: iteration,
                    tool_calls_made,
                });
            }

            // ── Act ──
            let calls = normalize_call_ids(decision.tool_calls);
            conversation.append(Turn::oracle_tool_calls(
                decision.thought.unwrap_or_default(),
                calls.clone(),
            ))?;

            // ── Observe ──
            for call in &calls {
                let result = self.dispatch(call).await;
                conversation.append(Turn::tool_result(result))?;
                tool_calls_made += 1;
            }

            self.publish_iteration(&conversation, iteration, calls.len());
        }

        warn!("ReAct: max iterations reached ({max_iterations})");
        Err(Error::MaxIterationsExceeded {
            iterations: max_iterations,
            conversation: Box::new(conversation),
        })
    }

    async fn decide(&self, conversation: &ConversationState) -> std::result::Result<Decision, OracleError> {
        let timeout = self.options.oracle_timeout;
        match tokio::time::timeout(
            timeout,
            self.oracle.decide(conversation.snapshot(), &self.specs),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(OracleError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Execute one tool call. Never fails: every error becomes an
    /// error observation.
    async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        if !self.catalog.contains_key(&call.name) {
            let mut available: Vec<&str> = self.catalog.keys().map(String::as_str).collect();
            available.sort_unstable();
            warn!(tool = %call.name, "Oracle requested an unknown tool");
            self.publish_tool(&call.name, false, 0);
            return ToolResult::error(
                &call.id,
                format!(
                    "Error: {}. Available tools: [{}]",
                    ToolError::NotFound(call.name.clone()),
                    available.join(", ")
                ),
            );
        }

        debug!(tool = %call.name, id = %call.id, "Dispatching tool call");
        let timeout = self.options.tool_timeout;
        let start = Instant::now();
        let outcome = tokio::time::timeout(timeout, self.tools.invoke(&call.name, &call.arguments)).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(Ok(output)) => ToolResult::ok(&call.id, output),
            Ok(Err(e)) => ToolResult::error(&call.id, format!("Error: {e}")),
            Err(_) => {
                let e = ToolError::Timeout {
                    tool_name: call.name.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                };
                ToolResult::error(&call.id, format!("Error: {e}"))
            }
        };

        if result.is_error {
            warn!(tool = %call.name, "Tool call failed: {}", result.content);
        }
        self.publish_tool(&call.name, !result.is_error, duration_ms);
        result
    }

    fn publish_tool(&self, tool_name: &str, success: bool, duration_ms: u64) {
        self.event_bus.publish(DomainEvent::ToolExecuted {
            tool_name: tool_name.to_string(),
            success,
            duration_ms,
            timestamp: Utc::now(),
        });
    }

    fn publish_iteration(&self, conversation: &ConversationState, iteration: usize, tool_calls: usize) {
        self.event_bus.publish(DomainEvent::IterationCompleted {
            conversation_id: conversation.id().to_string(),
            iteration,
            tool_calls,
            timestamp: Utc::now(),
        });
    }
}

/// Give every call a unique, non-empty ID within the decision.
fn normalize_call_ids(calls: Vec<ToolCall>) -> Vec<ToolCall> {
    let mut seen = HashSet::new();
    calls
        .into_iter()
        .map(|mut call| {
            if call.id.is_empty() || !seen.insert(call.id.clone()) {
                let fresh = ToolCall::new(call.name.clone(), Default::default());
                call.id = fresh.id;
                seen.insert(call.id.clone());
            }
            call
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────
