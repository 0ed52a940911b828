//! Error types for the taskweave domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.
//!
//! Only structural problems are fatal: an invalid plan shape or an exhausted
//! iteration budget. Tool- and oracle-level failures are fed back into the
//! decision loop as observations by the controllers.

use thiserror::Error;

use crate::turn::ConversationState;

/// The top-level error type for all taskweave operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Oracle errors ---
    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    // --- Plan shape errors ---
    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    // --- Run budget ---
    #[error("Maximum iterations exceeded after {iterations} iterations")]
    MaxIterationsExceeded {
        iterations: usize,
        /// The conversation as it stood when the budget ran out.
        conversation: Box<ConversationState>,
    },

    #[error("Run cancelled")]
    Cancelled { conversation: Box<ConversationState> },

    // --- Conversation invariants ---
    #[error("Conversation invariant violated: {0}")]
    Conversation(String),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The partial conversation carried by run-level failures, if any.
    pub fn conversation(&self) -> Option<&ConversationState> {
        match self {
            Self::MaxIterationsExceeded { conversation, .. }
            | Self::Cancelled { conversation } => Some(conversation),
            _ => None,
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_ms}ms")]
    Timeout { tool_name: String, timeout_ms: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Clone, Error)]
pub enum OracleError {
    #[error("Oracle unavailable: {0}")]
    Unavailable(String),

    #[error("Oracle call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Malformed oracle response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("Plan contains a dependency cycle through tasks {involved:?}")]
    Cyclic { involved: Vec<usize> },

    #[error("Task {task} depends on task {dependency}, but the plan only has {len} tasks")]
    DependencyOutOfRange {
        task: usize,
        dependency: usize,
        len: usize,
    },

    #[error("Plan contains no tasks")]
    Empty,
}
