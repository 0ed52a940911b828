//! Turn and ConversationState domain types.
//!
//! A conversation is the append-only log a single run builds up:
//! user input → oracle decision → tool results → oracle decision → ...
//! Turns are never edited or removed once appended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::tool::{ToolCall, ToolResult};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    /// Goal text, task context, or attempt history supplied by the caller
    User,
    /// A decision returned by the oracle
    Oracle,
    /// The observation produced by one tool call
    ToolResult,
}

/// Turn payload: plain text or a structured JSON value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnContent {
    Text(String),
    Structured(serde_json::Value),
}

impl TurnContent {
    /// Render the content as text (structured values are serialized).
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Structured(value) => value.to_string(),
        }
    }
}

impl From<String> for TurnContent {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for TurnContent {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// A single immutable entry in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Unique turn ID
    pub id: String,

    /// Who produced this turn
    pub role: TurnRole,

    /// The payload
    pub content: TurnContent,

    /// If this is a tool result, which tool call it answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Tool calls requested by the oracle (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Set on failed tool results and on oracle failures fed back into the loop
    #[serde(default)]
    pub is_error: bool,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    fn new(role: TurnRole, content: TurnContent) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            tool_call_id: None,
            tool_calls: Vec::new(),
            is_error: false,
            timestamp: Utc::now(),
        }
    }

    /// Create a user turn.
    pub fn user(content: impl Into<TurnContent>) -> Self {
        Self::new(TurnRole::User, content.into())
    }

    /// Create an oracle turn that carries a final answer.
    pub fn oracle(content: impl Into<TurnContent>) -> Self {
        Self::new(TurnRole::Oracle, content.into())
    }

    /// Create an oracle turn requesting tool calls.
    pub fn oracle_tool_calls(thought: impl Into<TurnContent>, tool_calls: Vec<ToolCall>) -> Self {
        let mut turn = Self::new(TurnRole::Oracle, thought.into());
        turn.tool_calls = tool_calls;
        turn
    }

    /// Record a failed oracle call so the next decision can see it.
    pub fn oracle_error(message: impl Into<String>) -> Self {
        let mut turn = Self::new(
            TurnRole::Oracle,
            TurnContent::Structured(serde_json::json!({ "error": message.into() })),
        );
        turn.is_error = true;
        turn
    }

    /// Create a tool result turn.
    pub fn tool_result(result: ToolResult) -> Self {
        let mut turn = Self::new(TurnRole::ToolResult, TurnContent::Text(result.content));
        turn.tool_call_id = Some(result.tool_call_id);
        turn.is_error = result.is_error;
        turn
    }

    /// Text rendering of the content.
    pub fn text(&self) -> String {
        self.content.as_text()
    }
}

/// An ordered, append-only log of turns owned by a single run.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationState {
    id: String,
    turns: Vec<Turn>,
    /// Tool call IDs requested by the oracle and not yet answered.
    #[serde(skip)]
    pending: HashSet<String>,
    created_at: DateTime<Utc>,
}

impl ConversationState {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            turns: Vec::new(),
            pending: HashSet::new(),
            created_at: Utc::now(),
        }
    }

    /// Append a turn.
    ///
    /// Fails when a tool result answers no pending tool call, or when an
    /// oracle turn reuses a tool call ID that is still pending.
    pub fn append(&mut self, turn: Turn) -> Result<()> {
        match turn.role {
            TurnRole::ToolResult => {
                let Some(call_id) = turn.tool_call_id.as_deref() else {
                    return Err(Error::Conversation(
                        "tool result turn has no tool_call_id".into(),
                    ));
                };
                if !self.pending.remove(call_id) {
                    return Err(Error::Conversation(format!(
                        "tool result for '{call_id}' has no matching pending tool call"
                    )));
                }
            }
            TurnRole::Oracle => {
                for call in &turn.tool_calls {
                    if self.pending.contains(&call.id) {
                        return Err(Error::Conversation(format!(
                            "tool call id '{}' is already pending",
                            call.id
                        )));
                    }
                }
                self.pending
                    .extend(turn.tool_calls.iter().map(|c| c.id.clone()));
            }
            TurnRole::User => {}
        }
        self.turns.push(turn);
        Ok(())
    }

    /// Read-only view of every turn, in insertion order.
    pub fn snapshot(&self) -> &[Turn] {
        &self.turns
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Number of tool calls still waiting for a result.
    pub fn pending_tool_calls(&self) -> usize {
        self.pending.len()
    }

    /// Every tool call the oracle requested, in order.
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.turns
            .iter()
            .filter(|t| t.role == TurnRole::Oracle)
            .flat_map(|t| t.tool_calls.iter())
    }

    /// Text of the most recent non-error oracle turn.
    pub fn last_oracle_text(&self) -> Option<String> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == TurnRole::Oracle && !t.is_error)
            .map(Turn::text)
    }
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}
