//! # taskweave core
//!
//! Domain types, traits, and error definitions for the taskweave
//! orchestration engine. This crate has **no runtime logic**: it defines the
//! model that the controllers in `taskweave-agent` execute against.
//!
//! ## Seams
//!
//! The two external collaborators are traits here:
//! - [`DecisionOracle`] decides, plans, and reflects
//! - [`ToolInvoker`] executes named capabilities
//!
//! Both are injected into every controller, which keeps the engine testable
//! with scripted mocks.

pub mod error;
pub mod event;
pub mod oracle;
pub mod tool;
pub mod turn;

// Re-export key types at crate root for ergonomics
pub use error::{Error, OracleError, PlanError, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use oracle::{Decision, DecisionOracle, ReflectionRequest, TaskDescriptor};
pub use tool::{Tool, ToolArguments, ToolCall, ToolInvoker, ToolRegistry, ToolResult, ToolSpec};
pub use turn::{ConversationState, Turn, TurnContent, TurnRole};
