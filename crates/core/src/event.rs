//! Domain event system: observable execution for every controller.
//!
//! Controllers publish events as runs progress. Subscribers (loggers,
//! dashboards, tests) react without being coupled to the controllers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// One decide → act → observe iteration finished
    IterationCompleted {
        conversation_id: String,
        iteration: usize,
        tool_calls: usize,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed (or rejected as unknown)
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A plan passed validation
    PlanValidated {
        task_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A plan task changed status
    TaskStatusChanged {
        task_id: usize,
        status: String,
        timestamp: DateTime<Utc>,
    },

    /// A reflexion attempt finished
    AttemptFinished {
        attempt: usize,
        success: bool,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
