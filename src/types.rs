//! Core types and events

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a task handle
///
/// Clones of a handle share the same id; every newly created task gets a fresh one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Allocate the next unused id
    pub fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<TaskId> for u64 {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a task handle
///
/// `Active` is the only non-terminal state. A task leaves it exactly once,
/// either through `cancel()` or through `complete()`, whichever gets there first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Operation dispatched (or about to be) and not yet settled
    #[default]
    Active,
    /// Cancellation was requested before the operation settled
    Cancelled,
    /// Operation settled on its own; later `cancel()` calls are no-ops
    Completed,
}

impl TaskState {
    /// Returns true for `Cancelled` and `Completed`
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskState::Active)
    }
}

/// Event emitted by the step driver during an operation's lifecycle
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A logical operation was spawned
    OperationStarted {
        /// Composite task id of the operation
        task_id: TaskId,
        /// Operation name
        name: String,
    },

    /// A step was registered with its composite and dispatched
    StepStarted {
        /// Composite task id of the operation
        task_id: TaskId,
        /// Id of the step's own task handle
        step_id: TaskId,
        /// Step name
        step: String,
        /// Zero-based position of the step within the operation
        index: u32,
    },

    /// A step settled successfully
    StepCompleted {
        /// Composite task id of the operation
        task_id: TaskId,
        /// Id of the step's own task handle
        step_id: TaskId,
        /// Step name
        step: String,
    },

    /// A step failed with a transport error or timed out
    StepFailed {
        /// Composite task id of the operation
        task_id: TaskId,
        /// Id of the step's own task handle
        step_id: TaskId,
        /// Step name
        step: String,
        /// Error message
        error: String,
    },

    /// The operation observed a cancellation
    Cancelled {
        /// Composite task id of the operation
        task_id: TaskId,
        /// Step that was in flight or being registered, if any
        #[serde(skip_serializing_if = "Option::is_none")]
        step: Option<String>,
    },

    /// The logical operation finished successfully
    OperationCompleted {
        /// Composite task id of the operation
        task_id: TaskId,
        /// Number of steps that ran
        steps: u32,
    },
}

impl Event {
    /// Composite task id the event belongs to
    pub fn task_id(&self) -> TaskId {
        match self {
            Event::OperationStarted { task_id, .. }
            | Event::StepStarted { task_id, .. }
            | Event::StepCompleted { task_id, .. }
            | Event::StepFailed { task_id, .. }
            | Event::Cancelled { task_id, .. }
            | Event::OperationCompleted { task_id, .. } => *task_id,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_ids_are_unique() {
        let a = TaskId::next();
        let b = TaskId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TaskState::Active.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(TaskState::Completed.is_terminal());
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = Event::Cancelled {
            task_id: TaskId(7),
            step: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "cancelled", "task_id": 7 }));

        let event = Event::StepStarted {
            task_id: TaskId(7),
            step_id: TaskId(8),
            step: "upload-part".into(),
            index: 2,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.task_id(), TaskId(7));
    }
}
