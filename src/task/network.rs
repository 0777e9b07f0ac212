//! Leaf task handle wrapping a single transport operation.

use super::{Attach, Cancellable, TransportOperation, lock};
use crate::types::{TaskId, TaskState};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Handle for exactly one in-flight network operation
///
/// Cheap to clone; clones share state. The transport operation is owned
/// exclusively by the handle and may be attached after creation (for example
/// once the request has actually been dispatched).
///
/// # Examples
///
/// ```
/// use tokio_util::sync::CancellationToken;
/// use transfer_task::{Cancellable, NetworkTask};
///
/// let token = CancellationToken::new();
/// let task = NetworkTask::with_operation(token.clone());
///
/// task.cancel();
/// task.cancel(); // idempotent
///
/// assert!(task.is_cancelled());
/// assert!(token.is_cancelled());
/// ```
#[derive(Clone)]
pub struct NetworkTask {
    id: TaskId,
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    state: TaskState,
    operation: Option<Box<dyn TransportOperation>>,
}

impl NetworkTask {
    /// Create a task with no transport operation attached yet
    #[must_use]
    pub fn new() -> Self {
        Self::from_parts(None)
    }

    /// Create a task that owns an already dispatched transport operation
    #[must_use]
    pub fn with_operation(operation: impl TransportOperation + 'static) -> Self {
        Self::from_parts(Some(Box::new(operation)))
    }

    fn from_parts(operation: Option<Box<dyn TransportOperation>>) -> Self {
        Self {
            id: TaskId::next(),
            inner: Arc::new(Mutex::new(Inner {
                state: TaskState::Active,
                operation,
            })),
        }
    }

    /// Attach (or replace) the transport operation
    ///
    /// If the task was cancelled before the operation was dispatched, the
    /// operation is cancelled right away instead of being stored.
    pub fn attach(&self, operation: impl TransportOperation + 'static) -> Attach {
        let mut inner = lock(&self.inner);
        match inner.state {
            TaskState::Active => {
                inner.operation = Some(Box::new(operation));
                Attach::Attached
            }
            TaskState::Cancelled => {
                drop(inner);
                TransportOperation::cancel(&operation);
                tracing::debug!(task_id = %self.id, "Operation cancelled on attach");
                Attach::CancelledOnArrival
            }
            TaskState::Completed => Attach::Discarded,
        }
    }

    /// Mark the operation as settled on its own
    ///
    /// Releases the transport handle. Returns false if the task had already
    /// been cancelled or completed.
    pub fn complete(&self) -> bool {
        let released = {
            let mut inner = lock(&self.inner);
            if inner.state != TaskState::Active {
                return false;
            }
            inner.state = TaskState::Completed;
            inner.operation.take()
        };
        drop(released);
        tracing::trace!(task_id = %self.id, "Network task completed");
        true
    }

    /// Returns true if a transport operation is currently attached
    pub fn has_operation(&self) -> bool {
        lock(&self.inner).operation.is_some()
    }
}

impl Default for NetworkTask {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancellable for NetworkTask {
    fn id(&self) -> TaskId {
        self.id
    }

    fn cancel(&self) {
        let operation = {
            let mut inner = lock(&self.inner);
            if inner.state != TaskState::Active {
                return;
            }
            inner.state = TaskState::Cancelled;
            inner.operation.take()
        };

        tracing::debug!(
            task_id = %self.id,
            has_operation = operation.is_some(),
            "Network task cancelled"
        );

        if let Some(operation) = operation {
            TransportOperation::cancel(&operation);
        }
    }

    fn state(&self) -> TaskState {
        lock(&self.inner).state
    }
}

impl fmt::Debug for NetworkTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("NetworkTask")
            .field("id", &self.id)
            .field("state", &inner.state)
            .field("has_operation", &inner.operation.is_some())
            .finish()
    }
}
