//! Composite task handle for logical multi-step operations.
//!
//! A chunked upload is a chain of requests (create session, upload parts,
//! commit) where the next request is only known once the previous one has
//! settled. The caller holds a single [`CompositeTask`] for the whole chain,
//! and the driver registers each step with it as the step begins.

use super::{Attach, Cancellable, Registration, TransportOperation, lock};
use crate::types::{TaskId, TaskState};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Handle for a logical operation that delegates to a sequence of steps
///
/// Holds at most one nested step at a time. Cancellation is lossless with
/// respect to registration: once `cancel()` has run, every step registered
/// afterwards is cancelled on arrival, and the step registered before it (if
/// still running) receives the cancel through forwarding.
///
/// # Examples
///
/// ```
/// use transfer_task::{Cancellable, CompositeTask, NetworkTask, Registration};
///
/// let upload = CompositeTask::new();
/// upload.cancel();
///
/// let part = NetworkTask::new();
/// assert_eq!(upload.register_nested(part.clone()), Registration::CancelledOnArrival);
/// assert!(part.is_cancelled());
/// ```
#[derive(Clone)]
pub struct CompositeTask {
    id: TaskId,
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    state: TaskState,
    operation: Option<Box<dyn TransportOperation>>,
    nested: Option<Box<dyn Cancellable>>,
}

impl CompositeTask {
    /// Create a composite with no operation attached and no step registered
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: TaskId::next(),
            inner: Arc::new(Mutex::new(Inner {
                state: TaskState::Active,
                operation: None,
                nested: None,
            })),
        }
    }

    /// Attach an operation owned directly by the composite
    ///
    /// Used for work that spans all steps, such as the spawned task driving
    /// them. Follows the same cancelled-on-arrival rule as steps.
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
                Attach::CancelledOnArrival
            }
            TaskState::Completed => Attach::Discarded,
        }
    }

    /// Register the step that is about to run
    ///
    /// Called by the driver once per step, never concurrently with itself.
    /// May race with `cancel()`: the cancelled check and the store happen in
    /// one critical section, so a concurrent cancel either sees this step in
    /// the slot or this call sees the cancelled state.
    ///
    /// The previous step is assumed settled and is released, not cancelled.
    pub fn register_nested(&self, task: impl Cancellable + 'static) -> Registration {
        let step_id = task.id();
        let mut inner = lock(&self.inner);
        match inner.state {
            TaskState::Active => {
                let previous = inner.nested.replace(Box::new(task));
                drop(inner);
                drop(previous);
                tracing::trace!(task_id = %self.id, step_id = %step_id, "Nested step registered");
                Registration::Stored
            }
            TaskState::Cancelled => {
                drop(inner);
                task.cancel();
                if !task.is_cancelled() {
                    // Already settled on its own, cancel() had no effect
                    tracing::debug!(
                        task_id = %self.id,
                        step_id = %step_id,
                        state = ?task.state(),
                        "Settled step registered after cancel, ignoring"
                    );
                    return Registration::Discarded;
                }
                tracing::debug!(
                    task_id = %self.id,
                    step_id = %step_id,
                    "Nested step cancelled on arrival"
                );
                Registration::CancelledOnArrival
            }
            TaskState::Completed => {
                drop(inner);
                tracing::warn!(
                    task_id = %self.id,
                    step_id = %step_id,
                    "Step registered after operation completed, ignoring"
                );
                Registration::Discarded
            }
        }
    }

    /// Drop the nested step if it is still `id`
    ///
    /// Lets the driver release a settled step without waiting for the next
    /// registration. Returns true if the slot held `id`.
    pub fn release_nested(&self, id: TaskId) -> bool {
        let released = {
            let mut inner = lock(&self.inner);
            match inner.nested.as_ref() {
                Some(nested) if nested.id() == id => inner.nested.take(),
                _ => None,
            }
        };
        released.is_some()
    }

    /// Id of the currently registered step, if any
    pub fn nested_id(&self) -> Option<TaskId> {
        lock(&self.inner).nested.as_ref().map(|nested| nested.id())
    }

    /// Mark the whole operation as finished
    ///
    /// Releases the operation and the nested step. Returns false if the
    /// composite had already been cancelled or completed.
    pub fn complete(&self) -> bool {
        let released = {
            let mut inner = lock(&self.inner);
            if inner.state != TaskState::Active {
                return false;
            }
            inner.state = TaskState::Completed;
            (inner.operation.take(), inner.nested.take())
        };
        drop(released);
        tracing::debug!(task_id = %self.id, "Composite task completed");
        true
    }
}

impl Default for CompositeTask {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancellable for CompositeTask {
    fn id(&self) -> TaskId {
        self.id
    }

    fn cancel(&self) {
        let (operation, nested) = {
            let mut inner = lock(&self.inner);
            if inner.state != TaskState::Active {
                return;
            }
            inner.state = TaskState::Cancelled;
            (inner.operation.take(), inner.nested.take())
        };

        tracing::debug!(
            task_id = %self.id,
            nested = ?nested.as_ref().map(|n| n.id()),
            "Composite task cancelled"
        );

        if let Some(operation) = operation {
            TransportOperation::cancel(&operation);
        }
        if let Some(nested) = nested {
            Cancellable::cancel(&nested);
        }
    }

    fn state(&self) -> TaskState {
        lock(&self.inner).state
    }
}

impl fmt::Debug for CompositeTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("CompositeTask")
            .field("id", &self.id)
            .field("state", &inner.state)
            .field("has_operation", &inner.operation.is_some())
            .field("nested", &inner.nested.as_ref().map(|n| n.id()))
            .finish()
    }
}
