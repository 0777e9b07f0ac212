//! Group of steps running side by side (e.g. parallel part uploads).

use super::{Cancellable, Registration, lock};
use crate::types::{TaskId, TaskState};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Set of concurrently running tasks sharing one cancellation
///
/// The multi-member counterpart of the composite's nested slot: each
/// registration is checked against the cancelled state in the same critical
/// section that inserts it, so a member can never slip in after `cancel()`
/// without being cancelled itself.
///
/// A group is itself [`Cancellable`] and is usually registered as one step of
/// a [`CompositeTask`](super::CompositeTask).
#[derive(Clone)]
pub struct TaskGroup {
    id: TaskId,
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    state: TaskState,
    members: HashMap<TaskId, Box<dyn Cancellable>>,
}

impl TaskGroup {
    /// Create an empty group
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: TaskId::next(),
            inner: Arc::new(Mutex::new(Inner {
                state: TaskState::Active,
                members: HashMap::new(),
            })),
        }
    }

    /// Add a member that is about to run
    ///
    /// Unlike a composite, registrations may happen from several tasks at once.
    pub fn register(&self, task: impl Cancellable + 'static) -> Registration {
        let member_id = task.id();
        let mut inner = lock(&self.inner);
        match inner.state {
            TaskState::Active => {
                inner.members.insert(member_id, Box::new(task));
                Registration::Stored
            }
            TaskState::Cancelled => {
                drop(inner);
                task.cancel();
                if !task.is_cancelled() {
                    return Registration::Discarded;
                }
                tracing::debug!(
                    group_id = %self.id,
                    member_id = %member_id,
                    "Group member cancelled on arrival"
                );
                Registration::CancelledOnArrival
            }
            TaskState::Completed => Registration::Discarded,
        }
    }

    /// Remove a member whose operation settled
    ///
    /// Retired members are out of reach of later `cancel()` calls.
    pub fn retire(&self, id: TaskId) -> bool {
        let removed = lock(&self.inner).members.remove(&id);
        removed.is_some()
    }

    /// Number of members currently tracked
    pub fn len(&self) -> usize {
        lock(&self.inner).members.len()
    }

    /// Returns true if no member is currently tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark the group as finished and release every member
    pub fn complete(&self) -> bool {
        let released = {
            let mut inner = lock(&self.inner);
            if inner.state != TaskState::Active {
                return false;
            }
            inner.state = TaskState::Completed;
            std::mem::take(&mut inner.members)
        };
        drop(released);
        true
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancellable for TaskGroup {
    fn id(&self) -> TaskId {
        self.id
    }

    fn cancel(&self) {
        let members = {
            let mut inner = lock(&self.inner);
            if inner.state != TaskState::Active {
                return;
            }
            inner.state = TaskState::Cancelled;
            std::mem::take(&mut inner.members)
        };

        tracing::debug!(
            group_id = %self.id,
            members = members.len(),
            "Task group cancelled"
        );

        for member in members.into_values() {
            Cancellable::cancel(&member);
        }
    }

    fn state(&self) -> TaskState {
        lock(&self.inner).state
    }
}

impl fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.inner);
        f.debug_struct("TaskGroup")
            .field("id", &self.id)
            .field("state", &inner.state)
            .field("members", &inner.members.len())
            .finish()
    }
}
