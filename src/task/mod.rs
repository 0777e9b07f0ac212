//! Cancellable task handles -- the cancellation core.
//!
//! Split into focused submodules:
//! - [`network`] - Leaf handle wrapping exactly one transport operation
//! - [`composite`] - Logical multi-step operation forwarding cancellation to its current step
//! - [`group`] - Set of concurrently running steps sharing one cancellation
//!
//! Every handle keeps its state and its slots under a single mutex, so the
//! "check cancelled, then store" sequence can never interleave with `cancel()`.
//! Cancel signals to transports and nested tasks are sent after that lock is
//! released.

mod composite;
mod group;
mod network;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use composite::CompositeTask;
pub use group::TaskGroup;
pub use network::NetworkTask;

use crate::types::{TaskId, TaskState};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

/// The `{cancel()}` capability shared by leaf, composite and group handles
///
/// Implementations must make `cancel()` idempotent, non-blocking and safe to
/// call from any number of threads at once.
pub trait Cancellable: Send + Sync {
    /// Process-unique id of this handle
    fn id(&self) -> TaskId;

    /// Request cancellation; a no-op once the task reached a terminal state
    ///
    /// The state flips before this returns, but signals to transports and
    /// nested tasks are sent after the handle's lock is released. A `cancel()`
    /// that loses the race to another canceller therefore returns at once,
    /// possibly before the winner has finished forwarding the signal.
    fn cancel(&self);

    /// Current lifecycle state
    fn state(&self) -> TaskState;

    /// Returns true once `cancel()` took effect
    fn is_cancelled(&self) -> bool {
        self.state() == TaskState::Cancelled
    }
}

impl<T: Cancellable + ?Sized> Cancellable for Arc<T> {
    fn id(&self) -> TaskId {
        (**self).id()
    }

    fn cancel(&self) {
        (**self).cancel()
    }

    fn state(&self) -> TaskState {
        (**self).state()
    }
}

impl<T: Cancellable + ?Sized> Cancellable for Box<T> {
    fn id(&self) -> TaskId {
        (**self).id()
    }

    fn cancel(&self) {
        (**self).cancel()
    }

    fn state(&self) -> TaskState {
        (**self).state()
    }
}

/// Cancel primitive of a dispatched transport-level operation
///
/// Must be idempotent and safe to call after the operation already finished.
pub trait TransportOperation: Send + Sync {
    /// Ask the transport to stop the operation (best effort)
    fn cancel(&self);
}

impl TransportOperation for CancellationToken {
    fn cancel(&self) {
        CancellationToken::cancel(self)
    }
}

impl TransportOperation for AbortHandle {
    fn cancel(&self) {
        self.abort()
    }
}

impl<T: TransportOperation + ?Sized> TransportOperation for Arc<T> {
    fn cancel(&self) {
        (**self).cancel()
    }
}

impl<T: TransportOperation + ?Sized> TransportOperation for Box<T> {
    fn cancel(&self) {
        (**self).cancel()
    }
}

/// Outcome of handing a task to a composite or a group
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Registration {
    /// The task is now the tracked step and will receive future cancellations
    Stored,
    /// The owner was already cancelled; the task was cancelled and not retained
    CancelledOnArrival,
    /// Not retained and left untouched: either the owner already completed,
    /// or the owner was cancelled but the task had itself already settled
    Discarded,
}

impl Registration {
    /// Returns true if the task was accepted and may proceed
    pub fn is_stored(&self) -> bool {
        matches!(self, Registration::Stored)
    }
}

/// Outcome of attaching a transport operation to a task handle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attach {
    /// The operation is now owned by the task
    Attached,
    /// The task was already cancelled; the operation was cancelled on arrival
    CancelledOnArrival,
    /// The task already completed; the operation was dropped untouched
    Discarded,
}

/// Lock a task's shared state, recovering from poisoning
///
/// Critical sections never panic midway through a state change, so the data
/// behind a poisoned lock is still consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
