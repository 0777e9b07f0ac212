//! # transfer-task
//!
//! Composable cancellable task handles for multi-step network transfers.
//!
//! A large upload is not one request but a chain of them: create an upload
//! session, send the parts, commit. The caller gets one handle for the whole
//! chain and expects `cancel()` to work no matter which request happens to be
//! in flight, or whether the next one has been dispatched yet.
//!
//! ## Building blocks
//!
//! - [`NetworkTask`] - leaf handle owning exactly one transport operation
//! - [`CompositeTask`] - handle for a logical operation; forwards `cancel()`
//!   to whichever step is current and cancels any step registered afterwards
//! - [`TaskGroup`] - several steps in flight at once under one cancellation
//! - [`StepDriver`] - runs operations on tokio, registering each step with the
//!   operation's composite before it is polled
//!
//! All three handles implement [`Cancellable`], so composites nest.
//!
//! ## Quick Start
//!
//! ```
//! use transfer_task::{Cancellable, CompositeTask, NetworkTask};
//!
//! let upload = CompositeTask::new();
//!
//! let create_session = NetworkTask::new();
//! upload.register_nested(create_session.clone());
//! create_session.complete();
//!
//! let upload_part = NetworkTask::new();
//! upload.register_nested(upload_part.clone());
//!
//! upload.cancel();
//!
//! assert!(!create_session.is_cancelled());
//! assert!(upload_part.is_cancelled());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Step driver for multi-step operations
pub mod driver;
/// Error types
pub mod error;
/// Cancellable task handles
pub mod task;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::DriverConfig;
pub use driver::{OperationHandle, StepContext, StepDriver};
pub use error::{Error, Result};
pub use task::{
    Attach, Cancellable, CompositeTask, NetworkTask, Registration, TaskGroup, TransportOperation,
};
pub use types::{Event, TaskId, TaskState};
