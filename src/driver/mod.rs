//! Step driver -- runs multi-step network operations on top of the cancellation core.
//!
//! Split into focused submodules:
//! - [`context`] - Per-operation step registration, timeouts and events
//!
//! The driver owns no transport: steps are async closures that receive a
//! `CancellationToken` and perform the request however the caller likes.
//! What the driver guarantees is the hand-off: every step is registered with
//! the operation's [`CompositeTask`] before it is polled, and the spawned
//! orchestration future itself is attached to the composite so that a cancel
//! landing between two steps stops the operation too.

mod context;


pub use context::StepContext;

use crate::config::DriverConfig;
use crate::error::{Error, Result};
use crate::task::{Attach, Cancellable, CompositeTask};
use crate::types::{Event, TaskId};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Spawns logical operations and runs their steps
///
/// # Examples
///
/// ```no_run
/// use transfer_task::{DriverConfig, Result, StepDriver};
///
/// # async fn example() -> Result<()> {
/// let driver = StepDriver::new(DriverConfig::default())?;
///
/// let upload = driver.spawn("upload report.pdf", |ctx| async move {
///     let session = ctx.step("create-session", |_token| async { Ok(42u64) }).await?;
///     ctx.step("commit", |_token| async move { Ok(session) }).await
/// });
///
/// // From anywhere, at any time:
/// upload.cancel();
///
/// let outcome = upload.join().await;
/// assert!(outcome.map_or_else(|e| e.is_cancelled(), |_| true));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct StepDriver {
    config: Arc<DriverConfig>,
    event_tx: broadcast::Sender<Event>,
}

impl StepDriver {
    /// Create a driver, validating the configuration
    pub fn new(config: DriverConfig) -> Result<Self> {
        config.validate()?;
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity);
        Ok(Self {
            config: Arc::new(config),
            event_tx,
        })
    }

    /// Subscribe to lifecycle events of every operation run by this driver
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The driver's configuration
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Step context for a composite managed by the caller
    ///
    /// For drivers that run steps inline instead of through [`spawn`](Self::spawn).
    pub fn context(&self, task: CompositeTask) -> StepContext {
        StepContext::new(task, self.config.clone(), self.event_tx.clone())
    }

    /// Spawn a logical operation on the tokio runtime
    ///
    /// `f` receives the operation's [`StepContext`] and returns the future
    /// orchestrating its steps. The returned handle exposes the composite
    /// task for cancellation and the join for the outcome.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F, Fut, T>(&self, name: impl Into<String>, f: F) -> OperationHandle<T>
    where
        F: FnOnce(StepContext) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let name = name.into();
        let task = CompositeTask::new();
        let ctx = self.context(task.clone());

        tracing::info!(task_id = %task.id(), name = %name, "Operation started");
        ctx.emit(Event::OperationStarted {
            task_id: task.id(),
            name,
        });

        let orchestration = f(ctx.clone());
        let join = tokio::spawn(async move {
            let guard = AbortGuard { ctx: &ctx, armed: true };
            let result = orchestration.await;
            guard.disarm();
            finish(&ctx, &result);
            result
        });

        // The orchestration future may already have finished and completed
        // the composite, in which case the abort handle is simply dropped.
        if task.attach(join.abort_handle()) == Attach::CancelledOnArrival {
            tracing::debug!(task_id = %task.id(), "Operation cancelled before it was attached");
        }

        OperationHandle { task, join }
    }
}

/// Settle the composite once the orchestration future returned
fn finish<T>(ctx: &StepContext, result: &Result<T>) {
    let task = ctx.task();
    match result {
        Ok(_) => {
            if task.complete() {
                tracing::info!(task_id = %task.id(), steps = ctx.steps_started(), "Operation completed");
                ctx.emit(Event::OperationCompleted {
                    task_id: task.id(),
                    steps: ctx.steps_started(),
                });
            }
        }
        Err(e) if e.is_cancelled() => ctx.report_cancelled(ctx.current_step()),
        Err(e) => {
            tracing::warn!(task_id = %task.id(), error = %e, "Operation failed");
            task.complete();
        }
    }
}

/// Settles the composite when the orchestration future never returned
///
/// Dropped while armed means the future was either aborted through the
/// composite or unwound by a panic. Only the former is a cancellation.
struct AbortGuard<'a> {
    ctx: &'a StepContext,
    armed: bool,
}

impl AbortGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbortGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if std::thread::panicking() {
            let task = self.ctx.task();
            tracing::error!(task_id = %task.id(), step = ?self.ctx.current_step(), "Operation panicked");
            task.complete();
            return;
        }
        self.ctx.report_cancelled(self.ctx.current_step());
    }
}

/// Caller-side handle of a spawned operation
pub struct OperationHandle<T> {
    task: CompositeTask,
    join: JoinHandle<Result<T>>,
}

impl<T> OperationHandle<T> {
    /// Composite task of the operation
    pub fn task(&self) -> &CompositeTask {
        &self.task
    }

    /// Id of the operation's composite task
    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    /// Cancel the operation; safe to call any number of times from anywhere
    pub fn cancel(&self) {
        self.task.cancel();
    }

    /// Returns true once the orchestration future has stopped running
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the operation's outcome
    ///
    /// An operation stopped by [`cancel`](Self::cancel) yields an error for
    /// which [`Error::is_cancelled`] is true.
    pub async fn join(self) -> Result<T> {
        match self.join.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(Error::Cancelled { step: None }),
            Err(e) => Err(Error::Join(e)),
        }
    }
}

impl<T> std::fmt::Debug for OperationHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationHandle")
            .field("task", &self.task)
            .field("finished", &self.join.is_finished())
            .finish()
    }
}
