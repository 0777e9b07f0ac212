//! Per-operation step context -- registers each step with the composite and runs it.

use crate::config::DriverConfig;
use crate::error::{Error, Result};
use crate::task::{Cancellable, CompositeTask, NetworkTask, Registration, TaskGroup, lock};
use crate::types::{Event, TaskId};
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Handle given to an operation's orchestration code
///
/// Each call to [`step`](StepContext::step) or [`parallel`](StepContext::parallel)
/// registers a fresh task handle with the operation's [`CompositeTask`] before
/// the step's future is polled, so a cancel that lands at any point either
/// stops the step in flight or prevents the next one from starting.
#[derive(Clone)]
pub struct StepContext {
    task: CompositeTask,
    config: Arc<DriverConfig>,
    event_tx: broadcast::Sender<Event>,
    steps: Arc<AtomicU32>,
    current_step: Arc<Mutex<Option<String>>>,
    cancel_reported: Arc<AtomicBool>,
}

impl StepContext {
    pub(crate) fn new(
        task: CompositeTask,
        config: Arc<DriverConfig>,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            task,
            config,
            event_tx,
            steps: Arc::new(AtomicU32::new(0)),
            current_step: Arc::new(Mutex::new(None)),
            cancel_reported: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The composite task representing the whole operation
    pub fn task(&self) -> &CompositeTask {
        &self.task
    }

    /// Returns true once the operation has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.task.is_cancelled()
    }

    /// Number of steps started so far (parallel steps count once)
    pub fn steps_started(&self) -> u32 {
        self.steps.load(Ordering::SeqCst)
    }

    /// Fail fast with a cancellation error if the operation was cancelled
    ///
    /// For orchestration code doing local work between steps.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            let step = self.current_step();
            self.report_cancelled(step.clone());
            return Err(Error::Cancelled { step });
        }
        Ok(())
    }

    /// Run one network step
    ///
    /// `f` receives the step's cancellation token and returns the future
    /// performing the request. The step is registered with the composite
    /// before the future is created; if the operation was already cancelled
    /// the future is never created and `Error::Cancelled` is returned.
    pub async fn step<F, Fut, T>(&self, name: &str, f: F) -> Result<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let token = CancellationToken::new();
        let leaf = NetworkTask::with_operation(token.clone());
        let step_id = leaf.id();

        let index = self.begin(name, self.task.register_nested(leaf.clone()))?;
        tracing::debug!(task_id = %self.task.id(), step_id = %step_id, step = name, index, "Step started");
        self.emit(Event::StepStarted {
            task_id: self.task.id(),
            step_id,
            step: name.to_string(),
            index,
        });

        let result = settle(name, &token, self.config.step_timeout, f(token.clone())).await;
        settle_leaf(&leaf, &result);
        self.task.release_nested(step_id);
        self.end(name, step_id, &result);
        result
    }

    /// Run a step made of several requests in flight at once
    ///
    /// The requests share a [`TaskGroup`] registered as the composite's
    /// current step. At most `max_parallel_steps` run concurrently. The first
    /// failure cancels the remaining members. Results are returned in input
    /// order.
    pub async fn parallel<I, F, Fut, T>(&self, name: &str, parts: I) -> Result<Vec<T>>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let group = TaskGroup::new();
        let group_id = group.id();

        let index = self.begin(name, self.task.register_nested(group.clone()))?;
        tracing::debug!(task_id = %self.task.id(), step_id = %group_id, step = name, index, "Parallel step started");
        self.emit(Event::StepStarted {
            task_id: self.task.id(),
            step_id: group_id,
            step: name.to_string(),
            index,
        });

        let timeout = self.config.step_timeout;
        let (mut values, failure) = {
            let members = stream::iter(parts.into_iter().enumerate())
                .map(|(position, part)| {
                    let group = group.clone();
                    async move { (position, run_member(&group, name, timeout, part).await) }
                })
                .buffer_unordered(self.config.max_parallel_steps);
            let mut members = std::pin::pin!(members);

            let mut values = Vec::new();
            let mut failure = None;
            while let Some((position, result)) = members.next().await {
                match result {
                    Ok(value) => values.push((position, value)),
                    Err(e) => {
                        group.cancel();
                        failure = Some(e);
                        break;
                    }
                }
            }
            (values, failure)
        };

        let result = match failure {
            Some(e) => Err(e),
            None => {
                group.complete();
                values.sort_by_key(|(position, _)| *position);
                Ok(values.into_iter().map(|(_, value)| value).collect())
            }
        };

        self.task.release_nested(group_id);
        self.end(name, group_id, &result);
        result
    }

    /// Name of the step most recently started
    pub fn current_step(&self) -> Option<String> {
        lock(&self.current_step).clone()
    }

    fn begin(&self, name: &str, registration: Registration) -> Result<u32> {
        *lock(&self.current_step) = Some(name.to_string());
        match registration {
            Registration::Stored => Ok(self.steps.fetch_add(1, Ordering::SeqCst)),
            Registration::CancelledOnArrival => {
                self.report_cancelled(Some(name.to_string()));
                Err(Error::cancelled_at(name))
            }
            Registration::Discarded => Err(Error::Other(format!(
                "step '{}' started after operation {} completed",
                name,
                self.task.id()
            ))),
        }
    }

    fn end<T>(&self, name: &str, step_id: TaskId, result: &Result<T>) {
        match result {
            Ok(_) => {
                tracing::debug!(task_id = %self.task.id(), step_id = %step_id, step = name, "Step completed");
                self.emit(Event::StepCompleted {
                    task_id: self.task.id(),
                    step_id,
                    step: name.to_string(),
                });
            }
            Err(e) if e.is_cancelled() => {
                self.report_cancelled(Some(name.to_string()));
            }
            Err(e) => {
                tracing::warn!(
                    task_id = %self.task.id(),
                    step_id = %step_id,
                    step = name,
                    error = %e,
                    "Step failed"
                );
                self.emit(Event::StepFailed {
                    task_id: self.task.id(),
                    step_id,
                    step: name.to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    /// Emit the operation's `Cancelled` event, at most once
    pub(crate) fn report_cancelled(&self, step: Option<String>) {
        if self.cancel_reported.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(task_id = %self.task.id(), step = ?step, "Operation cancelled");
        self.emit(Event::Cancelled {
            task_id: self.task.id(),
            step,
        });
    }

    pub(crate) fn emit(&self, event: Event) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}

/// Drive a step's future until it settles, its token fires, or it times out
async fn settle<Fut, T>(
    name: &str,
    token: &CancellationToken,
    timeout: Option<Duration>,
    fut: Fut,
) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    let work = async {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(Error::StepTimeout {
                    step: name.to_string(),
                    timeout: limit,
                }),
            },
            None => fut.await,
        }
    };

    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::cancelled_at(name)),
        result = work => result,
    }
}

/// Move a step's leaf task to its terminal state based on how the step ended
fn settle_leaf<T>(leaf: &NetworkTask, result: &Result<T>) {
    match result {
        // Stop the transport request that outlived its deadline
        Err(Error::StepTimeout { .. }) => leaf.cancel(),
        // Settled on its own; a no-op if cancellation won the race
        _ => {
            leaf.complete();
        }
    }
}

async fn run_member<F, Fut, T>(
    group: &TaskGroup,
    name: &str,
    timeout: Option<Duration>,
    part: F,
) -> Result<T>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let token = CancellationToken::new();
    let leaf = NetworkTask::with_operation(token.clone());

    match group.register(leaf.clone()) {
        Registration::Stored => {}
        Registration::CancelledOnArrival => return Err(Error::cancelled_at(name)),
        Registration::Discarded => {
            return Err(Error::Other(format!(
                "member of step '{name}' started after group completed"
            )));
        }
    }

    let result = settle(name, &token, timeout, part(token.clone())).await;
    settle_leaf(&leaf, &result);
    group.retire(leaf.id());
    result
}
