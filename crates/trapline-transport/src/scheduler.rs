//! Recurring task scheduling for device polls.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinSet};
use tracing::debug;

/// Body of a recurring task, invoked once per tick.
pub type ScheduledTask = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Cancels a scheduled task when asked to. Dropping the handle does not
/// cancel the task.
#[derive(Debug, Clone)]
pub struct ScheduledHandle {
    abort: AbortHandle,
}

impl ScheduledHandle {
    pub fn new(abort: AbortHandle) -> Self {
        Self { abort }
    }

    /// Stop the task, interrupting a tick that is currently running.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

/// Fixed-delay scheduler shared by all sessions.
pub trait Scheduler: Send + Sync {
    /// Run `task` after `initial_delay`, then again `delay` after each run
    /// completes, until cancelled.
    fn schedule_with_fixed_delay(
        &self,
        initial_delay: Duration,
        delay: Duration,
        task: ScheduledTask,
    ) -> ScheduledHandle;

    /// Cancel everything and refuse further ticks.
    fn shutdown(&self);
}

/// [`Scheduler`] on the tokio runtime. At most `parallelism` ticks run at
/// the same time across all tasks.
pub struct TokioScheduler {
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
}

impl TokioScheduler {
    pub fn new(parallelism: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(parallelism.max(1))),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Number of tasks not yet finished or cancelled.
    pub fn active_tasks(&self) -> usize {
        let mut tasks = self.tasks.lock();
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_with_fixed_delay(
        &self,
        initial_delay: Duration,
        delay: Duration,
        task: ScheduledTask,
    ) -> ScheduledHandle {
        let permits = self.permits.clone();
        let mut tasks = self.tasks.lock();
        while tasks.try_join_next().is_some() {}

        let abort = tasks.spawn(async move {
            tokio::time::sleep(initial_delay).await;
            loop {
                let Ok(permit) = permits.acquire().await else {
                    debug!("Scheduler closed, stopping recurring task");
                    return;
                };
                task().await;
                drop(permit);
                tokio::time::sleep(delay).await;
            }
        });
        ScheduledHandle::new(abort)
    }

    fn shutdown(&self) {
        self.permits.close();
        self.tasks.lock().abort_all();
    }
}
