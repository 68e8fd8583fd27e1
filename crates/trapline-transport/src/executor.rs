//! Worker pool for response decoding and downstream dispatch.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, warn};

/// Count of submitted tasks that have not finished or been aborted.
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

/// Held by every task; dropping it, on completion or abort, releases the
/// task's slot in [`InFlight`].
struct InFlightGuard(Arc<InFlight>);

impl InFlightGuard {
    fn new(in_flight: &Arc<InFlight>) -> Self {
        in_flight.count.fetch_add(1, Ordering::AcqRel);
        Self(in_flight.clone())
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Runs response processing off the client's event loop with bounded
/// parallelism.
pub struct ResponseExecutor {
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
    in_flight: Arc<InFlight>,
}

impl ResponseExecutor {
    pub fn new(parallelism_level: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(parallelism_level.max(1))),
            tasks: Mutex::new(JoinSet::new()),
            in_flight: Arc::new(InFlight::default()),
        }
    }

    /// Queue a unit of work. Work submitted after shutdown is dropped.
    pub fn submit<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.permits.is_closed() {
            warn!("Response executor is shut down, dropping work");
            return;
        }
        let permits = self.permits.clone();
        let guard = InFlightGuard::new(&self.in_flight);
        let mut tasks = self.tasks.lock();
        reap(&mut tasks);
        tasks.spawn(async move {
            let _guard = guard;
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            work.await;
        });
    }

    /// Wait until every submitted task has finished or been aborted by
    /// [`Self::shutdown`]. Tasks stay in the pool while draining.
    pub async fn drain(&self) {
        loop {
            let idle = self.in_flight.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();
            if self.in_flight() == 0 {
                break;
            }
            idle.await;
        }
        reap(&mut self.tasks.lock());
    }

    /// Tasks submitted and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.count.load(Ordering::Acquire)
    }

    pub fn is_shutdown(&self) -> bool {
        self.permits.is_closed()
    }

    /// Stop accepting work and abort what is in flight.
    pub fn shutdown(&self) {
        self.permits.close();
        self.tasks.lock().abort_all();
    }
}

fn reap(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.try_join_next() {
        if let Err(err) = result {
            if err.is_panic() {
                error!("Response processing task panicked: {}", err);
            }
        }
    }
}
