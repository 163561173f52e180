//! The dispatch queue: one dedicated worker thread, strict FIFO execution.
//!
//! The worker is the only thread that ever runs task bodies, which is what
//! makes bucket accounting correct without any distributed lock: at most one
//! outbound exchange is in flight from this engine at a time.
//!
//! Behavior:
//! - Cancelled tasks are skipped; their waiters are woken, nothing else runs.
//! - A task reporting a transient failure is re-enqueued at the tail after a
//!   jittered backoff delay; the delay resets on the next completed task.
//! - A panicking task body is contained: the worker logs it, completes the
//!   ticket with [`TaskError::Panicked`], and keeps serving the queue.
//! - When the queue is empty the worker parks with a bounded wait so shutdown
//!   stays responsive.
//!
//! The worker thread is marked with a thread-local so blocking waits can
//! refuse to run on it (see [`assert_off_worker`]); this is enforced, not
//! merely documented.

use crate::backoff::RetryDelay;
use crate::error::TaskError;
use crate::queue::SharedQueue;
use crate::scheduler::Scheduler;
use crate::task::{Dispatchable, RunOutcome};
use crate::ticket::panic_message;
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

thread_local! {
    static DISPATCH_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// Fail fast if the current thread is the dispatch worker.
///
/// Any blocking wait on the worker thread can never be satisfied, because the
/// worker is the only thread that completes tickets. Panicking here turns a
/// silent deadlock into an immediate programming-error signal.
pub(crate) fn assert_off_worker(operation: &str) {
    if DISPATCH_WORKER.with(Cell::get) {
        panic!(
            "{operation} called from the dispatch worker thread; \
             blocking here would deadlock the engine"
        );
    }
}

/// Handle owning the worker thread and its stop flag.
pub(crate) struct DispatchQueue {
    queue: Arc<SharedQueue>,
    stop: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DispatchQueue {
    /// Spawn the worker thread and start draining `queue`.
    pub(crate) fn start(
        queue: Arc<SharedQueue>,
        scheduler: Arc<dyn Scheduler>,
        retry: RetryDelay,
        idle_wait: Duration,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let worker = std::thread::Builder::new().name("sluice-dispatch".into()).spawn({
            let queue = Arc::clone(&queue);
            let stop = Arc::clone(&stop);
            move || worker_loop(&queue, &*scheduler, &retry, idle_wait, &stop)
        })?;
        Ok(Self { queue, stop, worker: Mutex::new(Some(worker)) })
    }

    /// Enqueue a task at the tail, from any thread.
    pub(crate) fn submit(&self, task: Arc<dyn Dispatchable>) {
        self.queue.push(task);
    }

    /// Stop the worker and join it. Tasks still queued stay queued; their
    /// tickets remain pending.
    pub(crate) fn shutdown(&self) {
        if self.stop.swap(true, Ordering::SeqCst) {
            return;
        }
        self.queue.nudge();
        if let Some(worker) = self.worker.lock().unwrap().take() {
            if worker.join().is_err() {
                tracing::error!("dispatch worker terminated by panic");
            }
        }
    }
}

impl Drop for DispatchQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    queue: &Arc<SharedQueue>,
    scheduler: &dyn Scheduler,
    retry: &RetryDelay,
    idle_wait: Duration,
    stop: &AtomicBool,
) {
    DISPATCH_WORKER.with(|flag| flag.set(true));
    tracing::debug!("dispatch worker started");
    while !stop.load(Ordering::SeqCst) {
        let Some(task) = queue.pop_timeout(idle_wait) else {
            continue;
        };
        if task.cancelled() {
            task.wake_cancelled();
            continue;
        }
        match catch_unwind(AssertUnwindSafe(|| Arc::clone(&task).run())) {
            Ok(RunOutcome::Completed) => retry.reset(),
            Ok(RunOutcome::Parked) => {}
            Ok(RunOutcome::Resubmit) => {
                let delay = retry.next();
                tracing::debug!(
                    delay_ms = delay.as_millis() as u64,
                    consecutive = retry.failures(),
                    "transient failure, resubmitting after backoff"
                );
                let queue = Arc::clone(queue);
                scheduler.schedule(delay, Box::new(move || queue.push(task)));
            }
            Err(panic) => {
                let message = panic_message(&*panic);
                tracing::error!(panic = %message, "task body panicked on dispatch worker");
                task.fail(TaskError::Panicked(message));
            }
        }
    }
    tracing::debug!("dispatch worker stopped");
}
