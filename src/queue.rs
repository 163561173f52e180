//! The FIFO behind the dispatch worker.
//!
//! [`TaskQueue`] is the pluggable storage; [`FifoQueue`] is the stock
//! `VecDeque` implementation. The engine wraps whichever implementation the
//! configuration chose behind a mutex/condvar pair so producers on any
//! thread can wake the single blocked consumer.

use crate::task::Dispatchable;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Opaque handle to one queued task. Custom [`TaskQueue`] implementations
/// store and reorder these; only the dispatch worker can execute them.
pub struct QueuedJob(pub(crate) Arc<dyn Dispatchable>);

impl QueuedJob {
    /// Check if the ticket behind this job was already cancelled. Queues may
    /// use this to shed dead work early; the worker skips it either way.
    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled()
    }
}

impl std::fmt::Debug for QueuedJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedJob").field("cancelled", &self.is_cancelled()).finish()
    }
}

/// Pluggable FIFO storage for pending tasks.
///
/// Implementations only need single-threaded semantics; the engine owns the
/// locking.
pub trait TaskQueue: Send {
    fn push(&mut self, job: QueuedJob);
    fn pop(&mut self) -> Option<QueuedJob>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Stock queue: a growable ring buffer.
#[derive(Default)]
pub struct FifoQueue {
    inner: VecDeque<QueuedJob>,
}

impl FifoQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskQueue for FifoQueue {
    fn push(&mut self, job: QueuedJob) {
        self.inner.push_back(job);
    }

    fn pop(&mut self) -> Option<QueuedJob> {
        self.inner.pop_front()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

/// The queue shared between producers and the dispatch worker.
pub(crate) struct SharedQueue {
    queue: Mutex<Box<dyn TaskQueue>>,
    ready: Condvar,
}

impl SharedQueue {
    pub(crate) fn new(queue: Box<dyn TaskQueue>) -> Arc<Self> {
        Arc::new(Self { queue: Mutex::new(queue), ready: Condvar::new() })
    }

    /// Enqueue at the tail and wake a waiting worker. Callable from any
    /// thread; never blocks beyond the queue lock.
    pub(crate) fn push(&self, task: Arc<dyn Dispatchable>) {
        self.queue.lock().unwrap().push(QueuedJob(task));
        self.ready.notify_one();
    }

    /// Pop the next task, blocking at most `idle_wait` when empty so the
    /// worker can re-check its stop flag.
    pub(crate) fn pop_timeout(&self, idle_wait: Duration) -> Option<Arc<dyn Dispatchable>> {
        let mut queue = self.queue.lock().unwrap();
        if let Some(job) = queue.pop() {
            return Some(job.0);
        }
        let (mut queue, _timeout) = self.ready.wait_timeout(queue, idle_wait).unwrap();
        queue.pop().map(|job| job.0)
    }

    /// Wake the worker without enqueueing (used by shutdown).
    pub(crate) fn nudge(&self) {
        self.ready.notify_all();
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }
}
