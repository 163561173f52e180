//! The unit of work carried by the dispatch queue.
//!
//! `Dispatchable` is the object-safe face the queue, buckets, and drains
//! share. `Task` wraps a plain closure; the rate-limited request task lives
//! in [`crate::engine`]. An execution attempt reports an explicit
//! [`Attempt`] instead of signalling retry through an error type, and the
//! dispatch loop pattern-matches on the outcome.

use crate::error::TaskError;
use crate::ticket::{Ticket, TicketShared};
use std::sync::{Arc, Mutex};

/// What one execution attempt of a task body produced.
pub enum Attempt<T> {
    /// The work finished with a value; the ticket completes.
    Done(T),
    /// The work failed at the application level; the ticket completes with
    /// the error.
    Failed(TaskError),
    /// Transient connectivity failure. The ticket is left untouched and the
    /// task is resubmitted after a backoff delay; no listener fires.
    Retry,
}

/// What the dispatch worker does after running a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunOutcome {
    /// Terminal state reached (value, error, or already-finished no-op).
    Completed,
    /// A bucket absorbed the task into its overflow queue; a drain will
    /// resubmit it later. The worker forgets it.
    Parked,
    /// Transient failure; the worker schedules a delayed re-enqueue.
    Resubmit,
}

/// Object-safe unit the dispatch queue executes.
pub(crate) trait Dispatchable: Send + Sync {
    /// Execute one attempt on the worker thread. Takes the owning handle so
    /// the task can park itself in a bucket's overflow queue.
    fn run(self: Arc<Self>) -> RunOutcome;

    /// Check if the caller cancelled the ticket; the worker skips these.
    fn cancelled(&self) -> bool;

    /// Wake waiters of a cancelled ticket when the worker skips it.
    fn wake_cancelled(&self);

    /// Complete the ticket with an error without running the body (used when
    /// the body panicked).
    fn fail(&self, error: TaskError);
}

type Work<T> = Box<dyn FnMut() -> Attempt<T> + Send>;

/// A closure-backed task. The closure is owned exclusively by the task until
/// completion and may run several times when attempts are transient.
pub(crate) struct Task<T> {
    work: Mutex<Option<Work<T>>>,
    shared: Arc<TicketShared<T>>,
}

impl<T> Task<T> {
    pub(crate) fn new<F>(work: F) -> (Ticket<T>, Arc<Self>)
    where
        F: FnMut() -> Attempt<T> + Send + 'static,
    {
        let shared = TicketShared::new();
        let task =
            Arc::new(Self { work: Mutex::new(Some(Box::new(work))), shared: Arc::clone(&shared) });
        (Ticket::from_shared(shared), task)
    }
}

impl<T: Send + Sync + 'static> Dispatchable for Task<T> {
    fn run(self: Arc<Self>) -> RunOutcome {
        let mut guard = self.work.lock().unwrap();
        let Some(work) = guard.as_mut() else {
            return RunOutcome::Completed;
        };
        match work() {
            Attempt::Done(value) => {
                *guard = None;
                drop(guard);
                self.shared.complete(Ok(value));
                RunOutcome::Completed
            }
            Attempt::Failed(error) => {
                *guard = None;
                drop(guard);
                self.shared.complete(Err(error));
                RunOutcome::Completed
            }
            Attempt::Retry => RunOutcome::Resubmit,
        }
    }

    fn cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    fn wake_cancelled(&self) {
        self.shared.notify_cancelled();
    }

    fn fail(&self, error: TaskError) {
        *self.work.lock().unwrap() = None;
        self.shared.complete(Err(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::Waited;

    #[test]
    fn done_attempt_completes_ticket() {
        let (ticket, task) = Task::new(|| Attempt::Done(5u32));
        assert_eq!(task.run(), RunOutcome::Completed);
        match ticket.wait() {
            Waited::Done(Ok(v)) => assert_eq!(*v, 5),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn failed_attempt_surfaces_error() {
        let (ticket, task) = Task::new(|| Attempt::Failed::<u32>(TaskError::App("denied".into())));
        assert_eq!(task.run(), RunOutcome::Completed);
        assert!(matches!(ticket.wait(), Waited::Done(Err(TaskError::App(_)))));
    }

    #[test]
    fn retry_attempt_leaves_ticket_pending() {
        let mut attempts = 0u32;
        let (ticket, task) = Task::new(move || {
            attempts += 1;
            if attempts < 3 {
                Attempt::Retry
            } else {
                Attempt::Done(attempts)
            }
        });
        assert_eq!(Arc::clone(&task).run(), RunOutcome::Resubmit);
        assert!(ticket.is_pending());
        assert_eq!(Arc::clone(&task).run(), RunOutcome::Resubmit);
        assert_eq!(task.run(), RunOutcome::Completed);
        match ticket.wait() {
            Waited::Done(Ok(v)) => assert_eq!(*v, 3),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn run_after_completion_is_noop() {
        let (_ticket, task) = Task::new(|| Attempt::Done(1u32));
        assert_eq!(Arc::clone(&task).run(), RunOutcome::Completed);
        assert_eq!(task.run(), RunOutcome::Completed);
    }

    #[test]
    fn fail_completes_without_running_body() {
        let (ticket, task) = Task::new(|| Attempt::Done(1u32));
        task.fail(TaskError::Panicked("boom".into()));
        assert!(matches!(ticket.wait(), Waited::Done(Err(TaskError::Panicked(_)))));
        assert_eq!(task.run(), RunOutcome::Completed);
    }
}
