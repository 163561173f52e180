//! Ticket: the caller-facing handle for one submitted unit of work.
//!
//! A [`Ticket`] is pending until the dispatch worker executes its task, then
//! terminal forever: done with a value, done with an error, or cancelled.
//!
//! Semantics:
//! - Terminal state is set exactly once; all blocked waiters wake on the same
//!   notify-all, and late waiters observe the stored outcome.
//! - `cancel` succeeds only while pending. A cancelled task is skipped by the
//!   worker; waiters wake with [`Waited::Cancelled`] and no completion listener
//!   fires.
//! - Post-completion listeners attached after the terminal state run
//!   immediately, synchronously, in the attaching thread.
//! - A pre-completion hook may still cancel the ticket; it runs at most once,
//!   and only if the ticket was not already cancelled.
//! - Listener panics are caught and logged; they never reach the worker thread.
//!
//! Invariants:
//! - Once terminal, the state never changes again.
//! - `wait` panics when called from the dispatch worker thread; blocking there
//!   would deadlock the engine.

use crate::dispatch;
use crate::error::TaskError;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, OnceLock, Weak};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Pending,
    Cancelled,
    Done,
}

enum Listener<T> {
    Done(Box<dyn FnOnce(&Result<T, TaskError>) + Send>),
    Success(Box<dyn FnOnce(&T) + Send>),
}

type BeforeDone<T> = Box<dyn FnOnce(&Ticket<T>) + Send>;

/// State shared between a [`Ticket`] and the task the queue carries.
pub(crate) struct TicketShared<T> {
    // Self-handle so the pre-completion hook can be handed a real Ticket.
    me: Weak<TicketShared<T>>,
    status: Mutex<Status>,
    waiters: Condvar,
    outcome: OnceLock<Result<T, TaskError>>,
    listeners: Mutex<Vec<Listener<T>>>,
    before_done: Mutex<Option<BeforeDone<T>>>,
}

impl<T> TicketShared<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            status: Mutex::new(Status::Pending),
            waiters: Condvar::new(),
            outcome: OnceLock::new(),
            listeners: Mutex::new(Vec::new()),
            before_done: Mutex::new(None),
        })
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        *self.status.lock().unwrap() == Status::Cancelled
    }

    pub(crate) fn is_pending(&self) -> bool {
        *self.status.lock().unwrap() == Status::Pending
    }

    /// Set the terminal result, wake every waiter, then run listeners.
    ///
    /// The pre-completion hook runs first and may cancel; in that case the
    /// result is discarded and no listener fires. Completion after a cancel
    /// or a prior completion is a no-op.
    pub(crate) fn complete(&self, result: Result<T, TaskError>) {
        let hook = self.before_done.lock().unwrap().take();
        if let Some(hook) = hook {
            if self.is_pending() {
                if let Some(shared) = self.me.upgrade() {
                    let ticket = Ticket { shared };
                    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| hook(&ticket))) {
                        tracing::error!(
                            panic = ?panic_message(&panic),
                            "pre-completion hook panicked"
                        );
                    }
                }
            }
        }

        if self.outcome.set(result).is_err() {
            return;
        }
        {
            let mut status = self.status.lock().unwrap();
            if *status != Status::Pending {
                // Cancelled between the hook and here; the stored outcome is
                // unreachable and waiters were already woken by cancel().
                return;
            }
            *status = Status::Done;
            self.waiters.notify_all();
        }

        let pending: Vec<Listener<T>> = std::mem::take(&mut *self.listeners.lock().unwrap());
        let outcome = self.outcome.get().expect("outcome set above");
        for listener in pending {
            run_listener(listener, outcome);
        }
    }

    /// Wake waiters of a cancelled ticket the worker just skipped.
    pub(crate) fn notify_cancelled(&self) {
        self.waiters.notify_all();
    }
}

fn run_listener<T>(listener: Listener<T>, outcome: &Result<T, TaskError>) {
    let result = match listener {
        Listener::Done(f) => catch_unwind(AssertUnwindSafe(|| f(outcome))),
        Listener::Success(f) => match outcome {
            Ok(value) => catch_unwind(AssertUnwindSafe(|| f(value))),
            Err(_) => Ok(()),
        },
    };
    if let Err(panic) = result {
        tracing::error!(panic = ?panic_message(&panic), "ticket listener panicked");
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

/// Outcome observed by a waiter.
#[derive(Debug)]
pub enum Waited<'a, T> {
    /// The task reached a terminal result.
    Done(&'a Result<T, TaskError>),
    /// The ticket was cancelled before completing; there is no result.
    Cancelled,
}

impl<'a, T> Waited<'a, T> {
    /// Borrow the result if the task completed.
    pub fn result(&self) -> Option<&'a Result<T, TaskError>> {
        match self {
            Waited::Done(r) => Some(r),
            Waited::Cancelled => None,
        }
    }
}

/// Handle for one pending unit of work.
///
/// Cloning yields another handle to the same underlying task.
pub struct Ticket<T> {
    shared: Arc<TicketShared<T>>,
}

impl<T> Clone for Ticket<T> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<T> std::fmt::Debug for Ticket<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = *self.shared.status.lock().unwrap();
        f.debug_struct("Ticket").field("status", &status).finish()
    }
}

impl<T> Ticket<T> {
    pub(crate) fn from_shared(shared: Arc<TicketShared<T>>) -> Self {
        Self { shared }
    }

    /// Check if the ticket has not yet reached a terminal state.
    pub fn is_pending(&self) -> bool {
        self.shared.is_pending()
    }

    /// Check if the ticket was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// Check if the task completed with a value or an error.
    pub fn is_done(&self) -> bool {
        *self.shared.status.lock().unwrap() == Status::Done
    }

    /// Borrow the terminal result without blocking, if one exists.
    pub fn outcome(&self) -> Option<&Result<T, TaskError>> {
        if self.is_done() {
            self.shared.outcome.get()
        } else {
            None
        }
    }

    /// Cancel the ticket. Succeeds only while pending.
    ///
    /// The worker skips a cancelled task without executing it and without
    /// running completion listeners; blocked waiters wake with
    /// [`Waited::Cancelled`]. In-flight execution is never interrupted.
    pub fn cancel(&self) -> bool {
        let mut status = self.shared.status.lock().unwrap();
        if *status != Status::Pending {
            return false;
        }
        *status = Status::Cancelled;
        self.shared.waiters.notify_all();
        drop(status);
        self.shared.listeners.lock().unwrap().clear();
        true
    }

    /// Block the calling thread until the ticket is terminal.
    ///
    /// # Panics
    ///
    /// Panics when called from the dispatch worker thread; that call can never
    /// return because the worker is the only thread that completes tickets.
    pub fn wait(&self) -> Waited<'_, T> {
        dispatch::assert_off_worker("Ticket::wait");
        let mut status = self.shared.status.lock().unwrap();
        while *status == Status::Pending {
            status = self.shared.waiters.wait(status).unwrap();
        }
        self.terminal(*status)
    }

    /// Block until terminal or until `timeout` elapses. Returns `None` on
    /// timeout.
    ///
    /// # Panics
    ///
    /// Panics when called from the dispatch worker thread, as [`Self::wait`].
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Waited<'_, T>> {
        dispatch::assert_off_worker("Ticket::wait_timeout");
        let deadline = Instant::now() + timeout;
        let mut status = self.shared.status.lock().unwrap();
        while *status == Status::Pending {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (guard, result) = self.shared.waiters.wait_timeout(status, remaining).unwrap();
            status = guard;
            if result.timed_out() && *status == Status::Pending {
                return None;
            }
        }
        Some(self.terminal(*status))
    }

    fn terminal(&self, status: Status) -> Waited<'_, T> {
        match status {
            Status::Cancelled => Waited::Cancelled,
            Status::Done => {
                Waited::Done(self.shared.outcome.get().expect("done ticket stores an outcome"))
            }
            Status::Pending => unreachable!("terminal() called while pending"),
        }
    }

    /// Attach a listener that observes the terminal result (value or error).
    ///
    /// Attached after completion, it runs immediately in the calling thread.
    /// Cancelled tickets never run listeners.
    pub fn on_done<F>(&self, f: F)
    where
        F: FnOnce(&Result<T, TaskError>) + Send + 'static,
    {
        let mut listeners = self.shared.listeners.lock().unwrap();
        if self.is_done() {
            drop(listeners);
            if let Some(outcome) = self.shared.outcome.get() {
                run_listener(Listener::Done(Box::new(f)), outcome);
            }
            return;
        }
        if self.is_cancelled() {
            return;
        }
        listeners.push(Listener::Done(Box::new(f)));
    }

    /// Attach a listener that observes only a successful value.
    pub fn on_success<F>(&self, f: F)
    where
        F: FnOnce(&T) + Send + 'static,
    {
        let mut listeners = self.shared.listeners.lock().unwrap();
        if self.is_done() {
            drop(listeners);
            if let Some(outcome) = self.shared.outcome.get() {
                run_listener(Listener::Success(Box::new(f)), outcome);
            }
            return;
        }
        if self.is_cancelled() {
            return;
        }
        listeners.push(Listener::Success(Box::new(f)));
    }

    /// Install the pre-completion hook. It runs at most once, right before the
    /// terminal result would be stored, and may still [`cancel`](Self::cancel)
    /// the ticket. Installing after the ticket is terminal has no effect.
    pub fn before_done<F>(&self, f: F)
    where
        F: FnOnce(&Ticket<T>) + Send + 'static,
    {
        if !self.is_pending() {
            return;
        }
        *self.shared.before_done.lock().unwrap() = Some(Box::new(f));
    }
}
