//! Timed job execution for drains and deferred submissions.
//!
//! The engine never sleeps on its worker thread; anything time-delayed goes
//! through a [`Scheduler`]. Production uses [`TokioScheduler`] (tokio timer
//! wheel); tests use [`ManualScheduler`] to fire drains deterministically or
//! [`InlineScheduler`] to collapse every delay to zero.
//!
//! Scheduled jobs only ever re-enqueue work on the dispatch queue; they must
//! never execute task bodies themselves.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Job = Box<dyn FnOnce() + Send>;

/// Abstraction for running a job after a delay.
pub trait Scheduler: Send + Sync + fmt::Debug {
    fn schedule(&self, delay: Duration, job: Job);
}

/// Production scheduler backed by a tokio timer.
#[derive(Clone)]
pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
    // Present when the scheduler hosts its own runtime; keeps timer threads
    // alive for as long as any clone of the scheduler exists.
    owned: Option<Arc<tokio::runtime::Runtime>>,
}

impl fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioScheduler").field("owned", &self.owned.is_some()).finish()
    }
}

impl TokioScheduler {
    /// Use an existing runtime for timers.
    pub fn from_handle(handle: tokio::runtime::Handle) -> Self {
        Self { handle, owned: None }
    }

    /// Host a dedicated single-worker runtime for timers.
    pub fn owned() -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("sluice-timer")
            .enable_time()
            .build()?;
        let handle = runtime.handle().clone();
        Ok(Self { handle, owned: Some(Arc::new(runtime)) })
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, job: Job) {
        self.handle.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            job();
        });
    }
}

/// Test scheduler that runs every job immediately in the scheduling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineScheduler;

impl Scheduler for InlineScheduler {
    fn schedule(&self, _delay: Duration, job: Job) {
        job();
    }
}

/// Test scheduler that parks jobs until the test fires them.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    jobs: Arc<Mutex<Vec<(Duration, Job)>>>,
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler").field("pending", &self.pending()).finish()
    }
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs waiting to be fired.
    pub fn pending(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    /// Delays the pending jobs were scheduled with, in scheduling order.
    pub fn delays(&self) -> Vec<Duration> {
        self.jobs.lock().unwrap().iter().map(|(d, _)| *d).collect()
    }

    /// Run the oldest pending job. Returns false if none were pending.
    pub fn fire_next(&self) -> bool {
        let job = {
            let mut jobs = self.jobs.lock().unwrap();
            if jobs.is_empty() {
                return false;
            }
            jobs.remove(0).1
        };
        job();
        true
    }

    /// Run every pending job, including jobs scheduled by the jobs themselves.
    pub fn fire_all(&self) {
        while self.fire_next() {}
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, job: Job) {
        self.jobs.lock().unwrap().push((delay, job));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn inline_scheduler_runs_immediately() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        InlineScheduler.schedule(
            Duration::from_secs(60),
            Box::new(move || {
                hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn manual_scheduler_parks_until_fired() {
        let scheduler = ManualScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for i in 1..=3u64 {
            let hits = hits.clone();
            scheduler.schedule(
                Duration::from_millis(i * 10),
                Box::new(move || {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        assert_eq!(scheduler.pending(), 3);
        assert_eq!(
            scheduler.delays(),
            vec![
                Duration::from_millis(10),
                Duration::from_millis(20),
                Duration::from_millis(30)
            ]
        );
        assert!(scheduler.fire_next());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        scheduler.fire_all();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(!scheduler.fire_next());
    }

    #[tokio::test]
    async fn tokio_scheduler_fires_after_delay() {
        let scheduler = TokioScheduler::from_handle(tokio::runtime::Handle::current());
        let (tx, rx) = std::sync::mpsc::channel();
        scheduler.schedule(
            Duration::from_millis(10),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        tokio::task::spawn_blocking(move || {
            rx.recv_timeout(Duration::from_secs(2)).expect("job fired")
        })
        .await
        .unwrap();
    }
}
