//! Per-fingerprint rate-limit accounting.
//!
//! A bucket answers one question on the worker thread: may this task proceed
//! now? Tokens are spent optimistically against a local view and reconciled
//! whenever the server reports authoritative state. Tasks that cannot
//! proceed wait in the bucket's own FIFO until a scheduled drain hands them
//! back to the dispatch queue.
//!
//! State flags are monotonic: `assumed` only ever flips true→false
//! (promotion), `deleted` only false→true (last route unbound). A deleted
//! bucket is never reused and never swallows tasks; its backlog is
//! resubmitted before the registry forgets it.
//!
//! Locking: token state, backlog, and the bound-route set are guarded by
//! separate locks so admission checks on one field group never contend with
//! reconciliation on another. None of these locks is held across a call into
//! the scheduler or the dispatch queue.

use crate::fingerprint::RateLimitId;
use crate::headers::{RateLimitHeaders, Rejection};
use crate::overflow::{OverflowAction, OverflowPolicy, QueuedTask};
use crate::queue::SharedQueue;
use crate::scheduler::Scheduler;
use crate::task::Dispatchable;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

/// Result of asking a bucket for admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// A token was spent; execute now.
    Admitted,
    /// No tokens; the task waits in the bucket's overflow queue.
    Queued,
}

/// Handles a bucket needs to hand tasks back to the engine.
#[derive(Clone)]
pub(crate) struct BucketCtx {
    pub queue: Arc<SharedQueue>,
    pub scheduler: Arc<dyn Scheduler>,
    /// Drain batch cap for limitless buckets (the global-rejection retry
    /// budget); `usize::MAX` means unbounded.
    pub limitless_drain_batch: usize,
}

struct TokenState {
    limit: i64,
    remaining: i64,
    /// Window boundary; `None` means unknown.
    reset_at: Option<Instant>,
    /// Window length, used to space follow-up drains.
    reset_after: Duration,
}

struct Queued {
    task: Arc<dyn Dispatchable>,
    queued_at: Instant,
}

#[derive(Default)]
struct Backlog {
    queue: VecDeque<Queued>,
    /// Tracked alongside the queue so depth reads never walk it.
    size: usize,
}

pub(crate) struct Bucket {
    // Self-handle for drain closures; upgrades fail once the bucket is gone.
    me: Weak<Bucket>,
    limitless: bool,
    overflow_threshold: usize,
    overflow: Box<dyn OverflowPolicy>,
    tokens: Mutex<TokenState>,
    backlog: Mutex<Backlog>,
    bound: Mutex<HashSet<RateLimitId>>,
    name: Mutex<Option<String>>,
    assumed: AtomicBool,
    deleted: AtomicBool,
    drain_scheduled: AtomicBool,
}

impl Bucket {
    /// A provisional bucket for a fingerprint with no known server limits.
    pub(crate) fn assumed(
        budget: i64,
        overflow_threshold: usize,
        overflow: Box<dyn OverflowPolicy>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            limitless: false,
            overflow_threshold,
            overflow,
            tokens: Mutex::new(TokenState {
                limit: budget,
                remaining: budget,
                reset_at: None,
                reset_after: Duration::ZERO,
            }),
            backlog: Mutex::new(Backlog::default()),
            bound: Mutex::new(HashSet::new()),
            name: Mutex::new(None),
            assumed: AtomicBool::new(true),
            deleted: AtomicBool::new(false),
            drain_scheduled: AtomicBool::new(false),
        })
    }

    /// A bucket throttled by backlog depth instead of tokens (global and
    /// shared-resource limits). Admits freely until a rejection zeroes it.
    pub(crate) fn limitless(
        overflow_threshold: usize,
        overflow: Box<dyn OverflowPolicy>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            limitless: true,
            overflow_threshold,
            overflow,
            tokens: Mutex::new(TokenState {
                limit: 1,
                remaining: 1,
                reset_at: None,
                reset_after: Duration::ZERO,
            }),
            backlog: Mutex::new(Backlog::default()),
            bound: Mutex::new(HashSet::new()),
            name: Mutex::new(None),
            assumed: AtomicBool::new(false),
            deleted: AtomicBool::new(false),
            drain_scheduled: AtomicBool::new(false),
        })
    }

    pub(crate) fn is_assumed(&self) -> bool {
        self.assumed.load(Ordering::SeqCst)
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::SeqCst)
    }

    pub(crate) fn is_limitless(&self) -> bool {
        self.limitless
    }

    pub(crate) fn name(&self) -> Option<String> {
        self.name.lock().unwrap().clone()
    }

    pub(crate) fn backlog_len(&self) -> usize {
        self.backlog.lock().unwrap().size
    }

    /// (limit, remaining, reset known) for logs and tests.
    pub(crate) fn snapshot(&self) -> (i64, i64, bool) {
        let t = self.tokens.lock().unwrap();
        (t.limit, t.remaining, t.reset_at.is_some())
    }

    /// Admit the task now or park it in the overflow queue.
    ///
    /// A reset whose deadline has passed is applied first. Limitless buckets
    /// never spend tokens; they only stop admitting after a rejection zeroed
    /// `remaining`, until the reset restores it.
    pub(crate) fn try_admit_or_enqueue(
        &self,
        task: Arc<dyn Dispatchable>,
        ctx: &BucketCtx,
    ) -> Admission {
        {
            let mut t = self.tokens.lock().unwrap();
            if let Some(reset_at) = t.reset_at {
                if Instant::now() >= reset_at {
                    self.reset_locked(&mut t);
                }
            }
            if t.remaining >= 1 {
                if !self.limitless {
                    t.remaining -= 1;
                }
                return Admission::Admitted;
            }
        }
        self.enqueue(task, false);
        self.ensure_drain(ctx);
        Admission::Queued
    }

    /// Restore the window: full token budget, boundary unknown again.
    fn reset_locked(&self, t: &mut TokenState) {
        t.remaining = if self.limitless { 1 } else { t.limit };
        t.reset_at = None;
    }

    /// Reconcile with authoritative server state from a success response.
    ///
    /// A changed limit rescales `remaining` so consumption already in flight
    /// is preserved; the rescale can go negative when the server shrinks the
    /// limit below what was spent, and the next reset repairs it. A lower
    /// server-reported `remaining` wins over the optimistic local count.
    pub(crate) fn on_success(&self, headers: &RateLimitHeaders) {
        let mut t = self.tokens.lock().unwrap();
        if headers.limit != t.limit {
            let consumed = t.limit - t.remaining;
            let rescaled = headers.limit - consumed;
            tracing::debug!(
                old_limit = t.limit,
                new_limit = headers.limit,
                rescaled,
                "bucket limit changed, rescaling remaining"
            );
            if rescaled < 0 {
                tracing::warn!(
                    rescaled,
                    "remaining went negative after limit shrink; next reset restores it"
                );
            }
            t.limit = headers.limit;
            t.remaining = rescaled;
        }
        if headers.remaining < t.remaining {
            tracing::warn!(
                local = t.remaining,
                server = headers.remaining,
                "server reports fewer tokens than local accounting, trusting server"
            );
            t.remaining = headers.remaining;
        }
        t.reset_at = Some(headers.reset_at);
        t.reset_after = headers.reset_after;
    }

    /// Absorb a throttled response: zero the window, requeue the rejected
    /// task ahead of later arrivals, and schedule the retry drain.
    pub(crate) fn on_rejected(
        &self,
        rejection: &Rejection,
        task: Arc<dyn Dispatchable>,
        ctx: &BucketCtx,
    ) {
        {
            let mut t = self.tokens.lock().unwrap();
            t.remaining = 0;
            t.reset_at = Some(rejection.retry_at);
            t.reset_after = rejection.retry_after;
        }
        tracing::warn!(
            retry_after_ms = rejection.retry_after.as_millis() as u64,
            global = rejection.global,
            message = %rejection.message,
            "rate limited, requeueing rejected task"
        );
        self.enqueue(task, true);
        self.ensure_drain(ctx);
    }

    /// One-way assumed→concrete transition. Returns false (and does nothing)
    /// when the bucket is already concrete; rejection accounting is applied
    /// separately by the caller, promotion or not.
    pub(crate) fn promote(&self, headers: &RateLimitHeaders) -> bool {
        if !self.assumed.swap(false, Ordering::SeqCst) {
            return false;
        }
        *self.name.lock().unwrap() = Some(headers.bucket.clone());
        tracing::info!(bucket = %headers.bucket, "assumed bucket promoted to concrete");
        self.on_success(headers);
        true
    }

    /// Bind a route id. Fails on a deleted bucket: those are never reused.
    pub(crate) fn bind(&self, id: RateLimitId) -> bool {
        if self.is_deleted() {
            return false;
        }
        self.bound.lock().unwrap().insert(id);
        true
    }

    /// Unbind a route id. Removing the last one deletes the bucket and hands
    /// every queued task back to the dispatch queue; nothing is dropped.
    /// Returns true when the bucket was deleted.
    pub(crate) fn unbind(&self, id: &RateLimitId, ctx: &BucketCtx) -> bool {
        {
            let mut bound = self.bound.lock().unwrap();
            bound.remove(id);
            if !bound.is_empty() {
                return false;
            }
        }
        self.deleted.store(true, Ordering::SeqCst);
        let orphans = {
            let mut b = self.backlog.lock().unwrap();
            b.size = 0;
            std::mem::take(&mut b.queue)
        };
        if !orphans.is_empty() {
            tracing::info!(resubmitted = orphans.len(), "bucket deleted, handing backlog back");
        }
        for entry in orphans {
            ctx.queue.push(entry.task);
        }
        true
    }

    fn enqueue(&self, task: Arc<dyn Dispatchable>, front: bool) {
        let entry = Queued { task, queued_at: Instant::now() };
        let mut b = self.backlog.lock().unwrap();
        if front {
            b.queue.push_front(entry);
        } else {
            b.queue.push_back(entry);
        }
        b.size += 1;
        if b.size > self.overflow_threshold {
            self.apply_overflow(&mut b);
        }
    }

    fn apply_overflow(&self, b: &mut Backlog) {
        match self.overflow.evaluate(b.size) {
            OverflowAction::Retain => {}
            OverflowAction::RemoveAll => {
                tracing::warn!(dropped = b.size, "overflow policy dropped entire backlog");
                b.queue.clear();
                b.size = 0;
            }
            OverflowAction::Filter { predicate, second_pass } => {
                let passes = if second_pass { 2 } else { 1 };
                let before = b.size;
                for _ in 0..passes {
                    let now = Instant::now();
                    b.queue.retain(|entry| {
                        !predicate(&QueuedTask {
                            cancelled: entry.task.cancelled(),
                            queued_for: now.saturating_duration_since(entry.queued_at),
                        })
                    });
                }
                b.size = b.queue.len();
                if b.size < before {
                    tracing::debug!(
                        dropped = before - b.size,
                        kept = b.size,
                        "overflow policy trimmed backlog"
                    );
                }
            }
        }
    }

    /// Schedule the next drain when a reset time is known, the backlog is
    /// non-empty, and no drain is pending. Drains run on scheduler threads,
    /// never on the dispatch worker.
    pub(crate) fn ensure_drain(&self, ctx: &BucketCtx) {
        let Some(reset_at) = self.tokens.lock().unwrap().reset_at else {
            return;
        };
        if self.backlog.lock().unwrap().size == 0 {
            return;
        }
        if self.drain_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let delay = reset_at.saturating_duration_since(Instant::now());
        self.schedule_drain(delay, ctx);
    }

    fn schedule_drain(&self, delay: Duration, ctx: &BucketCtx) {
        let Some(bucket) = self.me.upgrade() else {
            return;
        };
        let drain_ctx = ctx.clone();
        ctx.scheduler.schedule(
            delay,
            Box::new(move || {
                bucket.drain(&drain_ctx);
            }),
        );
    }

    /// Pop up to one window's worth of backlog and resubmit it to the tail
    /// of the dispatch queue; reschedule while backlog remains.
    pub(crate) fn drain(&self, ctx: &BucketCtx) {
        let batch = if self.limitless {
            ctx.limitless_drain_batch
        } else {
            let limit = self.tokens.lock().unwrap().limit;
            usize::try_from(limit).unwrap_or(0).max(1)
        };
        let moved = {
            let mut b = self.backlog.lock().unwrap();
            let take = batch.min(b.queue.len());
            let moved: Vec<Queued> = b.queue.drain(..take).collect();
            b.size = b.queue.len();
            moved
        };
        if !moved.is_empty() {
            tracing::debug!(resubmitted = moved.len(), "draining bucket backlog");
        }
        for entry in moved {
            ctx.queue.push(entry.task);
        }

        if self.backlog.lock().unwrap().size > 0 {
            let delay = self.tokens.lock().unwrap().reset_after;
            self.schedule_drain(delay, ctx);
        } else {
            self.drain_scheduled.store(false, Ordering::SeqCst);
            // A task may have been parked between the pop and the flag
            // clear; re-check rather than strand it.
            self.ensure_drain(ctx);
        }
    }
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (limit, remaining, reset_known) = self.snapshot();
        f.debug_struct("Bucket")
            .field("name", &self.name())
            .field("limit", &limit)
            .field("remaining", &remaining)
            .field("reset_known", &reset_known)
            .field("assumed", &self.is_assumed())
            .field("limitless", &self.is_limitless())
            .field("deleted", &self.is_deleted())
            .field("backlog", &self.backlog_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overflow::{DropAll, DropCancelled, KeepAll};
    use crate::queue::FifoQueue;
    use crate::scheduler::ManualScheduler;
    use crate::task::{Attempt, Task};
    use crate::ticket::Ticket;

    fn ctx() -> (BucketCtx, Arc<ManualScheduler>) {
        let scheduler = Arc::new(ManualScheduler::new());
        let ctx = BucketCtx {
            queue: SharedQueue::new(Box::new(FifoQueue::new())),
            scheduler: scheduler.clone(),
            limitless_drain_batch: usize::MAX,
        };
        (ctx, scheduler)
    }

    fn task() -> (Ticket<()>, Arc<dyn Dispatchable>) {
        let (ticket, task) = Task::new(|| Attempt::Done(()));
        (ticket, task)
    }

    fn headers(limit: i64, remaining: i64, reset_after: Duration, bucket: &str) -> RateLimitHeaders {
        RateLimitHeaders {
            limit,
            remaining,
            reset_at: Instant::now() + reset_after,
            reset_after,
            bucket: bucket.to_string(),
        }
    }

    #[test]
    fn admits_up_to_budget_then_queues() {
        let (ctx, _) = ctx();
        let bucket = Bucket::assumed(5, 64, Box::new(KeepAll));
        for _ in 0..5 {
            let (_t, task) = task();
            assert_eq!(bucket.try_admit_or_enqueue(task, &ctx), Admission::Admitted);
        }
        let (_t, sixth) = task();
        assert_eq!(bucket.try_admit_or_enqueue(sixth, &ctx), Admission::Queued);
        assert_eq!(bucket.backlog_len(), 1);
        let (_, remaining, _) = bucket.snapshot();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn elapsed_reset_restores_budget_on_admission() {
        let (ctx, _) = ctx();
        let bucket = Bucket::assumed(1, 64, Box::new(KeepAll));
        let (_t, first) = task();
        assert_eq!(bucket.try_admit_or_enqueue(first, &ctx), Admission::Admitted);
        // Window boundary already in the past.
        bucket.on_success(&headers(1, 0, Duration::ZERO, "b"));
        std::thread::sleep(Duration::from_millis(5));
        let (_t, second) = task();
        assert_eq!(bucket.try_admit_or_enqueue(second, &ctx), Admission::Admitted);
    }

    #[test]
    fn on_success_rescales_remaining_when_limit_changes() {
        let (ctx, _) = ctx();
        let bucket = Bucket::assumed(5, 64, Box::new(KeepAll));
        for _ in 0..3 {
            let (_t, t) = task();
            bucket.try_admit_or_enqueue(t, &ctx);
        }
        // Local view: limit 5, remaining 2, consumed 3. Server says the
        // real limit is 10 with plenty remaining.
        bucket.on_success(&headers(10, 9, Duration::from_secs(10), "b"));
        let (limit, remaining, reset_known) = bucket.snapshot();
        assert_eq!(limit, 10);
        assert_eq!(remaining, 7, "consumption is preserved across the limit change");
        assert!(reset_known);
    }

    #[test]
    fn on_success_trusts_lower_server_remaining() {
        let (_ctx, _) = ctx();
        let bucket = Bucket::assumed(5, 64, Box::new(KeepAll));
        bucket.on_success(&headers(5, 1, Duration::from_secs(10), "b"));
        let (_, remaining, _) = bucket.snapshot();
        assert_eq!(remaining, 1);
        // A higher server value never raises the local count.
        bucket.on_success(&headers(5, 4, Duration::from_secs(10), "b"));
        let (_, remaining, _) = bucket.snapshot();
        assert_eq!(remaining, 1);
    }

    #[test]
    fn shrinking_limit_may_go_negative_and_reset_repairs_it() {
        let (ctx, _) = ctx();
        let bucket = Bucket::assumed(5, 64, Box::new(KeepAll));
        for _ in 0..4 {
            let (_t, t) = task();
            bucket.try_admit_or_enqueue(t, &ctx);
        }
        // Consumed 4; server shrinks the limit to 2: 2 - 4 = -2.
        bucket.on_success(&headers(2, 0, Duration::ZERO, "b"));
        let (_, remaining, _) = bucket.snapshot();
        assert_eq!(remaining, -2);
        std::thread::sleep(Duration::from_millis(5));
        let (_t, t) = task();
        assert_eq!(bucket.try_admit_or_enqueue(t, &ctx), Admission::Admitted);
        let (_, remaining, _) = bucket.snapshot();
        assert_eq!(remaining, 1, "reset restored the shrunken limit");
    }

    #[test]
    fn rejection_zeroes_window_and_requeues_ahead() {
        let (ctx, scheduler) = ctx();
        let bucket = Bucket::assumed(5, 64, Box::new(KeepAll));
        let (_t1, waiting) = task();
        {
            // Start with one task already parked.
            let mut t = bucket.tokens.lock().unwrap();
            t.remaining = 0;
        }
        bucket.try_admit_or_enqueue(waiting, &ctx);
        let (_t2, rejected) = task();
        let rejection = Rejection::new("slow down", Duration::from_millis(200), false);
        bucket.on_rejected(&rejection, Arc::clone(&rejected), &ctx);
        let (_, remaining, reset_known) = bucket.snapshot();
        assert_eq!(remaining, 0);
        assert!(reset_known);
        assert_eq!(bucket.backlog_len(), 2);
        assert_eq!(scheduler.pending(), 1, "drain scheduled at the retry deadline");
        // Drain resubmits the rejected task first.
        scheduler.fire_next();
        assert!(Arc::ptr_eq(&ctx.queue.pop_timeout(Duration::ZERO).unwrap(), &rejected));
    }

    #[test]
    fn promotion_is_one_way() {
        let bucket = Bucket::assumed(5, 64, Box::new(KeepAll));
        assert!(bucket.is_assumed());
        assert!(bucket.promote(&headers(7, 6, Duration::from_secs(5), "b1")));
        assert!(!bucket.is_assumed());
        assert_eq!(bucket.name().as_deref(), Some("b1"));
        // Second promotion is a no-op and must not resurrect the flag.
        assert!(!bucket.promote(&headers(9, 9, Duration::from_secs(5), "b2")));
        assert!(!bucket.is_assumed());
        assert_eq!(bucket.name().as_deref(), Some("b1"));
    }

    #[test]
    fn drain_pops_one_window_and_reschedules() {
        let (ctx, scheduler) = ctx();
        let bucket = Bucket::assumed(2, 64, Box::new(KeepAll));
        {
            let mut t = bucket.tokens.lock().unwrap();
            t.remaining = 0;
            t.reset_at = Some(Instant::now() + Duration::from_millis(100));
            t.reset_after = Duration::from_millis(100);
        }
        for _ in 0..5 {
            let (_t, t) = task();
            bucket.try_admit_or_enqueue(t, &ctx);
        }
        assert_eq!(bucket.backlog_len(), 5);
        assert_eq!(scheduler.pending(), 1);
        scheduler.fire_next();
        // Batch is the bucket limit (2); the rest waits for the next window.
        assert_eq!(ctx.queue.len(), 2);
        assert_eq!(bucket.backlog_len(), 3);
        assert_eq!(scheduler.pending(), 1, "follow-up drain scheduled");
        assert_eq!(scheduler.delays()[0], Duration::from_millis(100));
        scheduler.fire_next();
        scheduler.fire_next();
        assert_eq!(ctx.queue.len(), 5);
        assert_eq!(bucket.backlog_len(), 0);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn limitless_bucket_admits_until_rejected_and_drains_unbounded() {
        let (ctx, scheduler) = ctx();
        let bucket = Bucket::limitless(64, Box::new(KeepAll));
        for _ in 0..10 {
            let (_t, t) = task();
            assert_eq!(bucket.try_admit_or_enqueue(t, &ctx), Admission::Admitted);
        }
        let (_t, rejected) = task();
        let rejection = Rejection::new("global limit", Duration::from_millis(50), true);
        bucket.on_rejected(&rejection, rejected, &ctx);
        for _ in 0..7 {
            let (_t, t) = task();
            assert_eq!(bucket.try_admit_or_enqueue(t, &ctx), Admission::Queued);
        }
        assert_eq!(bucket.backlog_len(), 8);
        scheduler.fire_next();
        assert_eq!(ctx.queue.len(), 8, "limitless drains are unbounded by default");
        assert_eq!(bucket.backlog_len(), 0);
    }

    #[test]
    fn unbind_last_route_deletes_and_resubmits_backlog() {
        let (ctx, _) = ctx();
        let bucket = Bucket::assumed(1, 64, Box::new(KeepAll));
        let id_a = RateLimitId::Route { method: crate::route::Method::Get, path: "/a" };
        let id_b = RateLimitId::Route { method: crate::route::Method::Get, path: "/b" };
        assert!(bucket.bind(id_a.clone()));
        assert!(bucket.bind(id_b.clone()));
        {
            let mut t = bucket.tokens.lock().unwrap();
            t.remaining = 0;
        }
        let (_t, parked) = task();
        bucket.try_admit_or_enqueue(parked, &ctx);
        assert!(!bucket.unbind(&id_a, &ctx));
        assert!(!bucket.is_deleted());
        assert!(bucket.unbind(&id_b, &ctx));
        assert!(bucket.is_deleted());
        assert_eq!(bucket.backlog_len(), 0);
        assert_eq!(ctx.queue.len(), 1, "orphaned task handed back, not dropped");
        assert!(!bucket.bind(id_a), "deleted buckets are never reused");
    }

    #[test]
    fn overflow_remove_all_clears_backlog() {
        let (ctx, _) = ctx();
        let bucket = Bucket::assumed(1, 3, Box::new(DropAll));
        {
            let mut t = bucket.tokens.lock().unwrap();
            t.remaining = 0;
        }
        for _ in 0..3 {
            let (_t, t) = task();
            bucket.try_admit_or_enqueue(t, &ctx);
        }
        assert_eq!(bucket.backlog_len(), 3);
        // Fourth push crosses the threshold; the whole backlog is shed.
        let (_t, t) = task();
        bucket.try_admit_or_enqueue(t, &ctx);
        assert_eq!(bucket.backlog_len(), 0);
    }

    #[test]
    fn overflow_filter_removes_cancelled_only() {
        let (ctx, _) = ctx();
        let bucket = Bucket::assumed(1, 2, Box::new(DropCancelled::new()));
        {
            let mut t = bucket.tokens.lock().unwrap();
            t.remaining = 0;
        }
        let (live_ticket, live) = task();
        let (dead_ticket, dead) = task();
        dead_ticket.cancel();
        bucket.try_admit_or_enqueue(live, &ctx);
        bucket.try_admit_or_enqueue(dead, &ctx);
        let (_t, third) = task();
        bucket.try_admit_or_enqueue(third, &ctx);
        assert_eq!(bucket.backlog_len(), 2, "cancelled task was filtered out");
        assert!(live_ticket.is_pending());
    }
}
