//! The bucket registry.
//!
//! Maps route fingerprints to buckets, many-to-one: once the server names a
//! bucket, every fingerprint that reports the same name aliases onto one
//! authoritative bucket. Scoped (shared-resource) fingerprints and the
//! global limit live outside normal fingerprinting in always-limitless
//! buckets.
//!
//! The registry also carries the "shared-resource limit active" flag: set by
//! the engine when a rejection lands on a scoped bucket, cleared only by the
//! caller. Higher layers use it for extra backoff decisions; the engine
//! itself never reads it.

use crate::bucket::{Bucket, BucketCtx};
use crate::fingerprint::RateLimitId;
use crate::headers::RateLimitHeaders;
use crate::overflow::OverflowPolicyFactory;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub struct RateLimitManager {
    assumed_budget: i64,
    overflow_threshold: usize,
    overflow_factory: OverflowPolicyFactory,
    buckets: Mutex<HashMap<RateLimitId, Arc<Bucket>>>,
    by_name: Mutex<HashMap<String, Arc<Bucket>>>,
    scoped: Mutex<HashMap<RateLimitId, Arc<Bucket>>>,
    global: Arc<Bucket>,
    shared_limit_hit: AtomicBool,
}

impl RateLimitManager {
    pub(crate) fn new(
        assumed_budget: i64,
        overflow_threshold: usize,
        overflow_factory: OverflowPolicyFactory,
    ) -> Self {
        let global = Bucket::limitless(overflow_threshold, overflow_factory());
        Self {
            assumed_budget,
            overflow_threshold,
            overflow_factory,
            buckets: Mutex::new(HashMap::new()),
            by_name: Mutex::new(HashMap::new()),
            scoped: Mutex::new(HashMap::new()),
            global,
            shared_limit_hit: AtomicBool::new(false),
        }
    }

    /// The bucket gating everything after a global rejection.
    pub(crate) fn global(&self) -> &Arc<Bucket> {
        &self.global
    }

    /// Look up or lazily create the bucket governing `id`.
    ///
    /// Scoped identities get a limitless bucket each; everything else starts
    /// as an assumed bucket with the configured budget until promotion.
    pub(crate) fn bucket_for(&self, id: &RateLimitId) -> Arc<Bucket> {
        if id.is_scoped() {
            let mut scoped = self.scoped.lock().unwrap();
            return Arc::clone(scoped.entry(id.clone()).or_insert_with(|| {
                tracing::debug!(?id, "creating shared-resource bucket");
                let bucket =
                    Bucket::limitless(self.overflow_threshold, (self.overflow_factory)());
                bucket.bind(id.clone());
                bucket
            }));
        }
        let mut buckets = self.buckets.lock().unwrap();
        Arc::clone(buckets.entry(id.clone()).or_insert_with(|| {
            tracing::debug!(?id, budget = self.assumed_budget, "creating assumed bucket");
            let bucket = Bucket::assumed(
                self.assumed_budget,
                self.overflow_threshold,
                (self.overflow_factory)(),
            );
            bucket.bind(id.clone());
            bucket
        }))
    }

    /// Feed authoritative headers back into the registry.
    ///
    /// Promotes an assumed bucket in place, or, when another fingerprint
    /// already owns the reported bucket name, rebinds `id` onto that
    /// authoritative bucket and retires the provisional one (its backlog
    /// goes back to the dispatch queue via unbind).
    pub(crate) fn apply_headers(
        &self,
        id: &RateLimitId,
        headers: &RateLimitHeaders,
        ctx: &BucketCtx,
    ) {
        if id.is_scoped() {
            // Shared-resource buckets are depth-throttled; header accounting
            // does not apply to them.
            return;
        }
        let bucket = self.bucket_for(id);
        let aliased = {
            let by_name = self.by_name.lock().unwrap();
            by_name.get(&headers.bucket).filter(|b| !Arc::ptr_eq(b, &bucket)).map(Arc::clone)
        };
        match aliased {
            Some(authoritative) => {
                authoritative.bind(id.clone());
                self.buckets.lock().unwrap().insert(id.clone(), Arc::clone(&authoritative));
                bucket.unbind(id, ctx);
                authoritative.on_success(headers);
                tracing::debug!(
                    bucket = %headers.bucket,
                    "fingerprint aliased onto authoritative bucket"
                );
            }
            None => {
                if !bucket.promote(headers) {
                    bucket.on_success(headers);
                }
                self.by_name.lock().unwrap().insert(headers.bucket.clone(), bucket);
            }
        }
    }

    /// Record that a rejection reported shared scope.
    pub(crate) fn note_shared_limit(&self) {
        self.shared_limit_hit.store(true, Ordering::SeqCst);
    }

    /// Check the shared-resource limit flag. Stays set until
    /// [`clear_shared_limit`](Self::clear_shared_limit).
    pub fn shared_limit_active(&self) -> bool {
        self.shared_limit_hit.load(Ordering::SeqCst)
    }

    /// Clear the shared-resource limit flag. Caller policy decides when.
    pub fn clear_shared_limit(&self) {
        self.shared_limit_hit.store(false, Ordering::SeqCst);
    }

    /// Number of route buckets currently tracked (scoped and global excluded).
    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().unwrap().len()
    }
}

impl std::fmt::Debug for RateLimitManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitManager")
            .field("buckets", &self.bucket_count())
            .field("scoped", &self.scoped.lock().unwrap().len())
            .field("shared_limit_hit", &self.shared_limit_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overflow::KeepAll;
    use crate::queue::{FifoQueue, SharedQueue};
    use crate::route::{Method, ScopeKind};
    use crate::scheduler::ManualScheduler;
    use crate::task::{Attempt, Task};
    use std::time::{Duration, Instant};

    fn manager() -> RateLimitManager {
        RateLimitManager::new(5, 64, Arc::new(|| Box::new(KeepAll)))
    }

    fn ctx() -> BucketCtx {
        BucketCtx {
            queue: SharedQueue::new(Box::new(FifoQueue::new())),
            scheduler: Arc::new(ManualScheduler::new()),
            limitless_drain_batch: usize::MAX,
        }
    }

    fn route(path: &'static str) -> RateLimitId {
        RateLimitId::Route { method: Method::Get, path }
    }

    fn headers(bucket: &str) -> RateLimitHeaders {
        RateLimitHeaders {
            limit: 5,
            remaining: 4,
            reset_at: Instant::now() + Duration::from_secs(10),
            reset_after: Duration::from_secs(10),
            bucket: bucket.to_string(),
        }
    }

    #[test]
    fn same_fingerprint_reuses_bucket() {
        let manager = manager();
        let a = manager.bucket_for(&route("/a"));
        let b = manager.bucket_for(&route("/a"));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.is_assumed());
        assert_eq!(manager.bucket_count(), 1);
    }

    #[test]
    fn scoped_fingerprints_get_limitless_buckets() {
        let manager = manager();
        let id = RateLimitId::Scope { parent: 9, kind: ScopeKind::new("relay") };
        let bucket = manager.bucket_for(&id);
        assert!(bucket.is_limitless());
        assert!(!bucket.is_assumed());
        assert_eq!(manager.bucket_count(), 0, "scoped buckets live outside the route map");
    }

    #[test]
    fn headers_promote_assumed_bucket() {
        let manager = manager();
        let ctx = ctx();
        let id = route("/a");
        let bucket = manager.bucket_for(&id);
        manager.apply_headers(&id, &headers("b1"), &ctx);
        assert!(!bucket.is_assumed());
        assert_eq!(bucket.name().as_deref(), Some("b1"));
    }

    #[test]
    fn same_name_aliases_fingerprints_onto_one_bucket() {
        let manager = manager();
        let ctx = ctx();
        let id_a = route("/a");
        let id_b = route("/b");
        let bucket_a = manager.bucket_for(&id_a);
        let provisional_b = manager.bucket_for(&id_b);
        manager.apply_headers(&id_a, &headers("b1"), &ctx);
        // Park a task on the provisional bucket so the alias has something
        // to hand back.
        {
            let (_ticket, task) = Task::new(|| Attempt::Done(()));
            let rejection =
                crate::headers::Rejection::new("throttled", Duration::from_secs(1), false);
            provisional_b.on_rejected(&rejection, task, &ctx);
        }
        manager.apply_headers(&id_b, &headers("b1"), &ctx);
        let resolved_b = manager.bucket_for(&id_b);
        assert!(Arc::ptr_eq(&resolved_b, &bucket_a));
        assert!(provisional_b.is_deleted());
        assert_eq!(provisional_b.backlog_len(), 0);
        assert_eq!(ctx.queue.len(), 1, "provisional backlog resubmitted on alias");
    }

    #[test]
    fn shared_limit_flag_is_sticky_until_cleared() {
        let manager = manager();
        assert!(!manager.shared_limit_active());
        manager.note_shared_limit();
        assert!(manager.shared_limit_active());
        assert!(manager.shared_limit_active(), "reads do not clear the flag");
        manager.clear_shared_limit();
        assert!(!manager.shared_limit_active());
    }
}
