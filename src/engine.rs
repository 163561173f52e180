//! The engine: submission surface wiring the dispatch queue, the bucket
//! registry, and the transport together.
//!
//! Flow for one request: the caller's thread enqueues a request task and
//! gets a [`Ticket`]; the worker pops it, passes the global gate, asks the
//! registry for the bucket matching the request's fingerprint, and either
//! executes the exchange or parks the task in the bucket. Whatever the
//! server answers is fed straight back into bucket accounting before the
//! ticket completes.
//!
//! A 429 never surfaces to the caller: the bucket absorbs it and a drain
//! retries the task once the window resets. Transient connectivity failures
//! are retried silently with backoff. Only real responses and fatal
//! transport errors complete tickets.

use crate::backoff::RetryDelay;
use crate::bucket::{Admission, BucketCtx};
use crate::config::EngineConfig;
use crate::dispatch::DispatchQueue;
use crate::error::{ConfigError, TaskError};
use crate::fingerprint::RateLimitId;
use crate::headers::{RateLimitHeaders, Rejection};
use crate::manager::RateLimitManager;
use crate::queue::SharedQueue;
use crate::route::Request;
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::task::{Attempt, Dispatchable, RunOutcome, Task};
use crate::ticket::{Ticket, TicketShared};
use crate::transport::{Response, Transport};
use std::sync::{Arc, Weak};
use std::time::Duration;

pub(crate) struct EngineInner {
    dispatch: DispatchQueue,
    manager: RateLimitManager,
    transport: Arc<dyn Transport>,
    ctx: BucketCtx,
}

/// The client-side dispatch engine. Cheap to clone; all clones share one
/// worker, one registry, and one transport.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Submit a request. Returns immediately; the exchange happens on the
    /// dispatch worker once its bucket admits it.
    pub fn submit(&self, request: Request) -> Ticket<Response> {
        let (ticket, task) = self.request_task(request);
        self.inner.dispatch.submit(task);
        ticket
    }

    /// Submit a request after `delay`; the enqueue itself is deferred.
    pub fn submit_after(&self, request: Request, delay: Duration) -> Ticket<Response> {
        let (ticket, task) = self.request_task(request);
        let queue = Arc::clone(&self.inner.ctx.queue);
        self.inner.ctx.scheduler.schedule(delay, Box::new(move || queue.push(task)));
        ticket
    }

    /// Submit an arbitrary unit of work, serialized with every request on
    /// the same worker but bypassing rate-limit accounting.
    pub fn submit_work<T, F>(&self, work: F) -> Ticket<T>
    where
        T: Send + Sync + 'static,
        F: FnMut() -> Attempt<T> + Send + 'static,
    {
        let (ticket, task) = Task::new(work);
        self.inner.dispatch.submit(task);
        ticket
    }

    /// [`submit_work`](Self::submit_work), deferred by `delay`.
    pub fn submit_work_after<T, F>(&self, work: F, delay: Duration) -> Ticket<T>
    where
        T: Send + Sync + 'static,
        F: FnMut() -> Attempt<T> + Send + 'static,
    {
        let (ticket, task) = Task::new(work);
        let queue = Arc::clone(&self.inner.ctx.queue);
        self.inner.ctx.scheduler.schedule(delay, Box::new(move || queue.push(task)));
        ticket
    }

    /// The bucket registry, exposing the shared-resource limit flag.
    pub fn manager(&self) -> &RateLimitManager {
        &self.inner.manager
    }

    /// Tasks currently waiting in the dispatch queue (bucket backlogs not
    /// included).
    pub fn queued(&self) -> usize {
        self.inner.ctx.queue.len()
    }

    /// Stop the dispatch worker. Queued tasks stay queued and their tickets
    /// stay pending; submissions after shutdown are never executed.
    pub fn shutdown(&self) {
        self.inner.dispatch.shutdown();
    }

    fn request_task(&self, request: Request) -> (Ticket<Response>, Arc<RestTask>) {
        let shared = TicketShared::new();
        let task = Arc::new(RestTask {
            request,
            shared: Arc::clone(&shared),
            engine: Arc::downgrade(&self.inner),
        });
        (Ticket::from_shared(shared), task)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").field("manager", &self.inner.manager).finish()
    }
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    transport: Option<Arc<dyn Transport>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self { transport: None, scheduler: None, config: EngineConfig::default() }
    }

    /// The boundary that performs exchanges. Required.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Timer provider for drains and deferred submissions. Defaults to a
    /// self-hosted tokio runtime.
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Engine, ConfigError> {
        let transport = self.transport.ok_or(ConfigError::MissingTransport)?;
        let scheduler: Arc<dyn Scheduler> = match self.scheduler {
            Some(scheduler) => scheduler,
            None => Arc::new(
                TokioScheduler::owned().map_err(|e| ConfigError::Runtime(e.to_string()))?,
            ),
        };
        let config = self.config;
        let queue = SharedQueue::new((config.queue_factory)());
        let retry = RetryDelay::new(config.retry_base, config.retry_max)?;
        let dispatch = DispatchQueue::start(
            Arc::clone(&queue),
            Arc::clone(&scheduler),
            retry,
            config.idle_wait,
        )
        .map_err(|e| ConfigError::Runtime(e.to_string()))?;
        let manager = RateLimitManager::new(
            config.assumed_budget,
            config.overflow_threshold,
            Arc::clone(&config.overflow_factory),
        );
        let ctx = BucketCtx {
            queue,
            scheduler,
            limitless_drain_batch: config.global_retry_budget,
        };
        Ok(Engine { inner: Arc::new(EngineInner { dispatch, manager, transport, ctx }) })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One rate-limited request: admission, exchange, accounting, completion.
struct RestTask {
    request: Request,
    shared: Arc<TicketShared<Response>>,
    // Weak: queued tasks must not keep a dead engine (and its worker) alive.
    engine: Weak<EngineInner>,
}

impl RestTask {
    fn rate_limited(
        &self,
        engine: &EngineInner,
        id: &RateLimitId,
        task: Arc<dyn Dispatchable>,
        response: &Response,
    ) -> RunOutcome {
        // Promotion and rejection accounting are independent; a promoting
        // response that is itself a rejection applies both.
        if let Some(headers) = RateLimitHeaders::parse(&response.headers) {
            engine.manager.apply_headers(id, &headers, &engine.ctx);
        }
        let rejection = match Rejection::parse(&response.body) {
            Ok(rejection) => rejection,
            Err(error) => {
                self.shared.complete(Err(TaskError::MalformedRejection(error.to_string())));
                return RunOutcome::Completed;
            }
        };
        if rejection.global {
            engine.manager.global().on_rejected(&rejection, task, &engine.ctx);
        } else {
            if id.is_scoped() {
                engine.manager.note_shared_limit();
            }
            engine.manager.bucket_for(id).on_rejected(&rejection, task, &engine.ctx);
        }
        RunOutcome::Parked
    }
}

impl Dispatchable for RestTask {
    fn run(self: Arc<Self>) -> RunOutcome {
        let Some(engine) = self.engine.upgrade() else {
            self.shared.complete(Err(TaskError::App("engine is shut down".into())));
            return RunOutcome::Completed;
        };
        let id = RateLimitId::of(&self.request);
        let task: Arc<dyn Dispatchable> = self.clone();

        if engine.manager.global().try_admit_or_enqueue(Arc::clone(&task), &engine.ctx)
            == Admission::Queued
        {
            tracing::debug!(route = self.request.route().path(), "held by global limit");
            return RunOutcome::Parked;
        }
        let bucket = engine.manager.bucket_for(&id);
        if bucket.try_admit_or_enqueue(Arc::clone(&task), &engine.ctx) == Admission::Queued {
            tracing::debug!(route = self.request.route().path(), "bucket exhausted, queued");
            return RunOutcome::Parked;
        }

        match engine.transport.send(&self.request) {
            Err(error) if error.is_transient() => {
                tracing::debug!(route = self.request.route().path(), %error, "transient failure");
                RunOutcome::Resubmit
            }
            Err(error) => {
                self.shared.complete(Err(error.into()));
                RunOutcome::Completed
            }
            Ok(response) if response.is_rate_limited() => {
                self.rate_limited(&engine, &id, task, &response)
            }
            Ok(response) => {
                if let Some(headers) = RateLimitHeaders::parse(&response.headers) {
                    engine.manager.apply_headers(&id, &headers, &engine.ctx);
                }
                self.shared.complete(Ok(response));
                RunOutcome::Completed
            }
        }
    }

    fn cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    fn wake_cancelled(&self) {
        self.shared.notify_cancelled();
    }

    fn fail(&self, error: TaskError) {
        self.shared.complete(Err(error));
    }
}
