#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Sluice
//!
//! Client-side dispatch engine for rate-limited HTTP APIs: submit
//! request-shaped tasks, get a [`Ticket`] back, and let the engine admit,
//! queue, and retry them against per-route token buckets that learn their
//! real limits from server response headers.
//!
//! ## Features
//!
//! - **Serialized dispatch**: one dedicated worker executes all exchanges in
//!   FIFO order, so bucket accounting needs no distributed coordination
//! - **Per-route buckets** selected by a deterministic request fingerprint,
//!   promoted from assumed budgets to server-authoritative limits
//! - **Header-driven reconciliation** of limit, remaining, and reset time
//! - **Scheduled drains** that resubmit throttled work exactly when a rate
//!   window resets; 429s never reach the caller
//! - **Silent retry with backoff** for transient connectivity failures
//! - **Overflow policies** bounding backlog growth per bucket
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use sluice::prelude::*;
//!
//! let transport = Arc::new(ScriptedTransport::new());
//! transport.push(Ok(Response::new(200, Headers::new(), "ok")));
//!
//! let engine = Engine::builder()
//!     .transport(transport)
//!     .scheduler(Arc::new(InlineScheduler))
//!     .build()
//!     .unwrap();
//!
//! let ticket = engine.submit(Request::new(Method::Get, Route::unique("/status")));
//! match ticket.wait() {
//!     Waited::Done(Ok(response)) => assert_eq!(response.body, "ok"),
//!     other => panic!("unexpected outcome: {:?}", other),
//! }
//! engine.shutdown();
//! ```

pub mod backoff;
mod bucket;
pub mod config;
mod dispatch;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod headers;
pub mod manager;
pub mod overflow;
pub mod prelude;
pub mod queue;
pub mod route;
pub mod scheduler;
pub mod task;
pub mod ticket;
pub mod transport;

// Re-exports
pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder};
pub use error::{ConfigError, TaskError, TransportError};
pub use fingerprint::RateLimitId;
pub use headers::{RateLimitHeaders, Rejection};
pub use manager::RateLimitManager;
pub use overflow::{OverflowAction, OverflowPolicy};
pub use route::{Method, Param, Request, Route, Scope, ScopeKind};
pub use scheduler::{Scheduler, TokioScheduler};
pub use task::Attempt;
pub use ticket::{Ticket, Waited};
pub use transport::{Headers, Response, Transport};
