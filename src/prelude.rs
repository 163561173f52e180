//! Convenience re-exports for the common caller surface.

pub use crate::config::{EngineConfig, EngineConfigBuilder};
pub use crate::engine::{Engine, EngineBuilder};
pub use crate::error::{ConfigError, TaskError, TransportError};
pub use crate::fingerprint::RateLimitId;
pub use crate::headers::{RateLimitHeaders, Rejection};
pub use crate::manager::RateLimitManager;
pub use crate::overflow::{
    DropAll, DropCancelled, DropOlderThan, KeepAll, OverflowAction, OverflowPolicy,
};
pub use crate::route::{Method, Param, Request, Route, Scope, ScopeKind};
pub use crate::scheduler::{InlineScheduler, ManualScheduler, Scheduler, TokioScheduler};
pub use crate::task::Attempt;
pub use crate::ticket::{Ticket, Waited};
pub use crate::transport::{Headers, Response, ScriptedTransport, Transport};
