//! Server-reported rate-limit state.
//!
//! [`RateLimitHeaders`] is the snapshot parsed from a successful response.
//! All four headers must be present; a partial set carries no information
//! and the bucket stays on assumed accounting. [`Rejection`] is the payload
//! of a throttled (429) response; its absolute retry deadline is derived
//! once, at construction, so queued retries do not drift.

use crate::transport::Headers;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RESET_HEADER: &str = "x-ratelimit-reset";
pub const BUCKET_HEADER: &str = "x-ratelimit-bucket";

/// Authoritative bucket state reported by the server on success.
#[derive(Debug, Clone)]
pub struct RateLimitHeaders {
    pub limit: i64,
    pub remaining: i64,
    /// Engine-clock instant of the window boundary.
    pub reset_at: Instant,
    /// Window length measured at parse time.
    pub reset_after: Duration,
    /// Opaque server-side bucket name.
    pub bucket: String,
}

impl RateLimitHeaders {
    /// Parse the four-header schema. Any absent or malformed header yields
    /// `None`: no information, keep assumed behavior.
    pub fn parse(headers: &Headers) -> Option<Self> {
        let limit = headers.get_i64(LIMIT_HEADER)?;
        let remaining = headers.get_i64(REMAINING_HEADER)?;
        let reset_epoch = headers.get_f64(RESET_HEADER)?;
        let bucket = headers.get(BUCKET_HEADER)?.to_string();

        let now_epoch =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64();
        let reset_after = Duration::from_secs_f64((reset_epoch - now_epoch).max(0.0));
        Some(Self { limit, remaining, reset_at: Instant::now() + reset_after, reset_after, bucket })
    }
}

#[derive(Debug, serde::Deserialize)]
struct RejectionBody {
    message: String,
    retry_after: f64,
    #[serde(default)]
    global: bool,
}

/// Payload of a throttled response.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub message: String,
    pub retry_after: Duration,
    /// Absolute deadline, derived at construction.
    pub retry_at: Instant,
    pub global: bool,
}

impl Rejection {
    pub fn new(message: impl Into<String>, retry_after: Duration, global: bool) -> Self {
        Self { message: message.into(), retry_after, retry_at: Instant::now() + retry_after, global }
    }

    /// Decode the JSON rejection body `{message, retry_after, global}`.
    pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
        let body: RejectionBody = serde_json::from_str(body)?;
        Ok(Self::new(body.message, Duration::from_secs_f64(body.retry_after.max(0.0)), body.global))
    }
}
