//! Fingerprinting: mapping a request to the identity of the bucket that
//! governs it.
//!
//! The fingerprint must be pure: the same logical request always yields an
//! equal [`RateLimitId`], across threads and across retries. Equality and
//! hashing are structural, never identity-based.
//!
//! Identity selection:
//! 1. A request carrying a [`Scope`](crate::route::Scope) uses scope identity
//!    (parent resource + kind tag).
//! 2. A route marked unique uses route identity (method + static path).
//! 3. Otherwise the identity is a seed folded from the method, the static
//!    path segments, and every identifying parameter value. If any parameter
//!    is *not* identifying, the identity falls back to the full template
//!    string with identifying values substituted and incidental ones blanked,
//!    so two requests are fingerprint-equal exactly when the remote limiter
//!    treats them the same.

use crate::route::{Method, Request, ScopeKind};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fold(seed: u64, bytes: &[u8]) -> u64 {
    let mut hash = seed;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    // Separator keeps ("ab","c") distinct from ("a","bc").
    hash ^= 0xff;
    hash.wrapping_mul(FNV_PRIME)
}

/// Key for a shared (non-unique) route family.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SharedKey {
    /// Seed folded from method, static segments, and identifying values.
    Seed(u64),
    /// Substituted template, used when any parameter is incidental.
    Path(String),
}

/// Identity of the bucket governing a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateLimitId {
    /// One bucket per static endpoint.
    Route { method: Method, path: &'static str },
    /// One bucket per route family and identifying-parameter combination.
    Shared(SharedKey),
    /// One limitless bucket per parent resource and kind.
    Scope { parent: u64, kind: ScopeKind },
}

impl RateLimitId {
    /// Compute the fingerprint of a request.
    pub fn of(request: &Request) -> Self {
        if let Some(scope) = request.scope_tag() {
            return RateLimitId::Scope { parent: scope.parent, kind: scope.kind };
        }
        let route = request.route();
        if route.is_unique() {
            return RateLimitId::Route { method: request.method(), path: route.path() };
        }
        if request.params().iter().all(|p| p.is_identifying()) {
            let mut seed = fold(FNV_OFFSET, request.method().as_str().as_bytes());
            for segment in route.path().split('/') {
                if !segment.is_empty() && !segment.starts_with('{') {
                    seed = fold(seed, segment.as_bytes());
                }
            }
            for param in request.params() {
                seed = fold(seed, param.value().as_bytes());
            }
            RateLimitId::Shared(SharedKey::Seed(seed))
        } else {
            RateLimitId::Shared(SharedKey::Path(substituted_path(request)))
        }
    }

    /// Check if this identity selects a limitless shared-resource bucket.
    pub fn is_scoped(&self) -> bool {
        matches!(self, RateLimitId::Scope { .. })
    }
}

/// Template with identifying values substituted and incidental placeholders
/// blanked. Identifying parameters without a placeholder are appended, so
/// they still distinguish the identity.
fn substituted_path(request: &Request) -> String {
    let mut path = format!("{} {}", request.method(), request.route().path());
    let mut appended = String::new();
    for param in request.params() {
        let placeholder = format!("{{{}}}", param.name());
        let replacement = if param.is_identifying() { param.value() } else { "" };
        if path.contains(placeholder.as_str()) {
            path = path.replace(placeholder.as_str(), replacement);
        } else if param.is_identifying() {
            appended.push('&');
            appended.push_str(param.name());
            appended.push('=');
            appended.push_str(param.value());
        }
    }
    path.push_str(&appended);
    path
}
