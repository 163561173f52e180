//! Request descriptors: what the engine needs to know about an outbound call
//! in order to pick the bucket that governs it.
//!
//! The engine never builds wire requests; a [`Request`] is the scheduling
//! view of one: method, route template, the parameters that matter for
//! rate-limit identity, and an optional shared-resource scope.

use std::fmt;

/// HTTP method of an outbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A route template such as `/containers/{container_id}/items/{item_id}`.
///
/// A route marked `unique` is known to be rate-limited per endpoint on the
/// server side, so every call to it shares one bucket regardless of
/// parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Route {
    path: &'static str,
    unique: bool,
}

impl Route {
    /// A parameterized route; identity depends on its parameters.
    pub fn new(path: &'static str) -> Self {
        Self { path, unique: false }
    }

    /// A route with exactly one bucket per endpoint.
    pub fn unique(path: &'static str) -> Self {
        Self { path, unique: true }
    }

    pub fn path(&self) -> &'static str {
        self.path
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }
}

/// One path or query parameter, flagged by whether the remote rate limiter
/// distinguishes requests on its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    name: &'static str,
    value: String,
    identifying: bool,
}

impl Param {
    /// A parameter the remote limiter keys buckets on.
    pub fn identifying(name: &'static str, value: impl Into<String>) -> Self {
        Self { name, value: value.into(), identifying: true }
    }

    /// A parameter the remote limiter ignores; two requests differing only
    /// here share a bucket.
    pub fn incidental(name: &'static str, value: impl Into<String>) -> Self {
        Self { name, value: value.into(), identifying: false }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_identifying(&self) -> bool {
        self.identifying
    }
}

/// Kind tag for a scoped shared resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeKind(&'static str);

impl ScopeKind {
    pub const fn new(kind: &'static str) -> Self {
        Self(kind)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Shared-resource scope: all requests touching the same parent resource of
/// the same kind share one limitless bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scope {
    pub parent: u64,
    pub kind: ScopeKind,
}

impl Scope {
    pub fn new(parent: u64, kind: ScopeKind) -> Self {
        Self { parent, kind }
    }
}

/// The scheduling view of one outbound call.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    route: Route,
    params: Vec<Param>,
    scope: Option<Scope>,
    body: Option<String>,
}

impl Request {
    pub fn new(method: Method, route: Route) -> Self {
        Self { method, route, params: Vec::new(), scope: None, body: None }
    }

    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn route(&self) -> Route {
        self.route
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn scope_tag(&self) -> Option<Scope> {
        self.scope
    }

    pub fn body_text(&self) -> Option<&str> {
        self.body.as_deref()
    }
}
