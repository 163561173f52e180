//! The transport boundary the engine drives.
//!
//! The engine never constructs wire requests or parses domain payloads; it
//! decides *when* to call [`Transport::send`] and feeds the outcome back into
//! bucket accounting. [`ScriptedTransport`] is the stock test double: a queue
//! of canned outcomes handed out in order.

use crate::error::TransportError;
use crate::route::Request;
use std::collections::HashMap;
use std::sync::Mutex;

/// Case-insensitive response header map.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    map: HashMap<String, String>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.map.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name)?.trim().parse().ok()
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name)?.trim().parse().ok()
    }
}

/// One completed HTTP exchange as the engine sees it.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: String,
}

impl Response {
    pub fn new(status: u16, headers: Headers, body: impl Into<String>) -> Self {
        Self { status, headers, body: body.into() }
    }

    /// Check if the server rejected the exchange for rate limiting.
    pub fn is_rate_limited(&self) -> bool {
        self.status == 429
    }
}

/// The boundary that actually performs an exchange.
///
/// Called only from the dispatch worker thread, one exchange at a time.
pub trait Transport: Send + Sync {
    fn send(&self, request: &Request) -> Result<Response, TransportError>;
}

/// Test transport: hands out scripted outcomes in order and records how many
/// exchanges were attempted.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<Vec<Result<Response, TransportError>>>,
    sent: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one outcome to the script.
    pub fn push(&self, outcome: Result<Response, TransportError>) {
        self.script.lock().unwrap().push(outcome);
    }

    /// Route paths of every exchange attempted, in order.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: &Request) -> Result<Response, TransportError> {
        self.sent.lock().unwrap().push(request.route().path().to_string());
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            return Err(TransportError::Fatal("scripted transport exhausted".into()));
        }
        script.remove(0)
    }
}
