//! Blocking HTTP transport shared by the API clients
//!
//! Clients build [`HttpRequest`] values and hand them to a [`Transport`].
//! [`ReqwestTransport`] talks to the network; [`ScriptedTransport`] replays
//! canned responses and records every request, for tests and dry runs.

use crate::error::{MigrationError, Result};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Failure below the HTTP layer
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    Connection(String),
    Timeout,
    Other(String),
}

impl TransportError {
    /// Convert into a pipeline error naming the failing path
    pub fn into_error(self, path: &str) -> MigrationError {
        let path = path.to_string();
        match self {
            TransportError::Connection(_) => MigrationError::Connection { path },
            TransportError::Timeout => MigrationError::Timeout { path },
            TransportError::Other(message) => MigrationError::Request { path, message },
        }
    }
}

pub trait Transport: Send + Sync {
    fn send(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, TransportError>;
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {token}"))
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Shorten a response body for error messages
pub fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

// ============================================================================
// Network transport
// ============================================================================

/// Transport backed by a blocking reqwest client
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("spacemk/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MigrationError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

fn classify(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_connect() {
        TransportError::Connection(error.to_string())
    } else {
        TransportError::Other(error.to_string())
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.text().map_err(classify)?;
        Ok(HttpResponse { status, body })
    }
}

// ============================================================================
// Scripted transport
// ============================================================================

type Reply = std::result::Result<HttpResponse, TransportError>;

struct Route {
    method: Method,
    url_suffix: String,
    replies: VecDeque<Reply>,
}

/// Replays canned replies by method and URL suffix, recording every request
///
/// Replies for a route are consumed in order; the last one repeats. A request
/// with no matching route gets a 404.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for `method` on URLs ending with `url_suffix`
    pub fn on(self, method: Method, url_suffix: &str, reply: Reply) -> Self {
        if let Ok(mut routes) = self.routes.lock() {
            match routes
                .iter_mut()
                .find(|r| r.method == method && r.url_suffix == url_suffix)
            {
                Some(route) => route.replies.push_back(reply),
                None => routes.push(Route {
                    method,
                    url_suffix: url_suffix.to_string(),
                    replies: VecDeque::from([reply]),
                }),
            }
        }
        self
    }

    /// Queue a 200 JSON reply
    pub fn json(self, method: Method, url_suffix: &str, body: serde_json::Value) -> Self {
        self.on(method, url_suffix, Ok(HttpResponse::ok(body.to_string())))
    }

    /// Every request sent so far
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Requests matching a method and URL suffix
    pub fn requests_to(&self, method: Method, url_suffix: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.url.ends_with(url_suffix))
            .collect()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: &HttpRequest) -> Reply {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let mut routes = self
            .routes
            .lock()
            .map_err(|_| TransportError::Other("scripted transport poisoned".to_string()))?;
        // Longest suffix wins so `/plans/plan-1` beats `/plans`.
        let route = routes
            .iter_mut()
            .filter(|r| r.method == request.method && request.url.ends_with(&r.url_suffix))
            .max_by_key(|r| r.url_suffix.len());
        match route {
            Some(route) if route.replies.len() > 1 => route
                .replies
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::new(404, ""))),
            Some(route) => route
                .replies
                .front()
                .cloned()
                .unwrap_or_else(|| Ok(HttpResponse::new(404, ""))),
            None => Ok(HttpResponse::new(404, "")),
        }
    }
}
