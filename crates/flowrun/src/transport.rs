//! # Transport Abstraction
//!
//! A minimal, async interface for exchanging HTTP-shaped messages with a
//! completer.
//!
//! ## Philosophy
//!
//! - **Message-Oriented**: The transport moves a method, a path, query
//!   parameters, headers and a body. It knows nothing about datums or stages.
//! - **Request-Response**: One request, one response. Status codes are handed
//!   back untouched; interpreting them is the caller's job.

use flowpack::Headers;
use flowpack::HttpMethod;
use flowpack::Part;

/// Errors that occur at the network/transport layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The peer is unreachable or the connection was dropped.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    /// The request did not complete within the transport's own deadline.
    #[error("request timed out")]
    Timeout,
    /// The peer answered with a status the caller does not accept.
    #[error("unexpected status {status}: {message}")]
    Status { status: u16, message: String },
    /// Generic I/O error or internal transport failure.
    #[error("i/o error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: HttpMethod,
    /// Path relative to the completer base URL, starting with `/`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Headers,
    pub body: Vec<u8>,
    /// Set on requests that wait for a stage; the transport's request timeout does not apply.
    pub long_poll: bool,
}

impl Request {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Headers::new(),
            body: Vec::new(),
            long_poll: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Carries a part as the message: its headers become request headers and
    /// its body the request body.
    pub fn with_part(mut self, part: Part) -> Self {
        for (name, value) in part.headers.iter() {
            self.headers.set(name, value);
        }
        self.body = part.body;
        self
    }

    pub fn long_poll(mut self) -> Self {
        self.long_poll = true;
        self
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn into_part(self) -> Part {
        Part::new(self.headers, self.body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self { status, headers: Headers::new(), body: Vec::new() }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_part(mut self, part: Part) -> Self {
        for (name, value) in part.headers.iter() {
            self.headers.set(name, value);
        }
        self.body = part.body;
        self
    }

    /// Plain-text response, used for errors.
    pub fn text(status: u16, message: impl Into<String>) -> Self {
        Self::new(status)
            .with_header(flowpack::names::CONTENT_TYPE, flowpack::ERROR_CONTENT_TYPE)
            .with_body(message.into().into_bytes())
    }

    pub fn is_success(&self) -> bool {
        self.status == 200 || self.status == 201
    }

    pub fn into_part(self) -> Part {
        Part::new(self.headers, self.body)
    }

    /// Fails with `TransportError::Status` unless the status is 200 or 201.
    pub fn require_success(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let message = String::from_utf8_lossy(&self.body).into_owned();
        Err(TransportError::Status { status: self.status, message })
    }
}

/// A mechanism to send a request and receive its response.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends a request and waits for the response.
    ///
    /// # invariants
    /// - Must return `Ok(response)` for any status the peer answers with.
    /// - Must return `Err` only if no response was obtained.
    async fn send(&self, request: Request) -> Result<Response>;
}
