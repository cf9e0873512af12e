//! HTTP transport backed by `reqwest`.

use std::time::Duration;

use flowpack::Headers;

use crate::config::FlowConfig;
use crate::transport;
use crate::transport::Request;
use crate::transport::Response;
use crate::transport::Transport;
use crate::transport::TransportError;

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Option<Duration>,
}

impl HttpTransport {
    /// `request_timeout` bounds every request except long polls.
    pub fn new(base_url: impl Into<String>, request_timeout: Option<Duration>) -> transport::Result<Self> {
        let client = reqwest::Client::builder().build().map_err(|e| TransportError::Io(e.to_string()))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url, request_timeout })
    }

    pub fn from_config(config: &FlowConfig) -> transport::Result<Self> {
        Self::new(config.completer_base_url.clone(), config.request_timeout)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn map_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::ConnectionLost(e.to_string())
    } else {
        TransportError::Io(e.to_string())
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request) -> transport::Result<Response> {
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| TransportError::Io(e.to_string()))?;
        let url = format!("{}{}", self.base_url, request.path);

        let mut builder = self.client.request(method, url).query(&request.query);
        if let Some(timeout) = self.request_timeout.filter(|_| !request.long_poll) {
            builder = builder.timeout(timeout);
        }
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }

        let resp = builder.body(request.body).send().await.map_err(map_error)?;

        let status = resp.status().as_u16();
        let mut headers = Headers::new();
        for (name, value) in resp.headers() {
            match value.to_str() {
                Ok(v) => headers.set(name.as_str(), v),
                Err(_) => tracing::debug!(header = %name, "dropping non-text response header"),
            }
        }
        let body = resp.bytes().await.map_err(map_error)?.to_vec();

        Ok(Response { status, headers, body })
    }
}
