//! # Remote Completer Client
//!
//! `CompleterClient` over a `Transport`, speaking the completer routes. Each
//! datum travels as the request itself: the part's headers become request
//! headers and its body the request body.
//!
//! ## Invariants
//!
//! - A stage-adding call succeeds only if the reply carries `FnProject-StageID`.
//! - 404 and 409 replies surface as `FlowError::Rejected`, matching what the
//!   in-memory engine returns for the same call.

use std::sync::Arc;
use std::time::Duration;

use flowpack::CompletionId;
use flowpack::Datum;
use flowpack::FlowId;
use flowpack::FlowResult;
use flowpack::Headers;
use flowpack::HttpMethod;
use flowpack::Part;
use flowpack::names;

use crate::client::CompleterClient;
use crate::client::ExternalCompletion;
use crate::client::StageSpec;
use crate::config::FlowConfig;
use crate::error::FlowError;
use crate::error::Result;
use crate::http::HttpTransport;
use crate::location::CodeLocation;
use crate::transport::Request;
use crate::transport::Response;
use crate::transport::Transport;
use crate::transport::TransportError;

pub struct RemoteCompleterClient {
    transport: Arc<dyn Transport>,
    base_url: String,
}

impl RemoteCompleterClient {
    /// `base_url` is only used to build external completion URLs.
    pub fn new(transport: Arc<dyn Transport>, base_url: impl Into<String>) -> Self {
        Self { transport, base_url: base_url.into().trim_end_matches('/').to_string() }
    }

    /// A client speaking HTTP to the configured completer.
    pub fn from_config(config: &FlowConfig) -> Result<Self> {
        let transport = HttpTransport::from_config(config)?;
        let base_url = transport.base_url().to_string();
        Ok(Self::new(Arc::new(transport), base_url))
    }

    async fn call(&self, request: Request) -> Result<Response> {
        let response = self.transport.send(request).await?;
        if response.is_success() {
            return Ok(response);
        }
        let message = String::from_utf8_lossy(&response.body).into_owned();
        Err(match response.status {
            404 | 409 => FlowError::Rejected(message),
            400 => FlowError::Protocol(format!("completer refused request: {}", message)),
            408 => FlowError::Timeout,
            status => FlowError::Transport(TransportError::Status { status, message }),
        })
    }

    async fn add(&self, request: Request) -> Result<CompletionId> {
        let response = self.call(request).await?;
        match response.headers.get(names::STAGE_ID) {
            Some(id) => Ok(CompletionId::new(id)),
            None => Err(FlowError::Protocol("completer reply has no stage id".into())),
        }
    }
}

fn graph_path(flow: &FlowId, op: &str) -> String {
    format!("/graph/{}/{}", flow, op)
}

fn carrying(request: Request, part: Part, location: &CodeLocation) -> Request {
    request.with_part(part).with_header(names::CODE_LOCATION, location.as_str())
}

fn joined(stages: &[CompletionId]) -> String {
    stages.iter().map(CompletionId::as_str).collect::<Vec<_>>().join(",")
}

#[async_trait::async_trait]
impl CompleterClient for RemoteCompleterClient {
    async fn create_flow(&self, function_id: &str) -> Result<FlowId> {
        let response = self.call(Request::post("/graph").with_query("functionId", function_id)).await?;
        match response.headers.get(names::FLOW_ID) {
            Some(id) => Ok(FlowId::new(id)),
            None => Err(FlowError::Protocol("completer reply has no flow id".into())),
        }
    }

    async fn add_stage(&self, flow: &FlowId, spec: StageSpec) -> Result<CompletionId> {
        spec.validate()?;
        let request = match spec.dependencies.as_slice() {
            [] => Request::post(graph_path(flow, spec.combinator.wire_name())),
            [stage, rest @ ..] => {
                let path = format!("/graph/{}/stage/{}/{}", flow, stage, spec.combinator.wire_name());
                let mut request = Request::post(path);
                if let Some(other) = rest.first() {
                    request = request.with_query("other", other.as_str());
                }
                request
            }
        };
        self.add(carrying(request, spec.closure.to_part(), &spec.location)).await
    }

    async fn completed_value(&self, flow: &FlowId, result: FlowResult, location: CodeLocation) -> Result<CompletionId> {
        let request = Request::post(graph_path(flow, "completedValue"));
        self.add(carrying(request, result.to_part(), &location)).await
    }

    async fn delay(&self, flow: &FlowId, delay: Duration, location: CodeLocation) -> Result<CompletionId> {
        let request = Request::post(graph_path(flow, "delay"))
            .with_query("delayMs", delay.as_millis().to_string())
            .with_header(names::CODE_LOCATION, location.as_str());
        self.add(request).await
    }

    async fn external_completion(&self, flow: &FlowId, location: CodeLocation) -> Result<ExternalCompletion> {
        let request =
            Request::post(graph_path(flow, "externalCompletion")).with_header(names::CODE_LOCATION, location.as_str());
        let id = self.add(request).await?;
        Ok(ExternalCompletion::new(&self.base_url, flow, id))
    }

    async fn invoke_function(
        &self,
        flow: &FlowId,
        function_id: &str,
        method: HttpMethod,
        headers: Headers,
        body: Vec<u8>,
        location: CodeLocation,
    ) -> Result<CompletionId> {
        let datum = Datum::HttpRequest { method, headers, body };
        let request = Request::post(graph_path(flow, "invokeFunction")).with_query("functionId", function_id);
        self.add(carrying(request, datum.to_part(), &location)).await
    }

    async fn all_of(&self, flow: &FlowId, stages: &[CompletionId], location: CodeLocation) -> Result<CompletionId> {
        let request = Request::post(graph_path(flow, "allOf"))
            .with_query("cids", joined(stages))
            .with_header(names::CODE_LOCATION, location.as_str());
        self.add(request).await
    }

    async fn any_of(&self, flow: &FlowId, stages: &[CompletionId], location: CodeLocation) -> Result<CompletionId> {
        let request = Request::post(graph_path(flow, "anyOf"))
            .with_query("cids", joined(stages))
            .with_header(names::CODE_LOCATION, location.as_str());
        self.add(request).await
    }

    async fn commit(&self, flow: &FlowId) -> Result<()> {
        self.call(Request::post(graph_path(flow, "commit"))).await?;
        Ok(())
    }

    async fn add_termination_hook(&self, flow: &FlowId, closure: Datum, location: CodeLocation) -> Result<()> {
        let request = Request::post(graph_path(flow, "terminationHook"));
        self.call(carrying(request, closure.to_part(), &location)).await?;
        Ok(())
    }

    async fn await_result(&self, flow: &FlowId, stage: &CompletionId, timeout: Option<Duration>) -> Result<FlowResult> {
        let mut request = Request::get(format!("/graph/{}/stage/{}", flow, stage)).long_poll();
        if let Some(limit) = timeout.filter(|t| !t.is_zero()) {
            request = request.with_query("timeoutMs", limit.as_millis().to_string());
        }
        let response = self.call(request).await?;
        Ok(FlowResult::from_part(&response.into_part())?)
    }
}
