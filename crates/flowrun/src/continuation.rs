//! # Continuation Handling
//!
//! The function side of a continuation invocation: decode the framed request,
//! dispatch the closure through the registry with a `Flow` attached to the
//! calling graph, and frame the outcome.
//!
//! ## Invariants
//!
//! - The reply status is always 200. Whether the stage succeeded is carried
//!   only by the embedded result.
//! - A request that cannot be dispatched still produces a result: a failed one
//!   carrying the classified platform error.

use std::sync::Arc;
use std::sync::Weak;

use flowpack::CompletionId;
use flowpack::Datum;
use flowpack::ErrorKind;
use flowpack::FlowId;
use flowpack::FlowResult;
use flowpack::Headers;
use flowpack::names;
use flowrpc::InvokeRequest;
use flowrpc::Registry;
use flowrpc::decode_response;
use flowrpc::encode_response;

use crate::client::CompleterClient;
use crate::error::FlowError;
use crate::error::Result;
use crate::flow::Flow;
use crate::invoker::StageInvoker;
use crate::transport::Response;
use crate::transport::TransportError;

pub struct ContinuationHandler {
    registry: Registry<Flow>,
    client: Arc<dyn CompleterClient>,
}

impl ContinuationHandler {
    pub fn new(registry: Registry<Flow>, client: Arc<dyn CompleterClient>) -> Self {
        Self { registry, client }
    }

    pub fn registry(&self) -> &Registry<Flow> {
        &self.registry
    }

    /// Answers one continuation request.
    pub async fn handle(&self, headers: &Headers, body: &[u8]) -> Response {
        let result = match self.run(headers, body).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, input = e.is_input_error(), "continuation could not be dispatched");
                FlowResult::error(e.error_kind(), e.to_string())
            }
        };
        match encode_response(&result) {
            Ok(bytes) => Response::new(200).with_body(bytes),
            Err(e) => {
                tracing::warn!(error = %e, "continuation result could not be framed");
                let fallback = FlowResult::error(ErrorKind::InvalidStageResponse, format!("result could not be framed: {}", e));
                match encode_response(&fallback) {
                    Ok(bytes) => Response::new(200).with_body(bytes),
                    Err(e) => Response::text(500, e.to_string()),
                }
            }
        }
    }

    async fn run(&self, headers: &Headers, body: &[u8]) -> flowrpc::Result<FlowResult> {
        let flow_id = headers
            .get(names::FLOW_ID)
            .map(FlowId::from)
            .ok_or(flowrpc::Error::Pack(flowpack::Error::MissingHeader(names::FLOW_ID)))?;
        let stage = headers.get(names::STAGE_ID).map(CompletionId::from);
        let request = InvokeRequest::decode(body)?;

        tracing::debug!(flow = %flow_id, stage = ?stage, args = request.args.len(), "continuation invoked");
        let flow = Flow::attached(self.client.clone(), flow_id, stage);
        self.registry.dispatch(flow, &request.closure, request.args).await
    }
}

/// Runs stages of the in-memory engine through a local `ContinuationHandler`,
/// using the same framing a remote invocation would.
pub struct LocalStageInvoker {
    handler: Weak<ContinuationHandler>,
}

impl LocalStageInvoker {
    /// Holds the handler weakly; the handler's client usually owns this invoker.
    pub fn new(handler: &Arc<ContinuationHandler>) -> Self {
        Self { handler: Arc::downgrade(handler) }
    }
}

#[async_trait::async_trait]
impl StageInvoker for LocalStageInvoker {
    async fn invoke_stage(
        &self,
        function_id: &str,
        flow: &FlowId,
        stage: &CompletionId,
        closure: &Datum,
        args: Vec<FlowResult>,
    ) -> Result<FlowResult> {
        let Some(handler) = self.handler.upgrade() else {
            return Err(FlowError::Transport(TransportError::ConnectionLost(format!("function {} has shut down", function_id))));
        };
        let body = InvokeRequest::new(closure.clone(), args).encode()?;
        let headers = Headers::new().with(names::FLOW_ID, flow.as_str()).with(names::STAGE_ID, stage.as_str());

        let response = handler.handle(&headers, &body).await.require_success()?;
        Ok(decode_response(&response.body)?)
    }
}
