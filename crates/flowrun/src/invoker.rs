//! Ports through which the engine reaches out of the graph: running a stage's
//! closure in the owning function, and calling another function.

use flowpack::CompletionId;
use flowpack::Datum;
use flowpack::ErrorKind;
use flowpack::FlowId;
use flowpack::FlowResult;
use flowpack::Headers;
use flowpack::HttpMethod;

use crate::error::Result;

/// Runs a closure now and returns its encoded outcome.
///
/// An `Err` means the invocation itself failed; the engine resolves the stage
/// to a `stage-invoke-failed` error.
#[async_trait::async_trait]
pub trait StageInvoker: Send + Sync + 'static {
    async fn invoke_stage(
        &self,
        function_id: &str,
        flow: &FlowId,
        stage: &CompletionId,
        closure: &Datum,
        args: Vec<FlowResult>,
    ) -> Result<FlowResult>;
}

/// The HTTP response of an invoked function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl FunctionResponse {
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }

    /// The stage outcome: the response datum, failed unless the status is 2xx or 3xx.
    pub fn into_result(self) -> FlowResult {
        let success = self.is_success();
        let datum = Datum::HttpResponse { status: self.status, headers: self.headers, body: self.body };
        if success {
            return FlowResult::success(datum);
        }
        match FlowResult::failure(datum) {
            Ok(result) => result,
            Err(e) => FlowResult::error(ErrorKind::Unknown, e.to_string()),
        }
    }
}

/// Calls a function by id.
///
/// An `Err` means no response was obtained; the engine resolves the stage to
/// a `function-invoke-failed` error.
#[async_trait::async_trait]
pub trait FunctionInvoker: Send + Sync + 'static {
    async fn invoke_function(
        &self,
        function_id: &str,
        method: HttpMethod,
        headers: Headers,
        body: Vec<u8>,
    ) -> Result<FunctionResponse>;
}

/// A function invoker for graphs that never call out; every call fails.
pub struct NoFunctions;

#[async_trait::async_trait]
impl FunctionInvoker for NoFunctions {
    async fn invoke_function(&self, function_id: &str, _: HttpMethod, _: Headers, _: Vec<u8>) -> Result<FunctionResponse> {
        Err(crate::error::FlowError::Rejected(format!("no function invoker configured to call {}", function_id)))
    }
}
