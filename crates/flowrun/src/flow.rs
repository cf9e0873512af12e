//! # Flow Handles
//!
//! `Flow` is the entry point for building a graph from inside a function;
//! `FlowFuture` is a proxy for one stage of it.
//!
//! ## Philosophy
//!
//! - **Ids, not state**: A future holds its flow id, its stage id and a client
//!   handle. It can be turned into a `FutureRef`, passed through a closure's
//!   captured state, and rebuilt on the other side.
//! - **Kinds are checked early**: Attaching a continuation whose kind cannot
//!   serve the combinator is rejected before anything is sent.
//! - **Call sites travel with stages**: Every stage-creating method records
//!   where it was called from.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;

use flowpack::CompletionId;
use flowpack::Datum;
use flowpack::FlowId;
use flowpack::FlowResult;
use flowpack::Headers;
use flowpack::HttpMethod;
use flowrpc::Closure;
use flowrpc::Returned;
use flowrpc::StageError;
use flowrpc::UserError;
use flowrpc::decode_value;
use flowrpc::encode_value;

use crate::client::Combinator;
use crate::client::CompleterClient;
use crate::error::FlowError;
use crate::error::Result;
use crate::location::CodeLocation;

/// How long `get_now` waits before settling for the default.
pub const GET_NOW_TIMEOUT: Duration = Duration::from_secs(1);

fn ensure_kind(combinator: Combinator, closure: &Closure) -> Result<()> {
    if combinator.accepts(closure.kind) {
        return Ok(());
    }
    Err(FlowError::Rejected(format!(
        "{} cannot run a {:?} continuation ({})",
        combinator.wire_name(),
        closure.kind,
        closure.code
    )))
}

// ============================================================================
//  FLOW
// ============================================================================

/// A handle on one flow.
#[derive(Clone)]
pub struct Flow {
    client: Arc<dyn CompleterClient>,
    id: FlowId,
    stage: Option<CompletionId>,
}

impl std::fmt::Debug for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow").field("id", &self.id).field("stage", &self.stage).finish()
    }
}

impl Flow {
    pub fn new(client: Arc<dyn CompleterClient>, id: FlowId) -> Self {
        Self { client, id, stage: None }
    }

    /// A handle for a continuation running as `stage` of the flow.
    pub fn attached(client: Arc<dyn CompleterClient>, id: FlowId, stage: Option<CompletionId>) -> Self {
        Self { client, id, stage }
    }

    pub fn id(&self) -> &FlowId {
        &self.id
    }

    /// The stage whose continuation is running, if any.
    pub fn current_stage(&self) -> Option<&CompletionId> {
        self.stage.as_ref()
    }

    pub fn client(&self) -> &Arc<dyn CompleterClient> {
        &self.client
    }

    /// Wraps an existing stage of this flow.
    pub fn future(&self, id: CompletionId) -> FlowFuture {
        FlowFuture { flow: self.clone(), id }
    }

    /// Rebuilds a future from its reference. The reference must belong to this flow.
    pub fn resolve(&self, reference: &FutureRef) -> Result<FlowFuture> {
        if reference.flow_id != self.id {
            return Err(FlowError::Rejected(format!(
                "stage {} belongs to flow {}, not {}",
                reference.completion_id, reference.flow_id, self.id
            )));
        }
        Ok(self.future(reference.completion_id.clone()))
    }

    fn check_member(&self, future: &FlowFuture) -> Result<()> {
        if future.flow.id == self.id {
            return Ok(());
        }
        Err(FlowError::Rejected(format!("stage {} belongs to flow {}", future.id, future.flow.id)))
    }

    /// Runs a `Supplier` or `Runnable` continuation as soon as possible.
    #[track_caller]
    pub fn supply(&self, closure: Closure) -> impl Future<Output = Result<FlowFuture>> + Send {
        let location = CodeLocation::caller();
        async move {
            ensure_kind(Combinator::Supply, &closure)?;
            let id = self.client.supply(&self.id, closure.to_datum()?, location).await?;
            Ok(self.future(id))
        }
    }

    /// A stage that completes with `Empty` after `delay`.
    #[track_caller]
    pub fn delay(&self, delay: Duration) -> impl Future<Output = Result<FlowFuture>> + Send {
        let location = CodeLocation::caller();
        async move {
            let id = self.client.delay(&self.id, delay, location).await?;
            Ok(self.future(id))
        }
    }

    /// A stage already completed with `value`.
    #[track_caller]
    pub fn completed_value<T: Serialize + ?Sized + Sync>(&self, value: &T) -> impl Future<Output = Result<FlowFuture>> + Send {
        let location = CodeLocation::caller();
        async move {
            let result = FlowResult::success(encode_value(value)?);
            let id = self.client.completed_value(&self.id, result, location).await?;
            Ok(self.future(id))
        }
    }

    /// A stage already failed with `error`.
    #[track_caller]
    pub fn failed_value(&self, error: UserError) -> impl Future<Output = Result<FlowFuture>> + Send {
        let location = CodeLocation::caller();
        async move {
            let result = StageError::User(error).to_result()?;
            let id = self.client.completed_value(&self.id, result, location).await?;
            Ok(self.future(id))
        }
    }

    /// A stage completed from outside the flow by a request to one of its URLs.
    #[track_caller]
    pub fn external_future(&self) -> impl Future<Output = Result<ExternalFuture>> + Send {
        let location = CodeLocation::caller();
        async move {
            let external = self.client.external_completion(&self.id, location).await?;
            Ok(ExternalFuture {
                future: self.future(external.completion_id),
                complete_url: external.complete_url,
                fail_url: external.fail_url,
            })
        }
    }

    /// Calls another function; the stage completes with its `HttpResponse`,
    /// failed unless the status is 2xx or 3xx.
    #[track_caller]
    pub fn invoke_function(
        &self,
        function_id: impl Into<String>,
        method: HttpMethod,
        headers: Headers,
        body: impl Into<Vec<u8>>,
    ) -> impl Future<Output = Result<FlowFuture>> + Send {
        let location = CodeLocation::caller();
        let function_id = function_id.into();
        let body = body.into();
        async move {
            let id = self.client.invoke_function(&self.id, &function_id, method, headers, body, location).await?;
            Ok(self.future(id))
        }
    }

    /// Completes with `Empty` once all `futures` succeed, or with the first failure.
    #[track_caller]
    pub fn all_of(&self, futures: &[&FlowFuture]) -> impl Future<Output = Result<FlowFuture>> + Send {
        let location = CodeLocation::caller();
        let ids: Vec<CompletionId> = futures.iter().map(|f| f.id.clone()).collect();
        let members: Result<()> = futures.iter().try_for_each(|f| self.check_member(f));
        async move {
            members?;
            let id = self.client.all_of(&self.id, &ids, location).await?;
            Ok(self.future(id))
        }
    }

    /// Completes with the outcome of whichever of `futures` completes first.
    #[track_caller]
    pub fn any_of(&self, futures: &[&FlowFuture]) -> impl Future<Output = Result<FlowFuture>> + Send {
        let location = CodeLocation::caller();
        let ids: Vec<CompletionId> = futures.iter().map(|f| f.id.clone()).collect();
        let members: Result<()> = futures.iter().try_for_each(|f| self.check_member(f));
        async move {
            members?;
            let id = self.client.any_of(&self.id, &ids, location).await?;
            Ok(self.future(id))
        }
    }

    /// Queues a `Consumer` continuation to run with the final flow state once
    /// the flow is committed and idle.
    #[track_caller]
    pub fn add_termination_hook(&self, closure: Closure) -> impl Future<Output = Result<()>> + Send {
        let location = CodeLocation::caller();
        async move {
            if closure.kind != flowrpc::ContinuationKind::Consumer {
                return Err(FlowError::Rejected(format!("termination hook {} must be a consumer", closure.code)));
            }
            self.client.add_termination_hook(&self.id, closure.to_datum()?, location).await
        }
    }
}

/// A future completed through its URLs.
#[derive(Debug, Clone)]
pub struct ExternalFuture {
    pub future: FlowFuture,
    pub complete_url: String,
    pub fail_url: String,
}

// ============================================================================
//  FUTURE
// ============================================================================

/// The serializable form of a `FlowFuture`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FutureRef {
    pub flow_id: FlowId,
    pub completion_id: CompletionId,
}

/// A proxy for one stage.
#[derive(Debug, Clone)]
pub struct FlowFuture {
    flow: Flow,
    id: CompletionId,
}

impl FlowFuture {
    pub fn id(&self) -> &CompletionId {
        &self.id
    }

    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    pub fn to_ref(&self) -> FutureRef {
        FutureRef { flow_id: self.flow.id.clone(), completion_id: self.id.clone() }
    }

    /// Returning this from a compose continuation flattens the stage into it.
    pub fn returned(&self) -> Returned {
        Returned::Stage(self.id.clone())
    }

    async fn chain(
        &self,
        combinator: Combinator,
        other: Option<&FlowFuture>,
        closure: Closure,
        location: CodeLocation,
    ) -> Result<FlowFuture> {
        ensure_kind(combinator, &closure)?;
        if let Some(other) = other {
            self.flow.check_member(other)?;
        }
        let closure = closure.to_datum()?;
        let (client, flow) = (&self.flow.client, &self.flow.id);
        let id = match other {
            None => match combinator {
                Combinator::ThenApply => client.then_apply(flow, &self.id, closure, location).await?,
                Combinator::ThenAccept => client.then_accept(flow, &self.id, closure, location).await?,
                Combinator::ThenRun => client.then_run(flow, &self.id, closure, location).await?,
                Combinator::ThenCompose => client.then_compose(flow, &self.id, closure, location).await?,
                Combinator::Handle => client.handle(flow, &self.id, closure, location).await?,
                Combinator::WhenComplete => client.when_complete(flow, &self.id, closure, location).await?,
                Combinator::Exceptionally => client.exceptionally(flow, &self.id, closure, location).await?,
                Combinator::ExceptionallyCompose => client.exceptionally_compose(flow, &self.id, closure, location).await?,
                other => return Err(FlowError::Rejected(format!("{} needs another stage", other.wire_name()))),
            },
            Some(other) => match combinator {
                Combinator::AcceptEither => client.accept_either(flow, &self.id, &other.id, closure, location).await?,
                Combinator::ApplyToEither => client.apply_to_either(flow, &self.id, &other.id, closure, location).await?,
                Combinator::ThenAcceptBoth => client.then_accept_both(flow, &self.id, &other.id, closure, location).await?,
                Combinator::ThenCombine => client.then_combine(flow, &self.id, &other.id, closure, location).await?,
                single => return Err(FlowError::Rejected(format!("{} takes a single stage", single.wire_name()))),
            },
        };
        Ok(self.flow.future(id))
    }

    #[track_caller]
    pub fn then_apply(&self, closure: Closure) -> impl Future<Output = Result<FlowFuture>> + Send {
        self.chain(Combinator::ThenApply, None, closure, CodeLocation::caller())
    }

    #[track_caller]
    pub fn then_accept(&self, closure: Closure) -> impl Future<Output = Result<FlowFuture>> + Send {
        self.chain(Combinator::ThenAccept, None, closure, CodeLocation::caller())
    }

    #[track_caller]
    pub fn then_run(&self, closure: Closure) -> impl Future<Output = Result<FlowFuture>> + Send {
        self.chain(Combinator::ThenRun, None, closure, CodeLocation::caller())
    }

    /// The closure returns another future (see `returned`); this stage takes its outcome.
    #[track_caller]
    pub fn then_compose(&self, closure: Closure) -> impl Future<Output = Result<FlowFuture>> + Send {
        self.chain(Combinator::ThenCompose, None, closure, CodeLocation::caller())
    }

    /// Runs on success or failure with `(value, error)`; exactly one of them is empty.
    #[track_caller]
    pub fn handle(&self, closure: Closure) -> impl Future<Output = Result<FlowFuture>> + Send {
        self.chain(Combinator::Handle, None, closure, CodeLocation::caller())
    }

    /// Observes the outcome without changing it.
    #[track_caller]
    pub fn when_complete(&self, closure: Closure) -> impl Future<Output = Result<FlowFuture>> + Send {
        self.chain(Combinator::WhenComplete, None, closure, CodeLocation::caller())
    }

    #[track_caller]
    pub fn exceptionally(&self, closure: Closure) -> impl Future<Output = Result<FlowFuture>> + Send {
        self.chain(Combinator::Exceptionally, None, closure, CodeLocation::caller())
    }

    #[track_caller]
    pub fn exceptionally_compose(&self, closure: Closure) -> impl Future<Output = Result<FlowFuture>> + Send {
        self.chain(Combinator::ExceptionallyCompose, None, closure, CodeLocation::caller())
    }

    #[track_caller]
    pub fn accept_either(&self, other: &FlowFuture, closure: Closure) -> impl Future<Output = Result<FlowFuture>> + Send {
        self.chain(Combinator::AcceptEither, Some(other), closure, CodeLocation::caller())
    }

    #[track_caller]
    pub fn apply_to_either(&self, other: &FlowFuture, closure: Closure) -> impl Future<Output = Result<FlowFuture>> + Send {
        self.chain(Combinator::ApplyToEither, Some(other), closure, CodeLocation::caller())
    }

    #[track_caller]
    pub fn then_accept_both(&self, other: &FlowFuture, closure: Closure) -> impl Future<Output = Result<FlowFuture>> + Send {
        self.chain(Combinator::ThenAcceptBoth, Some(other), closure, CodeLocation::caller())
    }

    #[track_caller]
    pub fn then_combine(&self, other: &FlowFuture, closure: Closure) -> impl Future<Output = Result<FlowFuture>> + Send {
        self.chain(Combinator::ThenCombine, Some(other), closure, CodeLocation::caller())
    }

    /// Waits for the stage and returns its raw value datum.
    pub async fn get_datum(&self) -> Result<Datum> {
        self.flow.client.await_completion(&self.flow.id, &self.id, None).await
    }

    /// Waits for the stage and decodes its value.
    pub async fn get<T: DeserializeOwned>(&self) -> Result<T> {
        let datum = self.get_datum().await?;
        Ok(decode_value(&datum)?)
    }

    /// Like `get`, but fails with `FlowError::Timeout` once `timeout` elapses.
    pub async fn get_timeout<T: DeserializeOwned>(&self, timeout: Duration) -> Result<T> {
        let datum = self.flow.client.await_completion(&self.flow.id, &self.id, Some(timeout)).await?;
        Ok(decode_value(&datum)?)
    }

    /// The value if the stage completes within `GET_NOW_TIMEOUT`, else `default`.
    pub async fn get_now<T: DeserializeOwned>(&self, default: T) -> Result<T> {
        match self.get_timeout(GET_NOW_TIMEOUT).await {
            Err(FlowError::Timeout) => Ok(default),
            other => other,
        }
    }
}
