//! # Completer Client
//!
//! The RPC surface a function uses to build and observe flows. Implemented by
//! the in-memory engine directly and by `RemoteCompleterClient` over a
//! transport; both must be indistinguishable to callers.
//!
//! ## Invariants
//!
//! - Every stage-adding operation returns the id of a stage that already
//!   exists in the graph when the call returns.
//! - `await_result` never fails because the stage failed. A failed stage is a
//!   failed `FlowResult`; `await_completion` is where it becomes an error.

use std::time::Duration;

use flowpack::CompletionId;
use flowpack::Datum;
use flowpack::FlowId;
use flowpack::FlowResult;
use flowpack::Headers;
use flowpack::HttpMethod;
use flowrpc::ContinuationKind;

use crate::error::FlowError;
use crate::error::Result;
use crate::location::CodeLocation;

/// Stage-adding operations that carry a closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Combinator {
    Supply,
    ThenApply,
    ThenAccept,
    ThenRun,
    ThenCompose,
    Handle,
    WhenComplete,
    Exceptionally,
    ExceptionallyCompose,
    AcceptEither,
    ApplyToEither,
    ThenAcceptBoth,
    ThenCombine,
}

impl Combinator {
    pub const ALL: [Combinator; 13] = [
        Self::Supply,
        Self::ThenApply,
        Self::ThenAccept,
        Self::ThenRun,
        Self::ThenCompose,
        Self::Handle,
        Self::WhenComplete,
        Self::Exceptionally,
        Self::ExceptionallyCompose,
        Self::AcceptEither,
        Self::ApplyToEither,
        Self::ThenAcceptBoth,
        Self::ThenCombine,
    ];

    /// Name used in completer routes.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Supply => "supply",
            Self::ThenApply => "thenApply",
            Self::ThenAccept => "thenAccept",
            Self::ThenRun => "thenRun",
            Self::ThenCompose => "thenCompose",
            Self::Handle => "handle",
            Self::WhenComplete => "whenComplete",
            Self::Exceptionally => "exceptionally",
            Self::ExceptionallyCompose => "exceptionallyCompose",
            Self::AcceptEither => "acceptEither",
            Self::ApplyToEither => "applyToEither",
            Self::ThenAcceptBoth => "thenAcceptBoth",
            Self::ThenCombine => "thenCombine",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.wire_name() == name)
    }

    /// Number of stages this combinator depends on.
    pub fn dependencies(self) -> usize {
        match self {
            Self::Supply => 0,
            Self::AcceptEither | Self::ApplyToEither | Self::ThenAcceptBoth | Self::ThenCombine => 2,
            _ => 1,
        }
    }

    /// Whether a closure of `kind` can be attached with this combinator.
    pub fn accepts(self, kind: ContinuationKind) -> bool {
        use ContinuationKind as K;
        match self {
            Self::Supply => matches!(kind, K::Supplier | K::Runnable),
            Self::ThenApply | Self::ThenCompose | Self::Exceptionally | Self::ExceptionallyCompose => kind == K::Function,
            Self::ApplyToEither => kind == K::Function,
            Self::ThenAccept | Self::AcceptEither => kind == K::Consumer,
            Self::ThenRun => kind == K::Runnable,
            Self::Handle | Self::ThenCombine => kind == K::BiFunction,
            Self::WhenComplete | Self::ThenAcceptBoth => kind == K::BiConsumer,
        }
    }
}

/// A stage to add: the combinator, the stages it depends on, and its closure blob.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSpec {
    pub combinator: Combinator,
    pub dependencies: Vec<CompletionId>,
    pub closure: Datum,
    pub location: CodeLocation,
}

impl StageSpec {
    pub fn new(combinator: Combinator, dependencies: Vec<CompletionId>, closure: Datum, location: CodeLocation) -> Self {
        Self { combinator, dependencies, closure, location }
    }

    pub fn validate(&self) -> Result<()> {
        let expected = self.combinator.dependencies();
        if self.dependencies.len() != expected {
            return Err(FlowError::Rejected(format!(
                "{} depends on {} stages, {} given",
                self.combinator.wire_name(),
                expected,
                self.dependencies.len()
            )));
        }
        if !matches!(self.closure, Datum::Blob { .. }) {
            return Err(FlowError::Rejected(format!("{} closure must be a blob", self.combinator.wire_name())));
        }
        Ok(())
    }
}

/// A stage completed from outside the flow, through its URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCompletion {
    pub completion_id: CompletionId,
    pub complete_url: String,
    pub fail_url: String,
}

impl ExternalCompletion {
    pub fn new(base_url: &str, flow: &FlowId, completion_id: CompletionId) -> Self {
        let stage = format!("{}/graph/{}/stage/{}", base_url, flow, completion_id);
        Self { complete_url: format!("{}/complete", stage), fail_url: format!("{}/fail", stage), completion_id }
    }
}

/// Operations on flows, addressed by id.
#[async_trait::async_trait]
pub trait CompleterClient: Send + Sync + 'static {
    async fn create_flow(&self, function_id: &str) -> Result<FlowId>;

    /// Adds a closure-carrying stage.
    async fn add_stage(&self, flow: &FlowId, spec: StageSpec) -> Result<CompletionId>;

    /// Adds a stage that is already resolved with `result`.
    async fn completed_value(&self, flow: &FlowId, result: FlowResult, location: CodeLocation) -> Result<CompletionId>;

    async fn delay(&self, flow: &FlowId, delay: Duration, location: CodeLocation) -> Result<CompletionId>;

    async fn external_completion(&self, flow: &FlowId, location: CodeLocation) -> Result<ExternalCompletion>;

    async fn invoke_function(
        &self,
        flow: &FlowId,
        function_id: &str,
        method: HttpMethod,
        headers: Headers,
        body: Vec<u8>,
        location: CodeLocation,
    ) -> Result<CompletionId>;

    async fn all_of(&self, flow: &FlowId, stages: &[CompletionId], location: CodeLocation) -> Result<CompletionId>;

    async fn any_of(&self, flow: &FlowId, stages: &[CompletionId], location: CodeLocation) -> Result<CompletionId>;

    /// Marks the flow as no longer kept alive by its creator. Only the first call has effect.
    async fn commit(&self, flow: &FlowId) -> Result<()>;

    async fn add_termination_hook(&self, flow: &FlowId, closure: Datum, location: CodeLocation) -> Result<()>;

    /// Waits for the stage's outcome. `None` or a zero timeout waits indefinitely.
    async fn await_result(&self, flow: &FlowId, stage: &CompletionId, timeout: Option<Duration>) -> Result<FlowResult>;

    /// Waits for the stage and yields its value, or the failure as `FlowError::Completion`.
    async fn await_completion(&self, flow: &FlowId, stage: &CompletionId, timeout: Option<Duration>) -> Result<Datum> {
        let result = self.await_result(flow, stage, timeout).await?;
        if result.is_success() {
            Ok(result.into_datum())
        } else {
            Err(FlowError::from_failure(result.datum()))
        }
    }

    async fn supply(&self, flow: &FlowId, closure: Datum, location: CodeLocation) -> Result<CompletionId> {
        self.add_stage(flow, StageSpec::new(Combinator::Supply, vec![], closure, location)).await
    }

    async fn then_apply(&self, flow: &FlowId, stage: &CompletionId, closure: Datum, location: CodeLocation) -> Result<CompletionId> {
        self.chain(flow, Combinator::ThenApply, stage, None, closure, location).await
    }

    async fn then_accept(&self, flow: &FlowId, stage: &CompletionId, closure: Datum, location: CodeLocation) -> Result<CompletionId> {
        self.chain(flow, Combinator::ThenAccept, stage, None, closure, location).await
    }

    async fn then_run(&self, flow: &FlowId, stage: &CompletionId, closure: Datum, location: CodeLocation) -> Result<CompletionId> {
        self.chain(flow, Combinator::ThenRun, stage, None, closure, location).await
    }

    async fn then_compose(&self, flow: &FlowId, stage: &CompletionId, closure: Datum, location: CodeLocation) -> Result<CompletionId> {
        self.chain(flow, Combinator::ThenCompose, stage, None, closure, location).await
    }

    async fn handle(&self, flow: &FlowId, stage: &CompletionId, closure: Datum, location: CodeLocation) -> Result<CompletionId> {
        self.chain(flow, Combinator::Handle, stage, None, closure, location).await
    }

    async fn when_complete(&self, flow: &FlowId, stage: &CompletionId, closure: Datum, location: CodeLocation) -> Result<CompletionId> {
        self.chain(flow, Combinator::WhenComplete, stage, None, closure, location).await
    }

    async fn exceptionally(&self, flow: &FlowId, stage: &CompletionId, closure: Datum, location: CodeLocation) -> Result<CompletionId> {
        self.chain(flow, Combinator::Exceptionally, stage, None, closure, location).await
    }

    async fn exceptionally_compose(
        &self,
        flow: &FlowId,
        stage: &CompletionId,
        closure: Datum,
        location: CodeLocation,
    ) -> Result<CompletionId> {
        self.chain(flow, Combinator::ExceptionallyCompose, stage, None, closure, location).await
    }

    async fn accept_either(
        &self,
        flow: &FlowId,
        stage: &CompletionId,
        other: &CompletionId,
        closure: Datum,
        location: CodeLocation,
    ) -> Result<CompletionId> {
        self.chain(flow, Combinator::AcceptEither, stage, Some(other), closure, location).await
    }

    async fn apply_to_either(
        &self,
        flow: &FlowId,
        stage: &CompletionId,
        other: &CompletionId,
        closure: Datum,
        location: CodeLocation,
    ) -> Result<CompletionId> {
        self.chain(flow, Combinator::ApplyToEither, stage, Some(other), closure, location).await
    }

    async fn then_accept_both(
        &self,
        flow: &FlowId,
        stage: &CompletionId,
        other: &CompletionId,
        closure: Datum,
        location: CodeLocation,
    ) -> Result<CompletionId> {
        self.chain(flow, Combinator::ThenAcceptBoth, stage, Some(other), closure, location).await
    }

    async fn then_combine(
        &self,
        flow: &FlowId,
        stage: &CompletionId,
        other: &CompletionId,
        closure: Datum,
        location: CodeLocation,
    ) -> Result<CompletionId> {
        self.chain(flow, Combinator::ThenCombine, stage, Some(other), closure, location).await
    }

    #[doc(hidden)]
    async fn chain(
        &self,
        flow: &FlowId,
        combinator: Combinator,
        stage: &CompletionId,
        other: Option<&CompletionId>,
        closure: Datum,
        location: CodeLocation,
    ) -> Result<CompletionId> {
        let mut dependencies = vec![stage.clone()];
        dependencies.extend(other.cloned());
        self.add_stage(flow, StageSpec::new(combinator, dependencies, closure, location)).await
    }
}
