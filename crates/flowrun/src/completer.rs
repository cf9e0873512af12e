//! # In-Memory Completer
//!
//! The reference stage graph engine. Every stage is a task that waits on the
//! outcome slots of its dependencies, decides whether its closure runs, and
//! writes its own slot exactly once.
//!
//! ## Philosophy
//!
//! - **Waiting is registration**: A stage blocked on a dependency holds a watch
//!   subscription, not a thread.
//! - **Failures are values**: Nothing a closure does can fail the engine. Each
//!   problem while evaluating a stage becomes that stage's failed result.
//! - **Races are not cancelled**: The losing side of `either`/`any_of` runs to
//!   completion and its outcome is simply never read.

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use dashmap::DashMap;
use futures::future;
use futures::future::Either;

use flowpack::CompletionId;
use flowpack::Datum;
use flowpack::ErrorKind;
use flowpack::FlowId;
use flowpack::FlowResult;
use flowpack::FlowState;
use flowpack::Headers;
use flowpack::HttpMethod;

use crate::client::Combinator;
use crate::client::CompleterClient;
use crate::client::ExternalCompletion;
use crate::client::StageSpec;
use crate::error::FlowError;
use crate::error::Result;
use crate::graph::Graph;
use crate::graph::Stage;
use crate::graph::StageKind;
use crate::invoker::FunctionInvoker;
use crate::invoker::NoFunctions;
use crate::invoker::StageInvoker;
use crate::location::CodeLocation;

/// Base URL used for external completion URLs when none is configured.
pub const DEFAULT_EXTERNAL_BASE_URL: &str = "http://localhost:8081";

/// What a spawned stage task does once scheduled.
enum Plan {
    Invoke { combinator: Combinator, deps: Vec<Arc<Stage>>, closure: Datum },
    Delay(Duration),
    InvokeFunction { function_id: String, method: HttpMethod, headers: Headers, body: Vec<u8> },
    AllOf(Vec<Arc<Stage>>),
    AnyOf(Vec<Arc<Stage>>),
}

struct Inner {
    graphs: DashMap<FlowId, Arc<Graph>>,
    stage_invoker: OnceLock<Arc<dyn StageInvoker>>,
    function_invoker: Arc<dyn FunctionInvoker>,
    external_base_url: String,
}

/// The in-process completer. Cloning shares the same graphs.
#[derive(Clone)]
pub struct InMemCompleter {
    inner: Arc<Inner>,
}

impl Default for InMemCompleter {
    fn default() -> Self {
        Self::new(DEFAULT_EXTERNAL_BASE_URL, Arc::new(NoFunctions))
    }
}

impl InMemCompleter {
    pub fn new(external_base_url: impl Into<String>, function_invoker: Arc<dyn FunctionInvoker>) -> Self {
        let inner = Inner {
            graphs: DashMap::new(),
            stage_invoker: OnceLock::new(),
            function_invoker,
            external_base_url: external_base_url.into().trim_end_matches('/').to_string(),
        };
        Self { inner: Arc::new(inner) }
    }

    /// Installs the port used to run closures. Only the first call has effect.
    pub fn set_stage_invoker(&self, invoker: Arc<dyn StageInvoker>) -> bool {
        self.inner.stage_invoker.set(invoker).is_ok()
    }

    pub fn external_base_url(&self) -> &str {
        &self.inner.external_base_url
    }

    fn graph(&self, flow: &FlowId) -> Result<Arc<Graph>> {
        self.inner
            .graphs
            .get(flow)
            .map(|g| g.value().clone())
            .ok_or_else(|| FlowError::Rejected(format!("unknown graph {}", flow)))
    }

    fn stage(&self, flow: &FlowId, id: &CompletionId) -> Result<Arc<Stage>> {
        self.graph(flow)?
            .stage(id)
            .ok_or_else(|| FlowError::Rejected(format!("stage {} not found in graph {}", id, flow)))
    }

    pub fn contains_flow(&self, flow: &FlowId) -> bool {
        self.inner.graphs.contains_key(flow)
    }

    pub fn contains_stage(&self, flow: &FlowId, id: &CompletionId) -> bool {
        self.graph(flow).is_ok_and(|g| g.stage(id).is_some())
    }

    /// Whether the flow has drained and run all its termination hooks.
    pub fn is_complete(&self, flow: &FlowId) -> Result<bool> {
        Ok(self.graph(flow)?.is_complete())
    }

    /// Waits until the flow is complete.
    pub async fn await_flow(&self, flow: &FlowId) -> Result<()> {
        self.graph(flow)?.wait_complete().await;
        Ok(())
    }

    /// Waits until every committed flow known to this completer is complete.
    pub async fn await_termination(&self) {
        let graphs: Vec<Arc<Graph>> = self
            .inner
            .graphs
            .iter()
            .filter(|g| g.is_committed())
            .map(|g| g.value().clone())
            .collect();
        for graph in graphs {
            graph.wait_complete().await;
        }
    }

    /// Resolves an external completion stage from an inbound request.
    pub fn complete_external(&self, flow: &FlowId, id: &CompletionId, success: bool, request: Datum) -> Result<()> {
        let graph = self.graph(flow)?;
        let stage = self.stage(flow, id)?;
        if stage.kind != StageKind::ExternalCompletion {
            return Err(FlowError::Rejected(format!("stage {} is not externally completable", id)));
        }
        let result = if success { FlowResult::success(request) } else { FlowResult::failure(request)? };
        if stage.is_resolved() {
            return Err(FlowError::Rejected(format!("stage {} already completed", id)));
        }
        self.finish(&graph, &stage, result);
        Ok(())
    }

    // ========================================================================
    //  SCHEDULING
    // ========================================================================

    /// Resolves a stage and, if that drained the graph, starts its hooks.
    fn finish(&self, graph: &Arc<Graph>, stage: &Stage, result: FlowResult) {
        if graph.finish_stage(stage, result) {
            self.run_hooks(graph.clone());
        }
    }

    fn run_hooks(&self, graph: Arc<Graph>) {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                graph.wait_idle().await;
                let Some(hook) = graph.pop_hook() else { break };
                let args = vec![FlowResult::success(Datum::State(FlowState::Succeeded))];
                let result = this.invoke(&graph, &hook.id, &hook.closure, args).await;
                if !result.is_success() {
                    tracing::warn!(flow = %graph.flow_id, hook = %hook.id, location = %hook.location, "termination hook failed");
                }
            }
            graph.mark_complete();
        });
    }

    /// Runs the plan on its own task so that a panic still resolves the stage.
    fn spawn(&self, graph: Arc<Graph>, stage: Arc<Stage>, plan: Plan) {
        let this = self.clone();
        tokio::spawn(async move {
            let work = {
                let (this, graph, stage) = (this.clone(), graph.clone(), stage.clone());
                tokio::spawn(async move { this.drive(&graph, &stage, plan).await })
            };
            let result = match work.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(flow = %graph.flow_id, stage = %stage.id, error = %e, "stage task aborted");
                    FlowResult::error(ErrorKind::StageInvokeFailed, format!("stage task aborted: {}", e))
                }
            };
            this.finish(&graph, &stage, result);
        });
    }

    async fn invoke(&self, graph: &Graph, stage: &CompletionId, closure: &Datum, args: Vec<FlowResult>) -> FlowResult {
        let Some(invoker) = self.inner.stage_invoker.get() else {
            return FlowResult::error(ErrorKind::StageInvokeFailed, "no stage invoker configured");
        };
        match invoker.invoke_stage(&graph.function_id, &graph.flow_id, stage, closure, args).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(flow = %graph.flow_id, %stage, error = %e, "stage invocation failed");
                FlowResult::error(ErrorKind::StageInvokeFailed, e.to_string())
            }
        }
    }

    async fn drive(&self, graph: &Graph, stage: &Stage, plan: Plan) -> FlowResult {
        match plan {
            Plan::Invoke { combinator, deps, closure } => self.drive_closure(graph, stage, combinator, &deps, &closure).await,
            Plan::Delay(delay) => {
                tokio::time::sleep(delay).await;
                FlowResult::empty()
            }
            Plan::InvokeFunction { function_id, method, headers, body } => {
                match self.inner.function_invoker.invoke_function(&function_id, method, headers, body).await {
                    Ok(response) => response.into_result(),
                    Err(e) => FlowResult::error(ErrorKind::FunctionInvokeFailed, e.to_string()),
                }
            }
            Plan::AllOf(deps) => {
                let waits = deps.iter().map(|d| async move {
                    let r = d.outcome().await;
                    if r.is_success() { Ok(()) } else { Err(r) }
                });
                match future::try_join_all(waits).await {
                    Ok(_) => FlowResult::empty(),
                    Err(failed) => failed,
                }
            }
            Plan::AnyOf(deps) => {
                let waits = deps.iter().map(|d| Box::pin(d.outcome()));
                let (winner, _, _) = future::select_all(waits).await;
                winner
            }
        }
    }

    async fn drive_closure(
        &self,
        graph: &Graph,
        stage: &Stage,
        combinator: Combinator,
        deps: &[Arc<Stage>],
        closure: &Datum,
    ) -> FlowResult {
        use Combinator as C;

        if combinator == C::Supply {
            return self.invoke(graph, &stage.id, closure, vec![]).await;
        }
        let [first, rest @ ..] = deps else {
            return FlowResult::error(ErrorKind::InvalidStageResponse, "stage has no dependency");
        };

        match combinator {
            C::Supply => FlowResult::error(ErrorKind::InvalidStageResponse, "supply stage cannot have dependencies"),
            C::ThenApply | C::ThenAccept => {
                let parent = first.outcome().await;
                if !parent.is_success() {
                    return parent;
                }
                self.invoke(graph, &stage.id, closure, vec![parent]).await
            }
            C::ThenRun => {
                let parent = first.outcome().await;
                if !parent.is_success() {
                    return parent;
                }
                self.invoke(graph, &stage.id, closure, vec![]).await
            }
            C::ThenCompose => {
                let parent = first.outcome().await;
                if !parent.is_success() {
                    return parent;
                }
                let returned = self.invoke(graph, &stage.id, closure, vec![parent]).await;
                self.compose(graph, returned).await
            }
            C::Handle => {
                let parent = first.outcome().await;
                self.invoke(graph, &stage.id, closure, value_and_error(parent)).await
            }
            C::WhenComplete => {
                let parent = first.outcome().await;
                let _ = self.invoke(graph, &stage.id, closure, value_and_error(parent.clone())).await;
                parent
            }
            C::Exceptionally => {
                let parent = first.outcome().await;
                if parent.is_success() {
                    return parent;
                }
                let recovered = self.invoke(graph, &stage.id, closure, vec![parent.clone()]).await;
                if recovered.is_success() { recovered } else { parent }
            }
            C::ExceptionallyCompose => {
                let parent = first.outcome().await;
                if parent.is_success() {
                    return parent;
                }
                let returned = self.invoke(graph, &stage.id, closure, vec![parent]).await;
                self.compose(graph, returned).await
            }
            C::AcceptEither | C::ApplyToEither => {
                let Some(second) = rest.first() else {
                    return FlowResult::error(ErrorKind::InvalidStageResponse, "either stage needs two dependencies");
                };
                let winner = match future::select(Box::pin(first.outcome()), Box::pin(second.outcome())).await {
                    Either::Left((r, _)) | Either::Right((r, _)) => r,
                };
                if !winner.is_success() {
                    return winner;
                }
                let result = self.invoke(graph, &stage.id, closure, vec![winner]).await;
                if combinator == C::AcceptEither { result.to_empty() } else { result }
            }
            C::ThenAcceptBoth | C::ThenCombine => {
                let Some(second) = rest.first() else {
                    return FlowResult::error(ErrorKind::InvalidStageResponse, "join stage needs two dependencies");
                };
                let (a, b) = future::join(first.outcome(), second.outcome()).await;
                if !a.is_success() {
                    return a;
                }
                if !b.is_success() {
                    return b;
                }
                let result = self.invoke(graph, &stage.id, closure, vec![a, b]).await;
                if combinator == C::ThenAcceptBoth { result.to_empty() } else { result }
            }
        }
    }

    /// Flattens a compose result: a stage reference becomes that stage's outcome.
    async fn compose(&self, graph: &Graph, returned: FlowResult) -> FlowResult {
        if !returned.is_success() {
            return returned;
        }
        let Datum::StageRef(id) = returned.datum() else {
            return FlowResult::error(ErrorKind::InvalidStageResponse, "result was not a stageref datum");
        };
        match graph.stage(id) {
            Some(target) => target.outcome().await,
            None => FlowResult::error(ErrorKind::InvalidStageResponse, "returned stage not found"),
        }
    }
}

/// Arguments for `handle`/`when_complete`: `(value, empty)` or `(empty, error)`.
fn value_and_error(parent: FlowResult) -> Vec<FlowResult> {
    if parent.is_success() { vec![parent, FlowResult::empty()] } else { vec![FlowResult::empty(), parent] }
}

#[async_trait::async_trait]
impl CompleterClient for InMemCompleter {
    async fn create_flow(&self, function_id: &str) -> Result<FlowId> {
        let flow = FlowId::new(uuid::Uuid::new_v4().to_string());
        let graph = Arc::new(Graph::new(function_id, flow.clone()));
        self.inner.graphs.insert(flow.clone(), graph);
        tracing::info!(%flow, function_id, "flow created");
        Ok(flow)
    }

    async fn add_stage(&self, flow: &FlowId, spec: StageSpec) -> Result<CompletionId> {
        spec.validate()?;
        let graph = self.graph(flow)?;
        let deps = graph.stages_for(&spec.dependencies)?;
        let stage = graph.add_stage(StageKind::Closure(spec.combinator), spec.dependencies, spec.location)?;
        let id = stage.id.clone();
        let plan = Plan::Invoke { combinator: spec.combinator, deps, closure: spec.closure };
        self.spawn(graph, stage, plan);
        Ok(id)
    }

    async fn completed_value(&self, flow: &FlowId, result: FlowResult, location: CodeLocation) -> Result<CompletionId> {
        let graph = self.graph(flow)?;
        let stage = graph.add_stage(StageKind::CompletedValue, vec![], location)?;
        let id = stage.id.clone();
        self.finish(&graph, &stage, result);
        Ok(id)
    }

    async fn delay(&self, flow: &FlowId, delay: Duration, location: CodeLocation) -> Result<CompletionId> {
        let graph = self.graph(flow)?;
        let stage = graph.add_stage(StageKind::Delay, vec![], location)?;
        let id = stage.id.clone();
        self.spawn(graph, stage, Plan::Delay(delay));
        Ok(id)
    }

    async fn external_completion(&self, flow: &FlowId, location: CodeLocation) -> Result<ExternalCompletion> {
        let graph = self.graph(flow)?;
        let stage = graph.add_stage(StageKind::ExternalCompletion, vec![], location)?;
        Ok(ExternalCompletion::new(&self.inner.external_base_url, flow, stage.id.clone()))
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
        let graph = self.graph(flow)?;
        let stage = graph.add_stage(StageKind::InvokeFunction, vec![], location)?;
        let id = stage.id.clone();
        let plan = Plan::InvokeFunction { function_id: function_id.to_string(), method, headers, body };
        self.spawn(graph, stage, plan);
        Ok(id)
    }

    async fn all_of(&self, flow: &FlowId, stages: &[CompletionId], location: CodeLocation) -> Result<CompletionId> {
        let graph = self.graph(flow)?;
        let deps = graph.stages_for(stages)?;
        let stage = graph.add_stage(StageKind::AllOf, stages.to_vec(), location)?;
        let id = stage.id.clone();
        self.spawn(graph, stage, Plan::AllOf(deps));
        Ok(id)
    }

    async fn any_of(&self, flow: &FlowId, stages: &[CompletionId], location: CodeLocation) -> Result<CompletionId> {
        if stages.is_empty() {
            return Err(FlowError::Rejected("any_of needs at least one stage".into()));
        }
        let graph = self.graph(flow)?;
        let deps = graph.stages_for(stages)?;
        let stage = graph.add_stage(StageKind::AnyOf, stages.to_vec(), location)?;
        let id = stage.id.clone();
        self.spawn(graph, stage, Plan::AnyOf(deps));
        Ok(id)
    }

    async fn commit(&self, flow: &FlowId) -> Result<()> {
        let graph = self.graph(flow)?;
        if graph.commit() {
            tracing::debug!(%flow, active = graph.active_stages(), "flow committed");
            if graph.try_drain() {
                self.run_hooks(graph);
            }
        }
        Ok(())
    }

    async fn add_termination_hook(&self, flow: &FlowId, closure: Datum, location: CodeLocation) -> Result<()> {
        let graph = self.graph(flow)?;
        let id = graph.add_hook(closure, location)?;
        tracing::debug!(%flow, hook = %id, "termination hook added");
        Ok(())
    }

    async fn await_result(&self, flow: &FlowId, stage: &CompletionId, timeout: Option<Duration>) -> Result<FlowResult> {
        let stage = self.stage(flow, stage)?;
        match timeout.filter(|t| !t.is_zero()) {
            Some(limit) => tokio::time::timeout(limit, stage.outcome()).await.map_err(|_| FlowError::Timeout),
            None => Ok(stage.outcome().await),
        }
    }
}
