//! # Flow Context
//!
//! The per-invocation pointer to the current flow. Each invocation owns its
//! context; there is no process-wide current flow.
//!
//! ## Invariants
//!
//! - An ordinary invocation creates at most one flow, on first use, and
//!   commits it when the invocation ends, successful or not.
//! - A continuation invocation is attached to the flow that called it and
//!   never commits.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::OnceCell;

use flowpack::CompletionId;
use flowpack::FlowId;
use flowpack::Headers;
use flowpack::names;

use crate::client::CompleterClient;
use crate::config::FlowConfig;
use crate::error::FlowError;
use crate::error::Result;
use crate::flow::Flow;

enum Scope {
    Ordinary { function_id: String, flow: OnceCell<Flow> },
    Attached(Flow),
}

struct Inner {
    client: Arc<dyn CompleterClient>,
    scope: Scope,
}

/// Cloning shares the same scope.
#[derive(Clone)]
pub struct FlowContext {
    inner: Arc<Inner>,
}

impl FlowContext {
    /// Context of an ordinary invocation of `function_id`.
    pub fn ordinary(client: Arc<dyn CompleterClient>, function_id: impl Into<String>) -> Self {
        let scope = Scope::Ordinary { function_id: function_id.into(), flow: OnceCell::new() };
        Self { inner: Arc::new(Inner { client, scope }) }
    }

    /// Context of an ordinary invocation, identified by the configured function id.
    pub fn from_config(client: Arc<dyn CompleterClient>, config: &FlowConfig) -> Result<Self> {
        match &config.function_id {
            Some(function_id) => Ok(Self::ordinary(client, function_id.clone())),
            None => Err(FlowError::Rejected("function id is not configured (FN_APP_NAME, FN_PATH)".into())),
        }
    }

    /// Context of a continuation invocation running `stage` of `flow_id`.
    pub fn attached(client: Arc<dyn CompleterClient>, flow_id: FlowId, stage: Option<CompletionId>) -> Self {
        let flow = Flow::attached(client.clone(), flow_id, stage);
        Self { inner: Arc::new(Inner { client, scope: Scope::Attached(flow) }) }
    }

    /// Attached if the inbound headers name a flow, ordinary otherwise.
    pub fn for_request(client: Arc<dyn CompleterClient>, function_id: impl Into<String>, headers: &Headers) -> Self {
        match headers.get(names::FLOW_ID) {
            Some(flow) => {
                let stage = headers.get(names::STAGE_ID).map(CompletionId::from);
                Self::attached(client, FlowId::from(flow), stage)
            }
            None => Self::ordinary(client, function_id),
        }
    }

    pub fn is_attached(&self) -> bool {
        matches!(self.inner.scope, Scope::Attached(_))
    }

    /// The flow, if one exists yet. Never creates one.
    pub fn current(&self) -> Option<&Flow> {
        match &self.inner.scope {
            Scope::Ordinary { flow, .. } => flow.get(),
            Scope::Attached(flow) => Some(flow),
        }
    }

    /// The current flow, creating it on first use in an ordinary invocation.
    pub async fn flow(&self) -> Result<Flow> {
        match &self.inner.scope {
            Scope::Attached(flow) => Ok(flow.clone()),
            Scope::Ordinary { function_id, flow } => {
                let flow = flow
                    .get_or_try_init(|| async {
                        let id = self.inner.client.create_flow(function_id).await?;
                        tracing::debug!(flow = %id, %function_id, "flow started by invocation");
                        Ok::<_, FlowError>(Flow::new(self.inner.client.clone(), id))
                    })
                    .await?;
                Ok(flow.clone())
            }
        }
    }

    /// Ends the invocation: commits the flow it created, if any.
    pub async fn finish(&self) -> Result<()> {
        let Scope::Ordinary { flow, .. } = &self.inner.scope else {
            return Ok(());
        };
        match flow.get() {
            Some(flow) => self.inner.client.commit(flow.id()).await,
            None => Ok(()),
        }
    }

    /// Runs `body` and then finishes the context, whatever `body` returned.
    ///
    /// A failed commit is logged; the body's result is returned either way.
    pub async fn invoke<T, E, F, Fut>(&self, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce(FlowContext) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        let outcome = body(self.clone()).await;
        if let Err(e) = self.finish().await {
            tracing::warn!(error = %e, "failed to commit flow at end of invocation");
        }
        outcome
    }
}
