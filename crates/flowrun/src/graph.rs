//! # Stage Graph
//!
//! Per-flow bookkeeping: the stage map, the active-stage counter, lifecycle
//! flags and queued termination hooks. Scheduling lives in `completer`.
//!
//! ## Invariants
//!
//! - A stage's outcome is written at most once. Readers observe either no
//!   outcome or the complete one, never a partial write.
//! - A stage counts as active from creation until its outcome is written.
//! - Once `drained` is set, hooks start to run. Hooks may still add stages;
//!   the graph stops accepting work only once it is complete.

use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::sync::watch;

use flowpack::CompletionId;
use flowpack::Datum;
use flowpack::ErrorKind;
use flowpack::FlowId;
use flowpack::FlowResult;

use crate::client::Combinator;
use crate::error::FlowError;
use crate::error::Result;
use crate::location::CodeLocation;

/// What created a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Closure(Combinator),
    CompletedValue,
    Delay,
    ExternalCompletion,
    InvokeFunction,
    AllOf,
    AnyOf,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closure(c) => f.write_str(c.wire_name()),
            Self::CompletedValue => f.write_str("completedValue"),
            Self::Delay => f.write_str("delay"),
            Self::ExternalCompletion => f.write_str("externalCompletion"),
            Self::InvokeFunction => f.write_str("invokeFunction"),
            Self::AllOf => f.write_str("allOf"),
            Self::AnyOf => f.write_str("anyOf"),
        }
    }
}

pub struct Stage {
    pub id: CompletionId,
    pub kind: StageKind,
    pub dependencies: Vec<CompletionId>,
    pub location: CodeLocation,
    outcome: watch::Sender<Option<FlowResult>>,
}

impl Stage {
    /// Writes the outcome. Returns false if one was already written.
    pub fn resolve(&self, result: FlowResult) -> bool {
        self.outcome.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(result);
            true
        })
    }

    pub fn is_resolved(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// Waits for the outcome without blocking a thread.
    pub async fn outcome(&self) -> FlowResult {
        let mut rx = self.outcome.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone().unwrap_or_else(|| lost(&self.id)),
            Err(_) => lost(&self.id),
        }
    }
}

fn lost(id: &CompletionId) -> FlowResult {
    FlowResult::error(ErrorKind::StageLost, format!("stage {} was dropped before resolving", id))
}

/// A closure queued to run once the graph has drained.
pub struct TerminationHook {
    pub id: CompletionId,
    pub closure: Datum,
    pub location: CodeLocation,
}

pub struct Graph {
    pub function_id: String,
    pub flow_id: FlowId,
    stages: DashMap<CompletionId, Arc<Stage>>,
    stage_counter: AtomicU64,
    active: AtomicUsize,
    idle: Notify,
    committed: AtomicBool,
    drained: AtomicBool,
    hooks: Mutex<Vec<TerminationHook>>,
    complete: watch::Sender<bool>,
}

impl Graph {
    pub fn new(function_id: impl Into<String>, flow_id: FlowId) -> Self {
        Self {
            function_id: function_id.into(),
            flow_id,
            stages: DashMap::new(),
            stage_counter: AtomicU64::new(0),
            active: AtomicUsize::new(0),
            idle: Notify::new(),
            committed: AtomicBool::new(false),
            drained: AtomicBool::new(false),
            hooks: Mutex::new(Vec::new()),
            complete: watch::Sender::new(false),
        }
    }

    fn next_id(&self) -> CompletionId {
        CompletionId::new((self.stage_counter.fetch_add(1, Ordering::SeqCst) + 1).to_string())
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.is_complete() {
            return Err(FlowError::Rejected(format!("graph {} already run", self.flow_id)));
        }
        Ok(())
    }

    pub fn stage(&self, id: &CompletionId) -> Option<Arc<Stage>> {
        self.stages.get(id).map(|s| s.value().clone())
    }

    /// Looks up dependencies, failing on the first unknown id.
    pub fn stages_for(&self, ids: &[CompletionId]) -> Result<Vec<Arc<Stage>>> {
        ids.iter()
            .map(|id| {
                self.stage(id)
                    .ok_or_else(|| FlowError::Rejected(format!("stage {} not found in graph {}", id, self.flow_id)))
            })
            .collect()
    }

    /// Registers a new, unresolved, active stage.
    pub fn add_stage(&self, kind: StageKind, dependencies: Vec<CompletionId>, location: CodeLocation) -> Result<Arc<Stage>> {
        self.ensure_accepting()?;
        self.active.fetch_add(1, Ordering::SeqCst);
        let stage = Arc::new(Stage {
            id: self.next_id(),
            kind,
            dependencies,
            location,
            outcome: watch::Sender::new(None),
        });
        self.stages.insert(stage.id.clone(), stage.clone());
        tracing::debug!(flow = %self.flow_id, stage = %stage.id, %kind, location = %stage.location, "stage added");
        Ok(stage)
    }

    /// Resolves a stage and retires it from the active count.
    ///
    /// Returns true if the graph became ready to run its termination hooks.
    pub fn finish_stage(&self, stage: &Stage, result: FlowResult) -> bool {
        let success = result.is_success();
        if !stage.resolve(result) {
            return false;
        }
        tracing::debug!(flow = %self.flow_id, stage = %stage.id, kind = %stage.kind, success, "stage resolved");
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
        self.try_drain()
    }

    /// Returns true on the first call only.
    pub fn commit(&self) -> bool {
        self.committed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_committed(&self) -> bool {
        self.committed.load(Ordering::SeqCst)
    }

    /// Flips to drained once committed with no active stages. True only for the caller that flips it.
    pub fn try_drain(&self) -> bool {
        if !self.committed.load(Ordering::SeqCst) || self.active.load(Ordering::SeqCst) != 0 {
            return false;
        }
        !self.drained.swap(true, Ordering::SeqCst)
    }

    pub fn active_stages(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Waits until no stage is active.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.active_stages() == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Queues a hook ahead of those already queued.
    pub fn add_hook(&self, closure: Datum, location: CodeLocation) -> Result<CompletionId> {
        self.ensure_accepting()?;
        let id = self.next_id();
        let hook = TerminationHook { id: id.clone(), closure, location };
        self.hooks.lock().map_err(|_| poisoned())?.insert(0, hook);
        Ok(id)
    }

    pub fn pop_hook(&self) -> Option<TerminationHook> {
        let mut hooks = self.hooks.lock().ok()?;
        if hooks.is_empty() { None } else { Some(hooks.remove(0)) }
    }

    pub fn mark_complete(&self) {
        self.complete.send_replace(true);
        tracing::info!(flow = %self.flow_id, stages = self.stage_count(), "flow complete");
    }

    pub fn is_complete(&self) -> bool {
        *self.complete.borrow()
    }

    pub async fn wait_complete(&self) {
        let mut rx = self.complete.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }
}

fn poisoned() -> FlowError {
    FlowError::Rejected("termination hook queue poisoned".into())
}
