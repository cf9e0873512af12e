//! # Dispatch
//!
//! Maps closure codes to async handlers and runs them against a decoded
//! request. The context type `C` is whatever the host wants each handler to
//! see, typically a handle on the flow the closure belongs to.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures::FutureExt;

use serde::Serialize;
use serde::de::DeserializeOwned;

use flowpack::CompletionId;
use flowpack::Datum;
use flowpack::ErrorKind;
use flowpack::FlowResult;

use crate::Closure;
use crate::ContinuationKind;
use crate::Error;
use crate::Result;
use crate::StageError;
use crate::UserError;
use crate::decode_value;
use crate::encode_value;

/// What a continuation hands back when it does not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum Returned {
    Empty,
    /// A serialized flow object.
    Value(Datum),
    /// A reference to another stage, flattened by compose combinators.
    Stage(CompletionId),
    /// A value that could not be serialized.
    Unserializable(String),
}

impl Returned {
    pub fn value<T: Serialize + ?Sized>(value: &T) -> Self {
        match encode_value(value) {
            Ok(datum) => Self::Value(datum),
            Err(e) => Self::Unserializable(e.to_string()),
        }
    }

    fn into_result(self, kind: ContinuationKind) -> FlowResult {
        if !kind.produces_value() {
            return FlowResult::empty();
        }
        match self {
            Self::Empty => FlowResult::empty(),
            Self::Value(datum) => FlowResult::success(datum),
            Self::Stage(id) => FlowResult::success(Datum::StageRef(id)),
            Self::Unserializable(message) => {
                FlowResult::error(ErrorKind::InvalidStageResponse, format!("result not serializable: {}", message))
            }
        }
    }
}

pub type Outcome = std::result::Result<Returned, UserError>;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Outcome> + Send>>;

type Handler<C> = Arc<dyn Fn(C, Call) -> HandlerFuture + Send + Sync>;

/// The decoded arguments of one invocation.
#[derive(Debug, Clone)]
pub struct Call {
    closure: Closure,
    args: Vec<FlowResult>,
}

impl Call {
    pub fn kind(&self) -> ContinuationKind {
        self.closure.kind
    }

    pub fn code(&self) -> &str {
        &self.closure.code
    }

    /// The state captured when the closure was created.
    pub fn state<S: DeserializeOwned>(&self) -> Result<S> {
        self.closure.state()
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn result(&self, i: usize) -> Result<&FlowResult> {
        self.args.get(i).ok_or_else(|| Error::Input(format!("no argument at position {}", i)))
    }

    pub fn datum(&self, i: usize) -> Result<&Datum> {
        Ok(self.result(i)?.datum())
    }

    /// Decodes a successful argument. Fails if the argument is a failure.
    pub fn arg<T: DeserializeOwned>(&self, i: usize) -> Result<T> {
        let result = self.result(i)?;
        if !result.is_success() {
            return Err(Error::Input(format!("argument {} is a failure", i)));
        }
        decode_value(result.datum())
    }

    /// The error carried by argument `i`, if it is a failure.
    pub fn error(&self, i: usize) -> Option<StageError> {
        let result = self.args.get(i)?;
        if result.is_success() {
            return None;
        }
        Some(StageError::from_failure(result.datum()).unwrap_or_else(|e| StageError::Platform {
            kind: ErrorKind::Unknown,
            message: e.to_string(),
        }))
    }
}

/// Registered continuations, keyed by code.
pub struct Registry<C> {
    handlers: HashMap<String, (ContinuationKind, Handler<C>)>,
}

impl<C> Default for Registry<C> {
    fn default() -> Self {
        Self { handlers: HashMap::new() }
    }
}

impl<C: Send + 'static> Registry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `code`. A later registration replaces an earlier one.
    pub fn register<F, Fut>(&mut self, code: impl Into<String>, kind: ContinuationKind, handler: F) -> &mut Self
    where
        F: Fn(C, Call) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        let handler: Handler<C> = Arc::new(move |ctx: C, call: Call| -> HandlerFuture { Box::pin(handler(ctx, call)) });
        self.handlers.insert(code.into(), (kind, handler));
        self
    }

    pub fn contains(&self, code: &str) -> bool {
        self.handlers.contains_key(code)
    }

    /// Resolves the handler for a closure and checks the argument count.
    fn prepare(&self, closure: &Closure, args: usize) -> Result<Handler<C>> {
        let Some((registered, handler)) = self.handlers.get(&closure.code) else {
            return Err(Error::UnknownContinuation(closure.code.clone()));
        };
        if *registered != closure.kind {
            return Err(Error::KindMismatch {
                code: closure.code.clone(),
                registered: *registered,
                declared: closure.kind,
            });
        }
        let expected = closure.kind.arity();
        if args != expected {
            return Err(Error::ArgumentCount { kind: closure.kind, expected, found: args });
        }
        Ok(handler.clone())
    }

    /// Runs the closure against `args` and encodes its outcome.
    ///
    /// Returns `Err` only when the request cannot be dispatched; a closure
    /// that fails yields `Ok` with a failed result.
    pub async fn dispatch(&self, ctx: C, closure: &Datum, args: Vec<FlowResult>) -> Result<FlowResult> {
        let closure = Closure::from_datum(closure)?;
        let handler = self.prepare(&closure, args.len())?;
        let kind = closure.kind;
        tracing::debug!(code = %closure.code, ?kind, "dispatching continuation");

        let code = closure.code.clone();
        let call = Call { closure, args };
        let outcome = match AssertUnwindSafe(async move { handler(ctx, call).await }).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::warn!(%code, %message, "continuation panicked");
                Err(UserError::with_kind(PANIC_KIND, message))
            }
        };

        match outcome {
            Ok(returned) => Ok(returned.into_result(kind)),
            Err(user) => {
                tracing::debug!(error = %user, "continuation failed");
                Ok(StageError::User(user).to_result()?)
            }
        }
    }
}

/// The `UserError` kind given to a continuation that panicked.
pub const PANIC_KIND: &str = "panic";

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "continuation panicked".to_string()
}
