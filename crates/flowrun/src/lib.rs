//! # FlowRun
//!
//! Building, running and observing flows: graphs of stages whose closures are
//! shipped to a completer and run later, once their dependencies resolve.
//!
//! ## Architecture
//!
//! ```text
//!   Flow / FlowFuture ──► CompleterClient ──┬─► InMemCompleter (graph engine)
//!                                           └─► RemoteCompleterClient ─► Transport ─► CompleterService
//!
//!   InMemCompleter ──► StageInvoker ──► ContinuationHandler ──► Registry<Flow>
//! ```
//!
//! The in-memory completer is the reference engine; the remote client speaks
//! the completer routes and behaves identically when pointed at it.

pub mod client;
pub mod completer;
pub mod config;
pub mod context;
pub mod continuation;
pub mod error;
pub mod flow;
pub mod graph;
pub mod http;
pub mod invoker;
pub mod location;
pub mod logging;
pub mod loopback;
pub mod remote;
pub mod service;
pub mod transport;

#[cfg(test)]
mod tests;

pub use client::Combinator;
pub use client::CompleterClient;
pub use client::ExternalCompletion;
pub use client::StageSpec;
pub use completer::InMemCompleter;
pub use config::FlowConfig;
pub use context::FlowContext;
pub use continuation::ContinuationHandler;
pub use continuation::LocalStageInvoker;
pub use error::FlowError;
pub use error::Result;
pub use flow::ExternalFuture;
pub use flow::Flow;
pub use flow::FlowFuture;
pub use flow::FutureRef;
pub use invoker::FunctionInvoker;
pub use invoker::FunctionResponse;
pub use invoker::StageInvoker;
pub use location::CodeLocation;
pub use remote::RemoteCompleterClient;
pub use service::CompleterService;
