//! # Error Definitions
//!
//! Errors surfaced to callers of the flow API. Stage evaluation never produces
//! one of these directly: a failing stage resolves to a failed result, and only
//! awaiting that stage turns it into `FlowError::Completion`.

use flowpack::Datum;
use flowrpc::StageError;

use crate::transport::TransportError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum FlowError {
    /// The awaited stage failed.
    #[error("stage completed with failure: {0}")]
    Completion(StageError),
    /// The local wait elapsed before the stage resolved. The stage keeps running.
    #[error("timed out waiting for stage")]
    Timeout,
    /// The completer could not be reached or answered with an error status.
    #[error("completer communication failed: {0}")]
    Transport(#[from] TransportError),
    /// The completer answered with something that does not follow the protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// A value or closure could not be encoded or decoded.
    #[error("serialization failed: {0}")]
    Serialization(String),
    /// The completer refused the operation (unknown graph or stage, graph already run, bad argument).
    #[error("rejected: {0}")]
    Rejected(String),
}

impl FlowError {
    /// Builds the completion error for the datum of a failed result.
    pub fn from_failure(datum: &Datum) -> Self {
        match StageError::from_failure(datum) {
            Ok(e) => Self::Completion(e),
            Err(e) => Self::Protocol(format!("undecodable failure: {}", e)),
        }
    }

    /// The stage error, if this is a completion error.
    pub fn stage_error(&self) -> Option<&StageError> {
        match self {
            Self::Completion(e) => Some(e),
            _ => None,
        }
    }
}

impl From<flowrpc::Error> for FlowError {
    fn from(e: flowrpc::Error) -> Self {
        match e {
            flowrpc::Error::Pack(p) => Self::Protocol(p.to_string()),
            other => Self::Serialization(other.to_string()),
        }
    }
}

impl From<flowpack::Error> for FlowError {
    fn from(e: flowpack::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
