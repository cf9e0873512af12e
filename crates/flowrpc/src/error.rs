//! # Error Definitions
//!
//! Failures of the protocol machinery itself. A closure that runs and fails
//! is not an `Error`; it is a failed result.

use flowpack::ErrorKind;

use crate::ContinuationKind;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The part codec rejected the message.
    #[error("codec error: {0}")]
    Pack(#[from] flowpack::Error),
    /// The envelope was written by a protocol version this process does not speak.
    #[error("unsupported closure envelope version {0}")]
    UnsupportedVersion(u32),
    /// The envelope was not valid JSON of the expected shape.
    #[error("malformed closure envelope: {0}")]
    Envelope(String),
    /// The request carried no parts at all.
    #[error("continuation request has no closure part")]
    MissingClosure,
    /// No handler is registered under the closure's code.
    #[error("no continuation registered for {0:?}")]
    UnknownContinuation(String),
    /// The handler's registered shape differs from the closure's declared one.
    #[error("continuation {code:?} is registered as {registered:?} but declared as {declared:?}")]
    KindMismatch { code: String, registered: ContinuationKind, declared: ContinuationKind },
    /// The number of argument parts differs from the closure's arity.
    #[error("{kind:?} takes {expected} arguments, request carried {found}")]
    ArgumentCount { kind: ContinuationKind, expected: usize, found: usize },
    /// An argument could not be turned into the value a handler asked for.
    #[error("invalid input: {0}")]
    Input(String),
    /// A datum of another type was found where a value was expected.
    #[error("expected a value, found a {0} datum")]
    UnexpectedDatum(&'static str),
    /// A value could not be serialized to or from JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl Error {
    /// How a dispatch failure is classified when reported back as a stage outcome.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            Self::UnknownContinuation(_) | Self::KindMismatch { .. } | Self::UnsupportedVersion(_) | Self::Envelope(_) => {
                ErrorKind::InvalidStageResponse
            }
            _ => ErrorKind::StageInvokeFailed,
        }
    }

    /// Whether the failure lies in the arguments handed to the closure.
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::ArgumentCount { .. } | Self::Input(_) | Self::UnexpectedDatum(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
