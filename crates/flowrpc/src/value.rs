//! User values and the failures closures observe.

use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;

use flowpack::Datum;
use flowpack::ErrorKind;
use flowpack::FlowResult;
use flowpack::Headers;
use flowpack::HttpMethod;
use flowpack::OBJECT_CONTENT_TYPE;

use crate::Error;
use crate::Result;

/// Serializes a user value into a flow object blob.
pub fn encode_value<T: Serialize + ?Sized>(value: &T) -> Result<Datum> {
    Ok(Datum::blob(OBJECT_CONTENT_TYPE, serde_json::to_vec(value)?))
}

/// Reads a user value back. `Empty` reads as JSON `null`, so it decodes into
/// `()` or `Option<T>`.
pub fn decode_value<T: DeserializeOwned>(datum: &Datum) -> Result<T> {
    match datum {
        Datum::Empty => serde_json::from_value(serde_json::Value::Null)
            .map_err(|e| Error::Input(format!("empty value: {}", e))),
        Datum::Blob { .. } => {
            let bytes = datum.expect_blob(OBJECT_CONTENT_TYPE)?;
            serde_json::from_slice(bytes).map_err(|e| Error::Input(e.to_string()))
        }
        other => Err(Error::UnexpectedDatum(other.type_name())),
    }
}

/// An error raised by user code inside a closure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct UserError {
    pub kind: String,
    pub message: String,
}

impl UserError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { kind: "error".to_string(), message: message.into() }
    }

    pub fn with_kind(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self { kind: kind.into(), message: message.into() }
    }
}

impl From<Error> for UserError {
    fn from(e: Error) -> Self {
        Self::with_kind("input", e.to_string())
    }
}

/// The failure of a stage, as seen by a dependent closure or a waiting caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageError {
    /// A closure failed with an error of its own.
    #[error("{0}")]
    User(UserError),
    /// The platform failed the stage.
    #[error("{kind}: {message}")]
    Platform { kind: ErrorKind, message: String },
    /// An invoked function answered with a status outside 200..400.
    #[error("function invocation failed with status {status}")]
    FunctionInvocation { status: u16, headers: Headers, body: Vec<u8> },
    /// An external completion was failed through its failure URL.
    #[error("external completion failed")]
    ExternalCompletion { method: HttpMethod, headers: Headers, body: Vec<u8> },
}

impl StageError {
    pub fn message(&self) -> String {
        match self {
            Self::User(e) => e.message.clone(),
            Self::Platform { message, .. } => message.clone(),
            Self::FunctionInvocation { body, .. } | Self::ExternalCompletion { body, .. } => {
                String::from_utf8_lossy(body).into_owned()
            }
        }
    }

    /// Interprets the datum of a failed result.
    pub fn from_failure(datum: &Datum) -> Result<Self> {
        match datum {
            Datum::Error { kind, message } => Ok(Self::Platform { kind: *kind, message: message.clone() }),
            Datum::HttpResponse { status, headers, body } => {
                Ok(Self::FunctionInvocation { status: *status, headers: headers.clone(), body: body.clone() })
            }
            Datum::HttpRequest { method, headers, body } => {
                Ok(Self::ExternalCompletion { method: *method, headers: headers.clone(), body: body.clone() })
            }
            Datum::Blob { .. } => Ok(Self::User(decode_value(datum)?)),
            other => Err(Error::UnexpectedDatum(other.type_name())),
        }
    }

    /// The failed result that carries this error.
    pub fn to_result(&self) -> Result<FlowResult> {
        let datum = match self {
            Self::User(e) => encode_value(e)?,
            Self::Platform { kind, message } => Datum::error(*kind, message.clone()),
            Self::FunctionInvocation { status, headers, body } => {
                Datum::HttpResponse { status: *status, headers: headers.clone(), body: body.clone() }
            }
            Self::ExternalCompletion { method, headers, body } => {
                Datum::HttpRequest { method: *method, headers: headers.clone(), body: body.clone() }
            }
        };
        Ok(FlowResult::failure(datum)?)
    }
}

impl From<UserError> for StageError {
    fn from(e: UserError) -> Self {
        Self::User(e)
    }
}
