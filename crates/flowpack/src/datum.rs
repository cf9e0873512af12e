//! # Datum & Result
//!
//! ## Invariants
//!
//! - A failed `FlowResult` only ever carries `Error`, `HttpResponse`,
//!   `HttpRequest`, or `Blob`.
//! - An `Error` datum is only ever carried by a failed `FlowResult`.
//! - Encoding then decoding a datum yields the same datum, except that an
//!   `Error` message body is decoded lossily as UTF-8.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::CompletionId;
use crate::ERROR_CONTENT_TYPE;
use crate::Error;
use crate::Headers;
use crate::Part;
use crate::Result;
use crate::names;

// ============================================================================
//  VOCABULARIES
// ============================================================================

/// Platform-level failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    StageTimeout,
    StageInvokeFailed,
    FunctionTimeout,
    FunctionInvokeFailed,
    StageLost,
    InvalidStageResponse,
    Unknown,
}

impl ErrorKind {
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::StageTimeout => "stage-timeout",
            Self::StageInvokeFailed => "stage-invoke-failed",
            Self::FunctionTimeout => "function-timeout",
            Self::FunctionInvokeFailed => "function-invoke-failed",
            Self::StageLost => "stage-lost",
            Self::InvalidStageResponse => "invalid-stage-response",
            Self::Unknown => "unknown-error",
        }
    }

    /// Unrecognised names classify as `Unknown`.
    pub fn from_wire(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "stage-timeout" => Self::StageTimeout,
            "stage-invoke-failed" => Self::StageInvokeFailed,
            "function-timeout" => Self::FunctionTimeout,
            "function-invoke-failed" => Self::FunctionInvokeFailed,
            "stage-lost" => Self::StageLost,
            "invalid-stage-response" => Self::InvalidStageResponse,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Terminal state of a whole flow, handed to termination hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowState {
    Succeeded,
    Failed,
    Cancelled,
    Killed,
    Unknown,
}

impl FlowState {
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Killed => "killed",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_wire(s: &str) -> Self {
        match s {
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            "killed" => Self::Killed,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Patch,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
        }
    }

    /// Parses a method name, ignoring case.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "HEAD" => Some(Self::Head),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "DELETE" => Some(Self::Delete),
            "OPTIONS" => Some(Self::Options),
            "PATCH" => Some(Self::Patch),
            _ => None,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
//  DATUM
// ============================================================================

/// A value that can cross the wire between a function and the completer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datum {
    Empty,
    Blob { content_type: String, data: Vec<u8> },
    StageRef(CompletionId),
    Error { kind: ErrorKind, message: String },
    HttpRequest { method: HttpMethod, headers: Headers, body: Vec<u8> },
    HttpResponse { status: u16, headers: Headers, body: Vec<u8> },
    State(FlowState),
}

impl Datum {
    pub fn blob(content_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self::Blob { content_type: content_type.into(), data: data.into() }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error { kind, message: message.into() }
    }

    /// The `FnProject-DatumType` value for this variant.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Empty => names::DATUM_EMPTY,
            Self::Blob { .. } => names::DATUM_BLOB,
            Self::StageRef(_) => names::DATUM_STAGE_REF,
            Self::Error { .. } => names::DATUM_ERROR,
            Self::HttpRequest { .. } => names::DATUM_HTTP_REQ,
            Self::HttpResponse { .. } => names::DATUM_HTTP_RESP,
            Self::State(_) => names::DATUM_STATE,
        }
    }

    /// Whether a failed result may carry this datum.
    pub fn can_fail(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::HttpResponse { .. } | Self::HttpRequest { .. } | Self::Blob { .. })
    }

    /// Returns the blob payload if this is a blob of `content_type`.
    pub fn expect_blob(&self, content_type: &'static str) -> Result<&[u8]> {
        match self {
            Self::Blob { content_type: ct, data } if ct.eq_ignore_ascii_case(content_type) => Ok(data),
            Self::Blob { content_type: ct, .. } => Err(Error::ContentType { expected: content_type, found: ct.clone() }),
            other => Err(Error::InvalidHeader { header: names::DATUM_TYPE, value: other.type_name().to_string() }),
        }
    }

    /// Encodes the datum as a part with no result status.
    pub fn to_part(&self) -> Part {
        let mut headers = Headers::new().with(names::DATUM_TYPE, self.type_name());
        let body = match self {
            Self::Empty => Vec::new(),
            Self::Blob { content_type, data } => {
                headers.set(names::CONTENT_TYPE, content_type.as_str());
                data.clone()
            }
            Self::StageRef(id) => {
                headers.set(names::STAGE_ID, id.as_str());
                Vec::new()
            }
            Self::Error { kind, message } => {
                headers.set(names::ERROR_TYPE, kind.as_wire());
                headers.set(names::CONTENT_TYPE, ERROR_CONTENT_TYPE);
                message.as_bytes().to_vec()
            }
            Self::HttpRequest { method, headers: user, body } => {
                headers.set(names::METHOD, method.as_str());
                headers.write_user_headers(user);
                body.clone()
            }
            Self::HttpResponse { status, headers: user, body } => {
                headers.set(names::RESULT_CODE, status.to_string());
                headers.write_user_headers(user);
                body.clone()
            }
            Self::State(state) => {
                headers.set(names::STATE_TYPE, state.as_wire());
                Vec::new()
            }
        };
        Part { headers, body }
    }

    /// Decodes the datum described by a part's headers.
    pub fn from_part(part: &Part) -> Result<Self> {
        let h = &part.headers;
        let datum_type = require(h, names::DATUM_TYPE)?;
        match datum_type.to_ascii_lowercase().as_str() {
            names::DATUM_EMPTY => Ok(Self::Empty),
            names::DATUM_BLOB => {
                let content_type = require(h, names::CONTENT_TYPE)?;
                Ok(Self::blob(content_type, part.body.clone()))
            }
            names::DATUM_STAGE_REF => {
                let id = require(h, names::STAGE_ID)?;
                Ok(Self::StageRef(CompletionId::new(id)))
            }
            names::DATUM_ERROR => {
                let kind = ErrorKind::from_wire(require(h, names::ERROR_TYPE)?);
                let message = String::from_utf8_lossy(&part.body).into_owned();
                Ok(Self::Error { kind, message })
            }
            names::DATUM_HTTP_REQ => {
                let raw = require(h, names::METHOD)?;
                let method = HttpMethod::parse(raw)
                    .ok_or_else(|| Error::InvalidHeader { header: names::METHOD, value: raw.to_string() })?;
                Ok(Self::HttpRequest { method, headers: h.user_headers(), body: part.body.clone() })
            }
            names::DATUM_HTTP_RESP => {
                let raw = require(h, names::RESULT_CODE)?;
                let status = raw
                    .trim()
                    .parse::<u16>()
                    .map_err(|_| Error::InvalidHeader { header: names::RESULT_CODE, value: raw.to_string() })?;
                Ok(Self::HttpResponse { status, headers: h.user_headers(), body: part.body.clone() })
            }
            names::DATUM_STATE => {
                let state = FlowState::from_wire(require(h, names::STATE_TYPE)?);
                Ok(Self::State(state))
            }
            _ => Err(Error::InvalidHeader { header: names::DATUM_TYPE, value: datum_type.to_string() }),
        }
    }
}

fn require<'a>(headers: &'a Headers, name: &'static str) -> Result<&'a str> {
    headers.get(name).ok_or(Error::MissingHeader(name))
}

// ============================================================================
//  RESULT
// ============================================================================

/// The outcome of a stage: a datum plus whether it represents success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowResult {
    success: bool,
    datum: Datum,
}

impl FlowResult {
    pub fn success(datum: Datum) -> Self {
        Self { success: true, datum }
    }

    /// Builds a failed result, rejecting datums that cannot represent a failure.
    pub fn failure(datum: Datum) -> Result<Self> {
        if !datum.can_fail() {
            return Err(Error::InvalidFailure(datum.type_name()));
        }
        Ok(Self { success: false, datum })
    }

    /// A failed result carrying a platform error.
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { success: false, datum: Datum::error(kind, message) }
    }

    pub fn empty() -> Self {
        Self::success(Datum::Empty)
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn datum(&self) -> &Datum {
        &self.datum
    }

    pub fn into_datum(self) -> Datum {
        self.datum
    }

    /// Keeps a failure as is; replaces a success value with `Empty`.
    pub fn to_empty(&self) -> Self {
        if self.success { Self::empty() } else { self.clone() }
    }

    pub fn to_part(&self) -> Part {
        let mut part = self.datum.to_part();
        let status = if self.success { names::STATUS_SUCCESS } else { names::STATUS_FAILURE };
        part.headers.set(names::RESULT_STATUS, status);
        part
    }

    pub fn from_part(part: &Part) -> Result<Self> {
        let raw = require(&part.headers, names::RESULT_STATUS)?;
        let success = match raw.to_ascii_lowercase().as_str() {
            names::STATUS_SUCCESS => true,
            names::STATUS_FAILURE => false,
            _ => return Err(Error::InvalidHeader { header: names::RESULT_STATUS, value: raw.to_string() }),
        };
        let datum = Datum::from_part(part)?;
        if success {
            if matches!(datum, Datum::Error { .. }) {
                return Err(Error::SuccessfulError);
            }
            Ok(Self::success(datum))
        } else {
            Self::failure(datum)
        }
    }
}
