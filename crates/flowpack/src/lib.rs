//! # Flowpack
//!
//! The value model shared by everything that talks about flow stages: the
//! `Datum` union, the `FlowResult` outcome wrapper, and the header-tagged part
//! codec that carries both across process boundaries.
//!
//! ## Philosophy
//!
//! - **Headers describe, bodies carry**: Every part says what it is through
//!   `FnProject-*` headers. The body is opaque bytes, never inspected beyond
//!   what the datum type demands.
//! - **Strict decode**: A part that lies about itself (missing headers, bad
//!   status, a failed result holding a value that cannot be a failure) is an
//!   error, not a best-effort guess.
//! - **Self-delimited**: Parts are length-prefixed so a reader never scans for
//!   boundaries inside user data.
//!
//! ## Format
//!
//! ```text
//! message := part* [Len: 4b = 0] padding*
//! part    := [Len: 4b] header-line* "\r\n" body
//! ```
//!
//! All lengths are Little-Endian `u32` and cover the header block plus body.

mod datum;
mod headers;
mod id;
mod part;


pub use datum::Datum;
pub use datum::ErrorKind;
pub use datum::FlowResult;
pub use datum::FlowState;
pub use datum::HttpMethod;
pub use headers::Headers;
pub use headers::names;
pub use id::CompletionId;
pub use id::FlowId;
pub use part::Decoder;
pub use part::Encoder;
pub use part::Part;
pub use part::decode_parts;
pub use part::encode_parts;

/// Content type of a serialized flow value (closure results, completed values).
pub const OBJECT_CONTENT_TYPE: &str = "application/x-flow-object";

/// Content type of error message bodies.
pub const ERROR_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Content type used when an http datum carries no explicit one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Failures while encoding or decoding parts and datums.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The buffer ended before the declared part length.
    #[error("truncated part: needed {need} bytes, {have} remaining")]
    Truncated { need: usize, have: usize },
    /// The buffer ended without a zero-length end marker.
    #[error("message has no end marker")]
    MissingTerminator,
    /// A header line was not `Name: value`, or contained illegal bytes.
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),
    /// A header required by the datum type was absent.
    #[error("missing header {0}")]
    MissingHeader(&'static str),
    /// A header was present but held a value outside its vocabulary.
    #[error("invalid value {value:?} for header {header}")]
    InvalidHeader { header: &'static str, value: String },
    /// A blob carried a content type other than the one expected.
    #[error("unexpected content type {found:?}, expected {expected}")]
    ContentType { expected: &'static str, found: String },
    /// A failed result carried a datum that can never represent a failure.
    #[error("a failed result cannot carry a {0} datum")]
    InvalidFailure(&'static str),
    /// A successful result carried an error datum.
    #[error("an error datum must be carried by a failed result")]
    SuccessfulError,
    /// A part exceeded the `u32` length prefix.
    #[error("part of {0} bytes exceeds the length prefix")]
    TooLarge(usize),
}

/// Specialized `Result` for flowpack operations.
pub type Result<T> = std::result::Result<T, Error>;
