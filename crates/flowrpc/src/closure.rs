//! # Closure Envelope
//!
//! ## Invariants
//!
//! - The envelope always travels as a blob of `CLOSURE_CONTENT_TYPE`.
//! - `kind` is declared by the sender and checked by the receiver; dispatch
//!   never guesses a shape from the captured state.

use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;

use flowpack::Datum;

use crate::Error;
use crate::Result;

pub const CLOSURE_CONTENT_TYPE: &str = "application/x-flow-closure";

/// The only envelope version this crate reads or writes.
pub const ENVELOPE_VERSION: u32 = 1;

/// The declared shape of a continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContinuationKind {
    /// No arguments, produces a value.
    Supplier,
    /// No arguments, produces nothing.
    Runnable,
    /// One argument, produces a value.
    Function,
    /// One argument, produces nothing.
    Consumer,
    /// Two arguments, produces a value.
    BiFunction,
    /// Two arguments, produces nothing.
    BiConsumer,
}

impl ContinuationKind {
    pub fn arity(self) -> usize {
        match self {
            Self::Supplier | Self::Runnable => 0,
            Self::Function | Self::Consumer => 1,
            Self::BiFunction | Self::BiConsumer => 2,
        }
    }

    pub fn produces_value(self) -> bool {
        matches!(self, Self::Supplier | Self::Function | Self::BiFunction)
    }
}

/// A serializable reference to registered code plus the state it captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Closure {
    pub version: u32,
    pub code: String,
    pub kind: ContinuationKind,
    #[serde(default)]
    pub state: serde_json::Value,
}

impl Closure {
    /// A closure over `state`.
    pub fn new<S: Serialize>(code: impl Into<String>, kind: ContinuationKind, state: &S) -> Result<Self> {
        Ok(Self {
            version: ENVELOPE_VERSION,
            code: code.into(),
            kind,
            state: serde_json::to_value(state)?,
        })
    }

    /// A closure that captured nothing.
    pub fn stateless(code: impl Into<String>, kind: ContinuationKind) -> Self {
        Self { version: ENVELOPE_VERSION, code: code.into(), kind, state: serde_json::Value::Null }
    }

    pub fn state<S: DeserializeOwned>(&self) -> Result<S> {
        serde_json::from_value(self.state.clone()).map_err(|e| Error::Input(format!("closure state: {}", e)))
    }

    pub fn to_datum(&self) -> Result<Datum> {
        Ok(Datum::blob(CLOSURE_CONTENT_TYPE, serde_json::to_vec(self)?))
    }

    pub fn from_datum(datum: &Datum) -> Result<Self> {
        let bytes = datum.expect_blob(CLOSURE_CONTENT_TYPE)?;
        let closure: Closure = serde_json::from_slice(bytes).map_err(|e| Error::Envelope(e.to_string()))?;
        if closure.version != ENVELOPE_VERSION {
            return Err(Error::UnsupportedVersion(closure.version));
        }
        Ok(closure)
    }
}
