//! # FlowRPC
//!
//! The continuation protocol: how a stage's closure is named, shipped to the
//! completer, handed back with its arguments, dispatched, and answered.
//!
//! ## Architecture
//!
//! A closure never travels as code. It travels as a versioned envelope naming
//! a registered continuation (`code`), the shape it was declared with
//! (`ContinuationKind`), and its captured state as JSON. The receiving process
//! looks the code up in its `Registry` and refuses anything that does not
//! match what it registered.
//!
//! ```text
//! request  := closure-part result-part{arity} end-marker
//! response := result-part end-marker
//! ```

mod closure;
mod dispatch;
mod error;
mod frame;
mod value;


pub use closure::CLOSURE_CONTENT_TYPE;
pub use closure::Closure;
pub use closure::ContinuationKind;
pub use closure::ENVELOPE_VERSION;
pub use dispatch::Call;
pub use dispatch::HandlerFuture;
pub use dispatch::PANIC_KIND;
pub use dispatch::Outcome;
pub use dispatch::Registry;
pub use dispatch::Returned;
pub use error::Error;
pub use error::Result;
pub use frame::InvokeRequest;
pub use frame::decode_response;
pub use frame::encode_response;
pub use value::StageError;
pub use value::UserError;
pub use value::decode_value;
pub use value::encode_value;
