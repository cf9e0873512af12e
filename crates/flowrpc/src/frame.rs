//! # Invocation Frames
//!
//! ## Invariants
//! - **Panic Safety**: Decoding returns `Result` and never indexes past a part.
//! - The closure part carries no result status; every argument part does.

use flowpack::Datum;
use flowpack::Decoder;
use flowpack::Encoder;
use flowpack::FlowResult;

use crate::Error;
use crate::Result;

/// A request to run one closure against its dependency outcomes.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeRequest {
    /// The closure blob, exactly as it was stored by the completer.
    pub closure: Datum,
    pub args: Vec<FlowResult>,
}

impl InvokeRequest {
    pub fn new(closure: Datum, args: Vec<FlowResult>) -> Self {
        Self { closure, args }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        enc.part(&self.closure.to_part())?;
        for arg in &self.args {
            enc.part(&arg.to_part())?;
        }
        Ok(enc.finish())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(bytes);
        let closure = match dec.next_part()? {
            Some(part) => Datum::from_part(&part)?,
            None => return Err(Error::MissingClosure),
        };
        let mut args = Vec::new();
        while let Some(part) = dec.next_part()? {
            args.push(FlowResult::from_part(&part)?);
        }
        Ok(Self { closure, args })
    }
}

/// Frames the outcome of an invocation.
pub fn encode_response(result: &FlowResult) -> Result<Vec<u8>> {
    let mut enc = Encoder::new();
    enc.part(&result.to_part())?;
    Ok(enc.finish())
}

/// Reads a framed outcome; exactly one part is expected.
pub fn decode_response(bytes: &[u8]) -> Result<FlowResult> {
    let mut dec = Decoder::new(bytes);
    let Some(part) = dec.next_part()? else {
        return Err(Error::Input("response carries no result".into()));
    };
    if dec.next_part()?.is_some() {
        return Err(Error::Input("response carries more than one result".into()));
    }
    Ok(FlowResult::from_part(&part)?)
}
