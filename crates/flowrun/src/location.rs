//! Source locations of stage-creating calls, reported to the completer for diagnostics.

use std::fmt;
use std::panic::Location;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CodeLocation(Option<String>);

impl CodeLocation {
    /// The location of the caller of the `#[track_caller]` chain this is invoked from.
    #[track_caller]
    pub fn caller() -> Self {
        let loc = Location::caller();
        Self(Some(format!("{}:{}:{}", loc.file(), loc.line(), loc.column())))
    }

    pub fn new(location: impl Into<String>) -> Self {
        Self(Some(location.into()))
    }

    pub fn unknown() -> Self {
        Self(None)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_deref().unwrap_or("unknown location")
    }

    /// Reads a location from a header value; absent means unknown.
    pub fn from_header(value: Option<&str>) -> Self {
        match value {
            Some(v) if !v.is_empty() && v != "unknown location" => Self::new(v),
            _ => Self::unknown(),
        }
    }
}

impl fmt::Display for CodeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
