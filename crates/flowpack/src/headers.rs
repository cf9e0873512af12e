//! # Headers
//!
//! An ordered header list with case-insensitive lookup, plus the names of the
//! protocol headers every part speaks.

use serde::Deserialize;
use serde::Serialize;

/// Protocol header names and their fixed vocabularies.
pub mod names {
    pub const PREFIX: &str = "FnProject-";

    pub const DATUM_TYPE: &str = "FnProject-DatumType";
    pub const RESULT_STATUS: &str = "FnProject-ResultStatus";
    pub const ERROR_TYPE: &str = "FnProject-ErrorType";
    pub const STAGE_ID: &str = "FnProject-StageID";
    pub const FLOW_ID: &str = "FnProject-FlowID";
    pub const METHOD: &str = "FnProject-Method";
    pub const RESULT_CODE: &str = "FnProject-ResultCode";
    pub const STATE_TYPE: &str = "FnProject-Statetype";
    pub const USER_HEADER_PREFIX: &str = "FnProject-Header-";
    pub const CODE_LOCATION: &str = "FnProject-Codeloc";
    pub const CONTENT_TYPE: &str = "Content-Type";

    pub const DATUM_BLOB: &str = "blob";
    pub const DATUM_EMPTY: &str = "empty";
    pub const DATUM_STAGE_REF: &str = "stageref";
    pub const DATUM_ERROR: &str = "error";
    pub const DATUM_HTTP_REQ: &str = "httpreq";
    pub const DATUM_HTTP_RESP: &str = "httpresp";
    pub const DATUM_STATE: &str = "state";

    pub const STATUS_SUCCESS: &str = "success";
    pub const STATUS_FAILURE: &str = "failure";
}

/// Ordered `(name, value)` pairs. Names compare ASCII case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the first value stored under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replaces every value under `name` with `value`.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    /// Builder form of `set`.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let idx = self.entries.iter().position(|(k, _)| k.eq_ignore_ascii_case(name))?;
        let (_, value) = self.entries.remove(idx);
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        Some(value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Collects the user headers carried as `FnProject-Header-<name>`, with
    /// the prefix stripped. `Content-Type` is carried bare and kept as is.
    pub fn user_headers(&self) -> Headers {
        let prefix = names::USER_HEADER_PREFIX;
        let mut out = Headers::new();
        for (k, v) in self.iter() {
            let Some(head) = k.get(..prefix.len()) else { continue };
            if head.eq_ignore_ascii_case(prefix) && k.len() > prefix.len() {
                out.set(&k[prefix.len()..], v);
            }
        }
        if let Some(ct) = self.get(names::CONTENT_TYPE) {
            out.set(names::CONTENT_TYPE, ct);
        }
        out
    }

    /// Inverse of `user_headers`: writes each entry with the user prefix,
    /// except `Content-Type`, which is written bare.
    pub fn write_user_headers(&mut self, user: &Headers) {
        for (k, v) in user.iter() {
            if k.eq_ignore_ascii_case(names::CONTENT_TYPE) {
                self.set(names::CONTENT_TYPE, v);
            } else {
                self.set(format!("{}{}", names::USER_HEADER_PREFIX, k), v);
            }
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.set(k, v);
        }
        headers
    }
}
