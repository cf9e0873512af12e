//! # Configuration
//!
//! Per-invocation settings read from the function's environment.

use std::time::Duration;

pub const COMPLETER_BASE_URL: &str = "COMPLETER_BASE_URL";
pub const DEFAULT_COMPLETER_BASE_URL: &str = "http://completer-svc:8081";

const APP_NAME: &str = "FN_APP_NAME";
const ROUTE: &str = "FN_PATH";
const REQUEST_TIMEOUT: &str = "COMPLETER_REQUEST_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowConfig {
    /// Where the completer service lives.
    pub completer_base_url: String,
    /// The id under which new flows are created: app name followed by route.
    pub function_id: Option<String>,
    /// Upper bound on a single completer request. Does not bound awaiting a stage.
    pub request_timeout: Option<Duration>,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            completer_base_url: DEFAULT_COMPLETER_BASE_URL.to_string(),
            function_id: None,
            request_timeout: None,
        }
    }
}

impl FlowConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let completer_base_url = get(COMPLETER_BASE_URL)
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_COMPLETER_BASE_URL.to_string());

        let function_id = match (get(APP_NAME), get(ROUTE)) {
            (Some(app), Some(route)) => Some(format!("{}{}", app, route)),
            _ => None,
        };

        let request_timeout = get(REQUEST_TIMEOUT).and_then(|ms| match ms.trim().parse::<u64>() {
            Ok(ms) => Some(Duration::from_millis(ms)),
            Err(_) => {
                tracing::warn!(value = %ms, "ignoring unparsable {}", REQUEST_TIMEOUT);
                None
            }
        });

        Self { completer_base_url, function_id, request_timeout }
    }
}
