use axum::http::HeaderMap;
use std::fmt;
use uuid::Uuid;

pub const X_CORRELATION_ID: &str = "x-correlation-id";

/// Accepted when no `x-correlation-id` is present.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Longer inbound ids are replaced rather than logged.
const MAX_CORRELATION_ID_LEN: usize = 128;

pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

fn usable(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_CORRELATION_ID_LEN
        && id.bytes().all(|b| b.is_ascii_graphic())
}

/// Inbound correlation id, or a fresh one when the caller sent none or an unusable one.
pub fn extract_or_generate_correlation_id(headers: &HeaderMap) -> String {
    [X_CORRELATION_ID, X_REQUEST_ID]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .map(str::trim)
        .find(|id| usable(id))
        .map(str::to_string)
        .unwrap_or_else(generate_correlation_id)
}

/// Stored in request extensions by [`crate::trace_http_request`].
#[derive(Clone, Debug)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
