//! Per-request context shared by plugins.

use crate::usage_reporting::TraceCollector;
use axum::http::HeaderMap;
use std::time::{Duration, Instant};

/// Context passed through the plugin hooks of one HTTP request.
#[derive(Debug, Clone)]
pub struct Context {
    /// Request headers
    pub headers: HeaderMap,

    /// Request start time for timing
    pub request_start: Instant,

    /// Unique request identifier
    pub request_id: String,

    /// Trace buffer shared by every operation of the request
    pub traces: TraceCollector,
}

impl Context {
    /// Create a context from request headers, reusing `x-request-id` when present.
    pub fn new(headers: HeaderMap) -> Self {
        let request_id = headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(String::from)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Self {
            headers,
            request_start: Instant::now(),
            request_id,
            traces: TraceCollector::new(),
        }
    }

    /// Time since the request started.
    pub fn elapsed(&self) -> Duration {
        self.request_start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_request_id_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static("req-42"));
        let ctx = Context::new(headers);
        assert_eq!(ctx.request_id, "req-42");
    }

    #[test]
    fn test_request_id_generated() {
        let a = Context::new(HeaderMap::new());
        let b = Context::new(HeaderMap::new());
        assert_eq!(a.request_id.len(), 36);
        assert_ne!(a.request_id, b.request_id);
        assert!(a.traces.is_empty());
    }
}
