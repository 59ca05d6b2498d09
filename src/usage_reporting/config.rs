//! Usage reporting configuration.

use crate::error::{Error, Result};
use std::time::Duration;

/// Environment variable holding the ingestion API key.
pub const API_KEY_ENV: &str = "APOLLO_KEY";
/// Environment variable holding the graph reference (`graph-id@variant`).
pub const GRAPH_REF_ENV: &str = "APOLLO_GRAPH_REF";

pub const DEFAULT_ENDPOINT: &str =
    "https://usage-reporting.api.apollographql.com/api/ingress/traces";
pub const DEFAULT_CLIENT_NAME_HEADER: &str = "apollographql-client-name";
pub const DEFAULT_CLIENT_VERSION_HEADER: &str = "apollographql-client-version";

/// Configuration for the usage reporting plugin.
///
/// # Example
///
/// ```rust
/// use graphql_plugin_kit::UsageReportingConfig;
///
/// let config = UsageReportingConfig::new()
///     .api_key("service:my-graph:abc123")
///     .graph_ref("my-graph@current");
/// ```
#[derive(Debug, Clone)]
pub struct UsageReportingConfig {
    /// API key; falls back to `APOLLO_KEY`
    pub api_key: Option<String>,
    /// Graph reference; falls back to `APOLLO_GRAPH_REF`
    pub graph_ref: Option<String>,
    /// Ingestion endpoint override
    pub endpoint: Option<String>,
    /// Request header carrying the client name
    pub client_name_header: String,
    /// Request header carrying the client version
    pub client_version_header: String,
    /// Timeout for a single report transmission (default: 30 seconds)
    pub request_timeout: Duration,
}

impl Default for UsageReportingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            graph_ref: None,
            endpoint: None,
            client_name_header: DEFAULT_CLIENT_NAME_HEADER.to_string(),
            client_version_header: DEFAULT_CLIENT_VERSION_HEADER.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl UsageReportingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn graph_ref(mut self, graph_ref: impl Into<String>) -> Self {
        self.graph_ref = Some(graph_ref.into());
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Header names are matched case-insensitively.
    pub fn client_headers(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_name_header = name.into().to_lowercase();
        self.client_version_header = version.into().to_lowercase();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Resolve against the process environment.
    pub fn resolve(self) -> Result<ResolvedConfig> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    /// Resolve with a custom environment lookup. Explicit options win over
    /// the environment; empty values count as absent.
    pub fn resolve_with<F>(self, env: F) -> Result<ResolvedConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |explicit: Option<String>, var: &str| {
            explicit
                .filter(|v| !v.is_empty())
                .or_else(|| env(var).filter(|v| !v.is_empty()))
        };

        let api_key = pick(self.api_key, API_KEY_ENV).ok_or_else(|| {
            Error::Config(format!(
                "usage reporting requires an API key: set the option or {}",
                API_KEY_ENV
            ))
        })?;
        let graph_ref = pick(self.graph_ref, GRAPH_REF_ENV).ok_or_else(|| {
            Error::Config(format!(
                "usage reporting requires a graph reference: set the option or {}",
                GRAPH_REF_ENV
            ))
        })?;

        Ok(ResolvedConfig {
            api_key,
            graph_ref,
            endpoint: self
                .endpoint
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            client_name_header: self.client_name_header,
            client_version_header: self.client_version_header,
            request_timeout: self.request_timeout,
        })
    }
}

/// Configuration with every required value present.
#[derive(Clone)]
pub struct ResolvedConfig {
    pub api_key: String,
    pub graph_ref: String,
    pub endpoint: String,
    pub client_name_header: String,
    pub client_version_header: String,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for ResolvedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedConfig")
            .field("api_key", &"<redacted>")
            .field("graph_ref", &self.graph_ref)
            .field("endpoint", &self.endpoint)
            .field("client_name_header", &self.client_name_header)
            .field("client_version_header", &self.client_version_header)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}
