//! Error types for the plugin kit

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the plugin kit
///
/// Covers configuration failures raised at startup, pub/sub client failures,
/// report transmission failures and the plumbing errors of the host server.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid configuration (fatal at initialization)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pub/sub client errors
    #[error("Pub/sub error: {0}")]
    PubSub(String),

    /// GraphQL schema errors
    #[error("GraphQL schema error: {0}")]
    Schema(String),

    /// Plugin hook errors
    #[error("Plugin error: {0}")]
    Plugin(String),

    /// Usage report rejected by the ingestion endpoint
    #[error("Report rejected ({status}): {body}")]
    ReportRejected { status: u16, body: String },

    /// HTTP transport errors
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error("Error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Convert error to GraphQL error format
    ///
    /// # Security
    ///
    /// In production (ENV=production), internal error details are sanitized
    /// to prevent information disclosure.
    pub fn to_graphql_error(&self) -> GraphQLError {
        let is_production = std::env::var("ENV")
            .map(|e| e == "production" || e == "prod")
            .unwrap_or(false);
        self.to_graphql_error_with(is_production)
    }

    fn to_graphql_error_with(&self, is_production: bool) -> GraphQLError {
        let message = if is_production {
            match self {
                Error::Config(_) => "Server misconfigured".to_string(),
                Error::PubSub(_) => "Event delivery error".to_string(),
                Error::ReportRejected { .. } | Error::Transport(_) => {
                    "Upstream service error".to_string()
                }
                Error::Internal(_) | Error::Io(_) => "Internal server error".to_string(),
                Error::Serialization(_) => "Data processing error".to_string(),
                Error::Other(_) => "An unexpected error occurred".to_string(),
                // Safe to expose to clients
                Error::Schema(msg) => format!("Schema error: {}", msg),
                Error::Plugin(msg) => format!("Request processing error: {}", msg),
            }
        } else {
            self.to_string()
        };

        GraphQLError {
            message,
            extensions: self.extensions(),
        }
    }

    /// Error code exposed under `extensions.code`
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::PubSub(_) => "PUBSUB_ERROR",
            Error::Schema(_) => "SCHEMA_ERROR",
            Error::Plugin(_) => "PLUGIN_ERROR",
            Error::ReportRejected { .. } => "REPORT_REJECTED",
            Error::Transport(_) => "TRANSPORT_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Other(_) => "UNKNOWN_ERROR",
        }
    }

    fn extensions(&self) -> std::collections::HashMap<String, serde_json::Value> {
        let mut map = std::collections::HashMap::new();
        map.insert("code".to_string(), serde_json::json!(self.code()));
        map
    }
}

/// GraphQL error response format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(skip_serializing_if = "std::collections::HashMap::is_empty")]
    pub extensions: std::collections::HashMap<String, serde_json::Value>,
}

impl From<Error> for GraphQLError {
    fn from(err: Error) -> Self {
        err.to_graphql_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_display() {
        let err = Error::Config("APOLLO_KEY is required".to_string());
        assert_eq!(err.to_string(), "Configuration error: APOLLO_KEY is required");

        let err = Error::PubSub("connection closed".to_string());
        assert_eq!(err.to_string(), "Pub/sub error: connection closed");

        let err = Error::Plugin("usage-reporting: boom".to_string());
        assert_eq!(err.to_string(), "Plugin error: usage-reporting: boom");

        let err = Error::ReportRejected {
            status: 401,
            body: "invalid key".to_string(),
        };
        assert_eq!(err.to_string(), "Report rejected (401): invalid key");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_error_from_anyhow() {
        let err: Error = anyhow::anyhow!("something went wrong").into();
        assert!(matches!(err, Error::Other(_)));
    }

    #[test]
    fn test_graphql_error_development_keeps_details() {
        let err = Error::Internal("listener map poisoned".to_string());
        let gql_err = err.to_graphql_error_with(false);
        assert_eq!(gql_err.message, "Internal error: listener map poisoned");
        assert_eq!(gql_err.extensions.get("code").unwrap(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_graphql_error_production_sanitized() {
        let err = Error::Config("APOLLO_KEY=secret".to_string());
        let gql_err = err.to_graphql_error_with(true);
        assert_eq!(gql_err.message, "Server misconfigured");
        assert!(!gql_err.message.contains("secret"));

        let err = Error::Plugin("rejected header".to_string());
        let gql_err = err.to_graphql_error_with(true);
        assert_eq!(gql_err.message, "Request processing error: rejected header");
    }

    #[test]
    fn test_all_error_variants_have_codes() {
        let errors = vec![
            Error::Config("x".into()),
            Error::PubSub("x".into()),
            Error::Schema("x".into()),
            Error::Plugin("x".into()),
            Error::ReportRejected {
                status: 500,
                body: "x".into(),
            },
            Error::Internal("x".into()),
            Error::Io(io::Error::new(io::ErrorKind::Other, "x")),
            Error::Other(anyhow::anyhow!("x")),
        ];

        for err in errors {
            let gql_err = err.to_graphql_error_with(false);
            assert!(gql_err.extensions.contains_key("code"));
        }
    }

    #[test]
    fn test_graphql_error_empty_extensions_skipped() {
        let gql_err = GraphQLError {
            message: "Test".to_string(),
            extensions: std::collections::HashMap::new(),
        };

        let json = serde_json::to_string(&gql_err).unwrap();
        assert!(!json.contains("extensions"));
    }
}
