//! Runtime support - HTTP and WebSocket integration for a dynamic schema.

use crate::context::Context;
use crate::error::{GraphQLError, Result};
use crate::metrics::PluginMetrics;
use crate::plugin::PluginRegistry;
use crate::usage_reporting::SchemaId;
use async_graphql::dynamic::Schema;
use async_graphql::{BatchRequest, BatchResponse, Executor, ServerError};
use async_graphql_axum::{
    GraphQLBatchRequest, GraphQLProtocol, GraphQLResponse, GraphQLWebSocket,
};
use axum::{
    extract::{State, WebSocketUpgrade},
    http::HeaderMap,
    response::{Html, IntoResponse},
    routing::{get, post},
    Router,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

/// A schema together with the id its requests are reported under.
struct Served {
    schema: Schema,
    id: SchemaId,
}

impl Served {
    fn new(schema: Schema, sdl: &str) -> Self {
        Self {
            schema,
            id: SchemaId::of(sdl),
        }
    }
}

/// ServeMux - main request handler
///
/// The `ServeMux` runs the plugin hooks around every request, executes it
/// against the current schema, and can be converted into an Axum router.
#[derive(Clone)]
pub struct ServeMux {
    served: Arc<RwLock<Served>>,
    plugins: PluginRegistry,
    error_handler: Option<Arc<dyn Fn(Vec<GraphQLError>) + Send + Sync>>,
    /// Enable metrics endpoint
    metrics_enabled: bool,
}

impl ServeMux {
    /// Create a new ServeMux and announce the schema to every plugin.
    pub async fn new(schema: Schema, plugins: PluginRegistry) -> Result<Self> {
        let sdl = schema.sdl();
        plugins.on_schema_change(&sdl).await?;
        Ok(Self {
            served: Arc::new(RwLock::new(Served::new(schema, &sdl))),
            plugins,
            error_handler: None,
            metrics_enabled: false,
        })
    }

    /// Enable metrics endpoint
    pub fn enable_metrics(&mut self) {
        self.metrics_enabled = true;
    }

    /// Set error handler
    pub fn set_error_handler<F>(&mut self, handler: F)
    where
        F: Fn(Vec<GraphQLError>) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
    }

    /// The schema currently served.
    pub fn schema(&self) -> Schema {
        self.served.read().schema.clone()
    }

    /// Id of the schema currently served.
    pub fn schema_id(&self) -> SchemaId {
        self.served.read().id.clone()
    }

    /// Swap in a recompiled schema, then notify plugins.
    ///
    /// Every request carries the id of the schema it executes against, so
    /// requests still running on the old schema keep reporting its id.
    pub async fn replace_schema(&self, schema: Schema) -> Result<()> {
        let sdl = schema.sdl();
        let served = Served::new(schema, &sdl);
        let id = served.id.clone();
        *self.served.write() = served;
        debug!(schema_id = %id.as_str(), "schema replaced");
        self.plugins.on_schema_change(&sdl).await
    }

    /// Handle a GraphQL HTTP request
    ///
    /// This method executes the request pipeline:
    /// 1. Creates a context from headers
    /// 2. Runs the `on_request` plugin hooks
    /// 3. Executes every operation of the batch against the schema
    /// 4. Runs the `on_response` plugin hooks
    pub async fn handle_http(&self, headers: HeaderMap, batch: BatchRequest) -> BatchResponse {
        let ctx = Context::new(headers);

        if let Err(err) = self.plugins.on_request(&ctx, &batch).await {
            let gql_err: GraphQLError = err.into();
            if let Some(handler) = &self.error_handler {
                handler(vec![gql_err.clone()]);
            }
            let server_err = ServerError::new(gql_err.message, None);
            return BatchResponse::Single(async_graphql::Response::from_errors(vec![server_err]));
        }

        let (schema, schema_id) = {
            let served = self.served.read();
            (served.schema.clone(), served.id.clone())
        };
        let batch = batch
            .data(ctx.traces.clone())
            .data(ctx.clone())
            .data(schema_id);
        let response = schema.execute_batch(batch).await;

        if let Err(err) = self.plugins.on_response(&ctx, &response).await {
            warn!(request_id = %ctx.request_id, error = %err, "on_response hook failed");
        }
        debug!(
            request_id = %ctx.request_id,
            elapsed_ms = ctx.elapsed().as_millis() as u64,
            "request completed"
        );
        response
    }

    /// Convert to Axum router
    pub fn into_router(self) -> Router {
        let metrics_enabled = self.metrics_enabled;
        let state = Arc::new(self);

        let mut router = Router::new()
            .route("/graphql", post(handle_graphql_post).get(graphql_playground))
            .route("/graphql/ws", get(handle_graphql_ws));

        // Add metrics route if enabled
        if metrics_enabled {
            router = router.route("/metrics", get(metrics_handler));
        }

        router.with_state(state)
    }
}

/// Handler for POST requests to /graphql
async fn handle_graphql_post(
    State(mux): State<Arc<ServeMux>>,
    headers: HeaderMap,
    request: GraphQLBatchRequest,
) -> GraphQLResponse {
    mux.handle_http(headers, request.into_inner()).await.into()
}

/// Subscriptions over WebSocket. Streamed results are never usage-reported.
async fn handle_graphql_ws(
    State(mux): State<Arc<ServeMux>>,
    protocol: GraphQLProtocol,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    let schema = mux.schema();
    upgrade
        .protocols(async_graphql::http::ALL_WEBSOCKET_PROTOCOLS)
        .on_upgrade(move |stream| GraphQLWebSocket::new(stream, schema, protocol).serve())
}

/// Serve the GraphQL Playground UI for ad-hoc exploration.
async fn graphql_playground() -> impl IntoResponse {
    Html(async_graphql::http::playground_source(
        async_graphql::http::GraphQLPlaygroundConfig::new("/graphql")
            .subscription_endpoint("/graphql/ws"),
    ))
}

/// Handler for Prometheus metrics endpoint
async fn metrics_handler() -> impl IntoResponse {
    let body = PluginMetrics::global().render();
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
}
