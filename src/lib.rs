//! # graphql-plugin-kit
//!
//! Plugins for async-graphql servers running as several processes.
//!
//! ## Features
//!
//! - **Pub/Sub bridge**: [`EventTarget`] carries subscription events between
//!   processes over any publish/subscribe channel provider
//! - **Usage reporting**: [`UsageReporting`] records a trace per operation and
//!   ships protobuf usage reports, one per schema id, in the background
//! - **Serving**: [`ServeMux`] runs plugin hooks around batched HTTP requests
//!   and serves subscriptions over WebSocket
//! - **Graceful shutdown**: pending reports are flushed before exit
//!
//! ## Example
//!
//! ```rust,no_run
//! use async_graphql::dynamic::{Field, FieldFuture, Object, Schema, TypeRef};
//! use async_graphql::Value;
//! use graphql_plugin_kit::{PluginRegistry, ServeMux, UsageReporting, UsageReportingConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let usage = UsageReporting::new(UsageReportingConfig::new())?;
//!
//!     let query = Object::new("Query").field(Field::new(
//!         "hello",
//!         TypeRef::named_nn(TypeRef::STRING),
//!         |_| FieldFuture::new(async { Ok(Some(Value::from("world"))) }),
//!     ));
//!     let schema = Schema::build("Query", None, None)
//!         .register(query)
//!         .extension(usage.clone())
//!         .finish()?;
//!
//!     let mux = ServeMux::new(schema, PluginRegistry::new().with(usage)).await?;
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:4000").await?;
//!     axum::serve(listener, mux.into_router()).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod error;
pub mod metrics;
pub mod plugin;
pub mod pubsub;
pub mod runtime;
pub mod shutdown;
pub mod usage_reporting;

pub use context::Context;
pub use error::{Error, GraphQLError, Result};
pub use metrics::PluginMetrics;
pub use plugin::{Plugin, PluginRegistry};
pub use pubsub::{
    EventStream, EventTarget, Listener, MemoryBroker, MemoryConnection, PubSub, PubSubEvent,
    PublishClient, SubscribeClient,
};
pub use runtime::ServeMux;
pub use shutdown::{
    run_with_graceful_shutdown, signal_shutdown, ShutdownConfig, ShutdownCoordinator,
    ShutdownState,
};
pub use usage_reporting::{
    ClientInfo, HttpTransport, OperationTrace, ReportTransport, SchemaId, TraceCollector,
    UsageReporting, UsageReportingConfig,
};
