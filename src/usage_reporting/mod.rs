//! Usage reporting plugin.
//!
//! Records a trace for every executed GraphQL operation, buffers the traces
//! of a request, and once the request completes sends them to the usage
//! ingestion service: one protobuf-encoded report per distinct schema id,
//! transmitted in the background so responses are never held up.
//!
//! # Example
//!
//! ```rust,no_run
//! use async_graphql::dynamic::{Field, FieldFuture, Object, Schema, TypeRef};
//! use async_graphql::Value;
//! use graphql_plugin_kit::{UsageReporting, UsageReportingConfig};
//!
//! # fn example() -> graphql_plugin_kit::Result<()> {
//! // Fails fast when APOLLO_KEY / APOLLO_GRAPH_REF are missing
//! let usage = UsageReporting::new(UsageReportingConfig::new())?;
//!
//! let query = Object::new("Query").field(Field::new("hello", TypeRef::named(TypeRef::STRING), |_| {
//!     FieldFuture::new(async { Ok(Some(Value::from("world"))) })
//! }));
//! let schema = Schema::build("Query", None, None)
//!     .register(query)
//!     .extension(usage.clone())
//!     .finish()
//!     .map_err(|e| graphql_plugin_kit::Error::Schema(e.to_string()))?;
//! usage.set_schema(&schema.sdl());
//! # Ok(())
//! # }
//! ```

mod config;
mod extension;
pub mod proto;
mod report;
mod signature;
mod trace;
mod transport;

pub use config::{
    ResolvedConfig, UsageReportingConfig, API_KEY_ENV, DEFAULT_CLIENT_NAME_HEADER,
    DEFAULT_CLIENT_VERSION_HEADER, DEFAULT_ENDPOINT, GRAPH_REF_ENV,
};
pub use report::{base_header, build_report, group_by_schema, schema_id, SchemaId};
pub use signature::{operation_key, operation_name_from_source, strip_whitespace};
pub use trace::{
    ClientInfo, FieldRecord, OperationTrace, PathSegment, TraceBuilder, TraceCollector,
};
pub use transport::{HttpTransport, ReportTransport};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::metrics::PluginMetrics;
use crate::plugin::Plugin;
use async_graphql::extensions::{Extension, ExtensionFactory};
use async_graphql::{BatchRequest, BatchResponse};
use axum::http::HeaderMap;
use parking_lot::{Mutex, RwLock};
use proto::ReportHeader;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

struct Inner {
    config: ResolvedConfig,
    header: ReportHeader,
    schema_id: RwLock<Option<String>>,
    transport: Arc<dyn ReportTransport>,
    in_flight: Mutex<JoinSet<()>>,
}

/// The usage reporting plugin. Cheap to clone; clones share state.
///
/// Register it on a schema as an extension (it implements
/// [`ExtensionFactory`]) and, when serving through
/// [`ServeMux`](crate::runtime::ServeMux), as a [`Plugin`].
#[derive(Clone)]
pub struct UsageReporting {
    inner: Arc<Inner>,
}

impl UsageReporting {
    /// Resolve the configuration against the environment and build the HTTP
    /// transport. Fails if the API key or graph reference is missing.
    pub fn new(config: UsageReportingConfig) -> Result<Self> {
        let config = config.resolve()?;
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_transport(config, transport))
    }

    /// Build the plugin around a custom transport.
    pub fn with_transport<T: ReportTransport>(config: ResolvedConfig, transport: T) -> Self {
        info!(
            graph_ref = %config.graph_ref,
            endpoint = %config.endpoint,
            "usage reporting enabled"
        );
        Self {
            inner: Arc::new(Inner {
                header: base_header(&config.graph_ref),
                config,
                schema_id: RwLock::new(None),
                transport: Arc::new(transport),
                in_flight: Mutex::new(JoinSet::new()),
            }),
        }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.inner.config
    }

    /// Record a (re)compiled schema. Returns its schema id.
    pub fn set_schema(&self, sdl: &str) -> String {
        let id = schema_id(sdl);
        debug!(schema_id = %id, "schema changed");
        *self.inner.schema_id.write() = Some(id.clone());
        id
    }

    pub fn schema_id(&self) -> Option<String> {
        self.inner.schema_id.read().clone()
    }

    /// Client name/version taken from the configured request headers.
    pub fn client_info(&self, headers: &HeaderMap) -> ClientInfo {
        ClientInfo::from_headers(
            headers,
            &self.inner.config.client_name_header,
            &self.inner.config.client_version_header,
        )
    }

    /// Report everything a completed request buffered. Streamed requests
    /// are skipped.
    pub fn report_request(&self, collector: &TraceCollector) {
        if collector.is_streamed() {
            debug!("streamed result; skipping usage reporting");
            collector.take();
            return;
        }
        let traces = collector.take();
        self.dispatch(traces, &collector.client_info());
    }

    /// Group `traces` by schema id and send one report per group in the
    /// background. Failures are logged, never retried.
    pub fn dispatch(&self, traces: Vec<OperationTrace>, client: &ClientInfo) {
        if traces.is_empty() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            error!(
                count = traces.len(),
                "no async runtime available; usage traces dropped"
            );
            return;
        };

        let mut in_flight = self.inner.in_flight.lock();
        // Reap finished sends
        while in_flight.try_join_next().is_some() {}

        for (schema_id, ops) in group_by_schema(traces, client) {
            let report = build_report(&self.inner.header, &schema_id, ops);
            let transport = self.inner.transport.clone();
            in_flight.spawn_on(
                async move {
                    let started = Instant::now();
                    let operations = report.operation_count;
                    match transport.send(report).await {
                        Ok(()) => {
                            PluginMetrics::global()
                                .record_report_sent(started.elapsed().as_secs_f64());
                            debug!(schema_id = %schema_id, operations, "usage report sent");
                        }
                        Err(e) => {
                            PluginMetrics::global()
                                .record_report_failed(started.elapsed().as_secs_f64());
                            error!(schema_id = %schema_id, error = %e, "failed to send usage report");
                        }
                    }
                },
                &handle,
            );
        }
    }

    /// Number of report sends not yet completed or reaped.
    pub fn pending(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// Wait for every in-flight report send.
    pub async fn flush(&self) {
        let mut in_flight = std::mem::take(&mut *self.inner.in_flight.lock());
        while let Some(result) = in_flight.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "usage report task aborted");
            }
        }
    }

    /// [`UsageReporting::flush`] bounded by `timeout`. Returns whether every
    /// send completed in time.
    pub async fn flush_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.flush()).await.is_ok()
    }
}

impl ExtensionFactory for UsageReporting {
    fn create(&self) -> Arc<dyn Extension> {
        Arc::new(extension::UsageExtension::new(self.clone()))
    }
}

#[async_trait::async_trait]
impl Plugin for UsageReporting {
    type Error = Error;

    fn name(&self) -> &str {
        "usage-reporting"
    }

    async fn on_schema_change(&self, sdl: &str) -> Result<()> {
        self.set_schema(sdl);
        Ok(())
    }

    async fn on_request(&self, ctx: &Context, _req: &BatchRequest) -> Result<()> {
        ctx.traces.claim();
        ctx.traces.set_client_info(self.client_info(&ctx.headers));
        Ok(())
    }

    async fn on_response(&self, ctx: &Context, _res: &BatchResponse) -> Result<()> {
        self.report_request(&ctx.traces);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proto::Report;
    use tokio::sync::mpsc;

    struct ChannelTransport(mpsc::UnboundedSender<Report>);

    #[async_trait::async_trait]
    impl ReportTransport for ChannelTransport {
        async fn send(&self, report: Report) -> Result<()> {
            let _ = self.0.send(report);
            Ok(())
        }
    }

    struct FailingTransport;

    #[async_trait::async_trait]
    impl ReportTransport for FailingTransport {
        async fn send(&self, _report: Report) -> Result<()> {
            Err(Error::ReportRejected {
                status: 503,
                body: "unavailable".into(),
            })
        }
    }

    fn config() -> ResolvedConfig {
        UsageReportingConfig::new()
            .api_key("key")
            .graph_ref("graph@current")
            .resolve_with(|_| None)
            .unwrap()
    }

    fn op(schema_id: &str) -> OperationTrace {
        OperationTrace {
            key: "# -\n{a}".into(),
            schema_id: schema_id.into(),
            trace: proto::Trace::default(),
        }
    }

    #[test]
    fn test_new_fails_without_configuration() {
        let result = UsageReportingConfig::new().resolve_with(|_| None);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_set_schema_updates_id() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let usage = UsageReporting::with_transport(config(), ChannelTransport(tx));
        assert_eq!(usage.schema_id(), None);

        let first = usage.set_schema("type Query { a: Int }");
        let second = usage.set_schema("type Query { b: Int }");
        assert_ne!(first, second);
        assert_eq!(usage.schema_id(), Some(second));
    }

    #[tokio::test]
    async fn test_one_send_per_schema_id() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let usage = UsageReporting::with_transport(config(), ChannelTransport(tx));

        usage.dispatch(vec![op("s1"), op("s1"), op("s2")], &ClientInfo::default());
        usage.flush().await;

        let mut reports = Vec::new();
        while let Ok(report) = rx.try_recv() {
            reports.push(report);
        }
        assert_eq!(reports.len(), 2);
        let mut counts: Vec<u64> = reports.iter().map(|r| r.operation_count).collect();
        counts.sort();
        assert_eq!(counts, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_streamed_request_is_skipped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let usage = UsageReporting::with_transport(config(), ChannelTransport(tx));

        let collector = TraceCollector::new();
        collector.push(op("s1"));
        collector.mark_streamed();
        usage.report_request(&collector);
        usage.flush().await;

        assert!(rx.try_recv().is_err());
        assert!(collector.is_empty());
    }

    #[tokio::test]
    async fn test_failed_send_is_logged_not_propagated() {
        let usage = UsageReporting::with_transport(config(), FailingTransport);
        let failed = PluginMetrics::global().reports_failed();

        usage.dispatch(vec![op("s1")], &ClientInfo::default());
        assert!(usage.flush_timeout(Duration::from_secs(5)).await);

        assert!(PluginMetrics::global().reports_failed() > failed);
        assert_eq!(usage.pending(), 0);
    }

    #[test]
    fn test_dispatch_without_runtime_drops_traces() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let usage = UsageReporting::with_transport(config(), ChannelTransport(tx));
        usage.dispatch(vec![op("s1")], &ClientInfo::default());
        assert!(rx.try_recv().is_err());
    }
}
