//! async-graphql extension recording one trace per executed operation.

use super::proto::trace;
use super::report::SchemaId;
use super::signature::{operation_key, operation_name_from_source};
use super::trace::{ClientInfo, FieldRecord, OperationTrace, PathSegment, TraceBuilder, TraceCollector};
use super::UsageReporting;
use crate::metrics::PluginMetrics;
use async_graphql::extensions::{
    Extension, ExtensionContext, NextExecute, NextParseQuery, NextRequest, NextResolve,
    NextSubscribe, ResolveInfo,
};
use async_graphql::parser::types::{DocumentOperations, ExecutableDocument, OperationType};
use async_graphql::{QueryPathNode, QueryPathSegment, Response, ServerError, ServerResult, Value, Variables};
use futures::stream::BoxStream;
use parking_lot::Mutex;
use tracing::debug;

#[derive(Default)]
struct RequestState {
    query: Option<String>,
    schema_id: Option<String>,
    /// Operations declared by the parsed document: (name, type)
    operations: Vec<(Option<String>, &'static str)>,
    operation_name: Option<String>,
    builder: Option<TraceBuilder>,
    streamed: bool,
    /// Request-scoped data, only visible from `parse_query` onwards
    collector: Option<TraceCollector>,
    client: Option<ClientInfo>,
}

pub(crate) struct UsageExtension {
    reporting: UsageReporting,
    state: Mutex<RequestState>,
}

impl UsageExtension {
    pub(crate) fn new(reporting: UsageReporting) -> Self {
        Self {
            reporting,
            state: Mutex::new(RequestState::default()),
        }
    }

    fn complete(&self, response: &Response) {
        let (query, schema_id, operation_name, mut builder, collector, client) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.streamed {
                debug!("streamed result; skipping usage reporting");
                return;
            }
            let Some(query) = state.query.take() else {
                debug!("no trace context for operation; not recorded");
                return;
            };
            let Some(schema_id) = state.schema_id.take() else {
                debug!("no schema id known yet; operation not recorded");
                return;
            };
            (
                query,
                schema_id,
                state.operation_name.take(),
                state.builder.take().unwrap_or_else(TraceBuilder::start),
                state.collector.take(),
                state.client.take().unwrap_or_default(),
            )
        };

        for error in response.errors.iter().filter(|e| e.path.is_empty()) {
            builder.record_root_error(trace_error(error));
        }

        let operation_name = operation_name.or_else(|| operation_name_from_source(&query));
        let op = OperationTrace {
            key: operation_key(operation_name.as_deref(), &query),
            schema_id,
            trace: builder.into_trace(),
        };
        PluginMetrics::global().traces_recorded.inc();

        match collector {
            Some(collector) => collector.push(op),
            None => self.reporting.dispatch(vec![op], &client),
        }
    }
}

#[async_trait::async_trait]
impl Extension for UsageExtension {
    async fn request(&self, ctx: &ExtensionContext<'_>, next: NextRequest<'_>) -> Response {
        self.state.lock().builder.get_or_insert_with(TraceBuilder::start);
        let response = next.run(ctx).await;
        self.complete(&response);
        response
    }

    fn subscribe<'s>(
        &self,
        ctx: &ExtensionContext<'_>,
        stream: BoxStream<'s, Response>,
        next: NextSubscribe<'_>,
    ) -> BoxStream<'s, Response> {
        self.state.lock().streamed = true;
        if let Some(collector) = ctx.data_opt::<TraceCollector>() {
            collector.mark_streamed();
        }
        next.run(ctx, stream)
    }

    async fn parse_query(
        &self,
        ctx: &ExtensionContext<'_>,
        query: &str,
        variables: &Variables,
        next: NextParseQuery<'_>,
    ) -> ServerResult<ExecutableDocument> {
        let document = next.run(ctx, query, variables).await?;
        let operations = match &document.operations {
            DocumentOperations::Single(op) => vec![(None, operation_type_name(op.node.ty))],
            DocumentOperations::Multiple(ops) => ops
                .iter()
                .map(|(name, op)| (Some(name.to_string()), operation_type_name(op.node.ty)))
                .collect(),
        };
        let schema_id = ctx
            .data_opt::<SchemaId>()
            .map(|id| id.as_str().to_string())
            .or_else(|| self.reporting.schema_id());
        // Only a buffer some plugin will drain; otherwise report on completion
        let collector = ctx
            .data_opt::<TraceCollector>()
            .filter(|c| c.is_claimed())
            .cloned();

        let mut state = self.state.lock();
        if state.streamed {
            if let Some(collector) = &collector {
                collector.mark_streamed();
            }
        }
        state.query = Some(query.to_string());
        state.schema_id = schema_id;
        state.operations = operations;
        state.collector = collector;
        state.client = ctx.data_opt::<ClientInfo>().cloned();
        Ok(document)
    }

    async fn execute(
        &self,
        ctx: &ExtensionContext<'_>,
        operation_name: Option<&str>,
        next: NextExecute<'_>,
    ) -> Response {
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            match state.query.as_deref() {
                None => debug!("no trace context for operation; not recorded"),
                Some(query) => {
                    state.operation_name = operation_name
                        .map(String::from)
                        .or_else(|| operation_name_from_source(query));
                    let operation_type = state
                        .operations
                        .iter()
                        .find(|(name, _)| name.is_some() && name.as_deref() == operation_name)
                        .or_else(|| state.operations.first())
                        .map_or("query", |(_, ty)| *ty);
                    state
                        .builder
                        .get_or_insert_with(TraceBuilder::start)
                        .set_operation_type(operation_type);
                }
            }
        }
        next.run(ctx, operation_name).await
    }

    async fn resolve(
        &self,
        ctx: &ExtensionContext<'_>,
        info: ResolveInfo<'_>,
        next: NextResolve<'_>,
    ) -> ServerResult<Option<Value>> {
        if info.is_for_introspection {
            return next.run(ctx, info).await;
        }
        let start_ns = self.state.lock().builder.as_ref().map(TraceBuilder::offset_ns);
        let Some(start_ns) = start_ns else {
            return next.run(ctx, info).await;
        };

        let path = response_path(info.path_node);
        let mut record = FieldRecord {
            field_name: info.name.to_string(),
            parent_type: info.parent_type.to_string(),
            return_type: info.return_type.to_string(),
            start_ns,
            ..Default::default()
        };

        let result = next.run(ctx, info).await;

        if let Err(error) = &result {
            record.errors.push(trace_error(error));
        }
        if let Some(builder) = self.state.lock().builder.as_mut() {
            record.end_ns = builder.offset_ns();
            builder.record_field(path, record);
        }
        result
    }
}

fn operation_type_name(ty: OperationType) -> &'static str {
    match ty {
        OperationType::Query => "query",
        OperationType::Mutation => "mutation",
        OperationType::Subscription => "subscription",
    }
}

fn response_path(node: &QueryPathNode<'_>) -> Vec<PathSegment> {
    let mut path = Vec::new();
    let mut current = Some(node);
    while let Some(node) = current {
        path.push(match &node.segment {
            QueryPathSegment::Index(i) => PathSegment::Index(u32::try_from(*i).unwrap_or(u32::MAX)),
            QueryPathSegment::Name(name) => PathSegment::Field(name.to_string()),
        });
        current = node.parent;
    }
    path.reverse();
    path
}

fn trace_error(error: &ServerError) -> trace::Error {
    trace::Error {
        message: error.message.clone(),
        location: error
            .locations
            .iter()
            .map(|pos| trace::Location {
                line: u32::try_from(pos.line).unwrap_or(u32::MAX),
                column: u32::try_from(pos.column).unwrap_or(u32::MAX),
            })
            .collect(),
        json: serde_json::to_string(error).unwrap_or_default(),
    }
}
