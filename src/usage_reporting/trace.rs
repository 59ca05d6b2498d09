//! Per-operation trace recording and per-request buffering.

use super::proto::{trace, Trace};
use axum::http::HeaderMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

/// Client identity taken from request headers and merged into every trace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

impl ClientInfo {
    pub fn from_headers(headers: &HeaderMap, name_header: &str, version_header: &str) -> Self {
        let value = |header: &str| {
            headers
                .get(header)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
        };
        Self {
            name: value(name_header),
            version: value(version_header),
        }
    }

    /// Fill the trace's client fields from this client info.
    pub fn apply(&self, trace: &mut Trace) {
        if let Some(name) = &self.name {
            trace.client_name = name.clone();
        }
        if let Some(version) = &self.version {
            trace.client_version = version.clone();
        }
    }
}

/// Segment of a response path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum PathSegment {
    Field(String),
    Index(u32),
}

/// Timing and typing data of one resolved field.
#[derive(Debug, Clone, Default)]
pub struct FieldRecord {
    pub field_name: String,
    pub parent_type: String,
    pub return_type: String,
    pub start_ns: u64,
    pub end_ns: u64,
    pub errors: Vec<trace::Error>,
}

/// Builds the trace of a single operation execution.
#[derive(Debug)]
pub struct TraceBuilder {
    start_wall: SystemTime,
    start: Instant,
    end_wall: Option<SystemTime>,
    duration_ns: u64,
    operation_type: String,
    fields: BTreeMap<Vec<PathSegment>, FieldRecord>,
    root_errors: Vec<trace::Error>,
}

impl TraceBuilder {
    pub fn start() -> Self {
        Self {
            start_wall: SystemTime::now(),
            start: Instant::now(),
            end_wall: None,
            duration_ns: 0,
            operation_type: String::new(),
            fields: BTreeMap::new(),
            root_errors: Vec::new(),
        }
    }

    /// Nanoseconds since the operation started.
    pub fn offset_ns(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    pub fn set_operation_type(&mut self, operation_type: impl Into<String>) {
        self.operation_type = operation_type.into();
    }

    pub fn record_field(&mut self, path: Vec<PathSegment>, record: FieldRecord) {
        if path.is_empty() {
            return;
        }
        self.fields.insert(path, record);
    }

    pub fn record_root_error(&mut self, error: trace::Error) {
        self.root_errors.push(error);
    }

    pub fn finish(&mut self) {
        if self.end_wall.is_none() {
            self.duration_ns = self.offset_ns();
            self.end_wall = Some(SystemTime::now());
        }
    }

    pub fn into_trace(mut self) -> Trace {
        self.finish();
        let entries: Vec<_> = self
            .fields
            .iter()
            .map(|(path, record)| (path.as_slice(), record))
            .collect();
        let mut root = trace::Node {
            child: build_children(&entries, 0),
            ..Default::default()
        };
        root.error = std::mem::take(&mut self.root_errors);

        Trace {
            start_time: Some(self.start_wall.into()),
            end_time: self.end_wall.map(Into::into),
            duration_ns: self.duration_ns,
            root: Some(root),
            operation_type: self.operation_type,
            ..Default::default()
        }
    }
}

/// Turn sorted `(path, record)` entries that agree on their first `depth`
/// segments into the nodes at that depth. Paths sort before their extensions,
/// so each child is one contiguous run headed by its own record, if any.
fn build_children(entries: &[(&[PathSegment], &FieldRecord)], depth: usize) -> Vec<trace::Node> {
    let mut nodes = Vec::new();
    let mut rest = entries;
    while let Some((path, _)) = rest.first() {
        let segment = &path[depth];
        let end = rest
            .iter()
            .position(|(p, _)| &p[depth] != segment)
            .unwrap_or(rest.len());
        let (group, tail) = rest.split_at(end);
        rest = tail;

        let (mut node, descendants) = match group.split_first() {
            Some(((p, record), more)) if p.len() == depth + 1 => (field_node(segment, record), more),
            _ => (
                trace::Node {
                    id: Some(segment_id(segment)),
                    ..Default::default()
                },
                group,
            ),
        };
        node.child = build_children(descendants, depth + 1);
        nodes.push(node);
    }
    nodes
}

fn segment_id(segment: &PathSegment) -> trace::node::Id {
    match segment {
        PathSegment::Field(name) => trace::node::Id::ResponseName(name.clone()),
        PathSegment::Index(i) => trace::node::Id::Index(*i),
    }
}

fn field_node(segment: &PathSegment, record: &FieldRecord) -> trace::Node {
    let original_field_name = match segment {
        PathSegment::Field(response_name) if *response_name != record.field_name => {
            record.field_name.clone()
        }
        _ => String::new(),
    };
    trace::Node {
        id: Some(segment_id(segment)),
        r#type: record.return_type.clone(),
        parent_type: record.parent_type.clone(),
        original_field_name,
        start_time: record.start_ns,
        end_time: record.end_ns,
        error: record.errors.clone(),
        child: Vec::new(),
    }
}

/// A finished trace bucketed by operation key and schema id.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationTrace {
    pub key: String,
    pub schema_id: String,
    pub trace: Trace,
}

#[derive(Debug, Default)]
struct CollectorState {
    traces: Vec<OperationTrace>,
    client: ClientInfo,
    streamed: bool,
    claimed: bool,
}

/// Trace buffer of one in-flight request, shared by all its operations.
#[derive(Debug, Clone, Default)]
pub struct TraceCollector {
    state: Arc<Mutex<CollectorState>>,
}

impl TraceCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the buffer as owned by a plugin that reports it when the
    /// request completes. Unclaimed buffers are never written to.
    pub fn claim(&self) {
        self.state.lock().claimed = true;
    }

    pub fn is_claimed(&self) -> bool {
        self.state.lock().claimed
    }

    pub fn push(&self, trace: OperationTrace) {
        self.state.lock().traces.push(trace);
    }

    pub fn set_client_info(&self, client: ClientInfo) {
        self.state.lock().client = client;
    }

    pub fn client_info(&self) -> ClientInfo {
        self.state.lock().client.clone()
    }

    /// Mark the request as delivering its result incrementally.
    pub fn mark_streamed(&self) {
        self.state.lock().streamed = true;
    }

    pub fn is_streamed(&self) -> bool {
        self.state.lock().streamed
    }

    pub fn len(&self) -> usize {
        self.state.lock().traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain the buffered traces.
    pub fn take(&self) -> Vec<OperationTrace> {
        std::mem::take(&mut self.state.lock().traces)
    }
}
