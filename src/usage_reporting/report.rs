//! Schema ids and report assembly.

use super::proto::{Report, ReportHeader, TracesAndStats};
use super::trace::{ClientInfo, OperationTrace};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::SystemTime;

/// Stable id of a schema: hex SHA-256 of its printed form.
pub fn schema_id(sdl: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sdl.as_bytes());
    hex::encode(hasher.finalize())
}

/// Schema id of the schema a request executes against, attached to the
/// request by the server so a concurrent schema swap cannot relabel it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemaId(String);

impl SchemaId {
    pub fn of(sdl: &str) -> Self {
        Self(schema_id(sdl))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Header fields shared by every report this process sends.
pub fn base_header(graph_ref: &str) -> ReportHeader {
    ReportHeader {
        hostname: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
        agent_version: concat!(env!("CARGO_PKG_NAME"), "@", env!("CARGO_PKG_VERSION")).to_string(),
        runtime_version: "rust".to_string(),
        uname: format!("{}, {}", std::env::consts::OS, std::env::consts::ARCH),
        executable_schema_id: String::new(),
        graph_ref: graph_ref.to_string(),
    }
}

/// Group traces by schema id, merging the client info into each trace.
pub fn group_by_schema(
    traces: Vec<OperationTrace>,
    client: &ClientInfo,
) -> BTreeMap<String, Vec<OperationTrace>> {
    let mut groups: BTreeMap<String, Vec<OperationTrace>> = BTreeMap::new();
    for mut op in traces {
        client.apply(&mut op.trace);
        groups.entry(op.schema_id.clone()).or_default().push(op);
    }
    groups
}

/// Build the report for one schema id.
pub fn build_report(header: &ReportHeader, schema_id: &str, traces: Vec<OperationTrace>) -> Report {
    let mut report = Report {
        header: Some(ReportHeader {
            executable_schema_id: schema_id.to_string(),
            ..header.clone()
        }),
        end_time: Some(SystemTime::now().into()),
        operation_count: traces.len() as u64,
        ..Default::default()
    };
    for op in traces {
        report
            .traces_per_query
            .entry(op.key)
            .or_insert_with(TracesAndStats::default)
            .trace
            .push(op.trace);
    }
    report
}
