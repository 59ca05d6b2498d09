//! Protobuf messages of the usage report ingestion format.
//!
//! Only the subset of the format this crate populates is declared; tags
//! match the ingestion schema so unknown fields stay wire compatible.

use std::collections::HashMap;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Report {
    #[prost(message, optional, tag = "1")]
    pub header: Option<ReportHeader>,
    #[prost(message, optional, tag = "2")]
    pub end_time: Option<::prost_types::Timestamp>,
    #[prost(map = "string, message", tag = "5")]
    pub traces_per_query: HashMap<String, TracesAndStats>,
    #[prost(uint64, tag = "6")]
    pub operation_count: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReportHeader {
    #[prost(string, tag = "5")]
    pub hostname: String,
    #[prost(string, tag = "6")]
    pub agent_version: String,
    #[prost(string, tag = "8")]
    pub runtime_version: String,
    #[prost(string, tag = "9")]
    pub uname: String,
    #[prost(string, tag = "11")]
    pub executable_schema_id: String,
    #[prost(string, tag = "12")]
    pub graph_ref: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TracesAndStats {
    #[prost(message, repeated, tag = "1")]
    pub trace: Vec<Trace>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Trace {
    #[prost(message, optional, tag = "3")]
    pub end_time: Option<::prost_types::Timestamp>,
    #[prost(message, optional, tag = "4")]
    pub start_time: Option<::prost_types::Timestamp>,
    #[prost(string, tag = "7")]
    pub client_name: String,
    #[prost(string, tag = "8")]
    pub client_version: String,
    #[prost(uint64, tag = "11")]
    pub duration_ns: u64,
    #[prost(message, optional, tag = "14")]
    pub root: Option<trace::Node>,
    #[prost(string, tag = "35")]
    pub operation_type: String,
}

pub mod trace {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Location {
        #[prost(uint32, tag = "1")]
        pub line: u32,
        #[prost(uint32, tag = "2")]
        pub column: u32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Error {
        #[prost(string, tag = "1")]
        pub message: String,
        #[prost(message, repeated, tag = "2")]
        pub location: Vec<Location>,
        #[prost(string, tag = "4")]
        pub json: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Node {
        #[prost(oneof = "node::Id", tags = "1, 2")]
        pub id: Option<node::Id>,
        #[prost(string, tag = "3")]
        pub r#type: String,
        #[prost(uint64, tag = "8")]
        pub start_time: u64,
        #[prost(uint64, tag = "9")]
        pub end_time: u64,
        #[prost(message, repeated, tag = "11")]
        pub error: Vec<Error>,
        #[prost(message, repeated, tag = "12")]
        pub child: Vec<Node>,
        #[prost(string, tag = "13")]
        pub parent_type: String,
        #[prost(string, tag = "14")]
        pub original_field_name: String,
    }

    pub mod node {
        #[derive(Clone, PartialEq, Eq, ::prost::Oneof)]
        pub enum Id {
            #[prost(string, tag = "1")]
            ResponseName(String),
            #[prost(uint32, tag = "2")]
            Index(u32),
        }
    }
}
