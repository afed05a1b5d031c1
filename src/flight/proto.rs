//! CloudQuery plugin v3 write messages
//!
//! DoAction bodies are protobuf encodings of the `Write.Message*` types from
//! `cloudquery/plugin/v3/plugin.proto`. Only the three messages the server
//! routes are declared here. Schemas and predicate values are nested Arrow
//! IPC streams carried as opaque bytes.

use prost::bytes::Bytes;

/// `Write.MessageMigrateTable`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MessageMigrateTable {
    /// Arrow IPC stream holding the table schema
    #[prost(bytes = "bytes", tag = "1")]
    pub table: Bytes,
    #[prost(bool, tag = "2")]
    pub migrate_force: bool,
}

/// `Write.MessageDeleteStale`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MessageDeleteStale {
    #[prost(string, tag = "2")]
    pub source_name: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "3")]
    pub sync_time: ::core::option::Option<::prost_types::Timestamp>,
    #[prost(string, tag = "4")]
    pub table_name: ::prost::alloc::string::String,
}

/// `Write.MessageDeleteRecord`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MessageDeleteRecord {
    #[prost(string, tag = "1")]
    pub table_name: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "2")]
    pub where_clause: ::prost::alloc::vec::Vec<PredicatesGroup>,
    #[prost(message, repeated, tag = "3")]
    pub table_relations: ::prost::alloc::vec::Vec<TableRelation>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TableRelation {
    #[prost(string, tag = "1")]
    pub table_name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub parent_table: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Predicate {
    #[prost(enumeration = "predicate::Operator", tag = "1")]
    pub operator: i32,
    #[prost(string, tag = "2")]
    pub column: ::prost::alloc::string::String,
    /// Arrow IPC stream holding a single-row comparison record
    #[prost(bytes = "bytes", tag = "3")]
    pub record: Bytes,
}

pub mod predicate {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Operator {
        Eq = 0,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PredicatesGroup {
    #[prost(enumeration = "predicates_group::GroupingType", tag = "1")]
    pub grouping_type: i32,
    #[prost(message, repeated, tag = "2")]
    pub predicates: ::prost::alloc::vec::Vec<Predicate>,
}

pub mod predicates_group {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum GroupingType {
        And = 0,
        Or = 1,
    }
}
