//! Arrow Flight server
//!
//! Ticketed table reads, streamed batch ingest and CloudQuery write actions,
//! all delegated to a pluggable backend.
//!
//! # Layout
//!
//! ```text
//! server.rs   FlightService impl + serve()
//!   ├── auth.rs     handshake secret → session token, per-call check
//!   ├── tickets.rs  GetFlightInfo ticket → table name, 5 min TTL
//!   ├── streams.rs  DoGet encode pipeline, DoPut decode pipeline
//!   └── actions.rs  DoAction routing, protobuf + IPC payload decoding
//! backend.rs  FlightBackend / WriteBackend capability traits
//! proto.rs    plugin v3 write messages
//! ```

mod actions;
mod auth;
mod backend;
pub mod proto;
mod server;
mod streams;
mod tickets;

pub use actions::{
    decode_write_intent, ActionDispatcher, ActionKind, DeleteRecord, DeleteStale, GroupingType,
    MigrateTable, Predicate, PredicateGroup, PredicateOperator, TableRelation, WriteIntent,
    ACTION_ACK, TABLE_NAME_METADATA,
};
pub use auth::{AuthGate, AUTHORIZATION_HEADER, AUTH_HEADER};
pub use backend::{
    BackendError, BatchSink, FlightBackend, Handler, NoopBackend, Table, WriteBackend,
};
pub use server::{serve, serve_with_listener, FlightGateway};
pub use streams::{
    ingest_stream, is_transient, stream_table, table_descriptor, PutSummary, PATH_PREFIX,
};
pub use tickets::TicketCache;
