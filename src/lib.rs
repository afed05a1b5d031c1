//! # Flight Gateway
//!
//! Arrow Flight server that moves columnar data between clients and a
//! pluggable storage backend.
//!
//! ## Quick Start
//! ```rust,ignore
//! use flight_gateway::{serve, Handler, NoopBackend, ServerConfig};
//!
//! let config = ServerConfig::from_env();
//! let shutdown = async { tokio::signal::ctrl_c().await.ok(); };
//! serve(config, Handler::new(NoopBackend, NoopBackend), shutdown).await?;
//! ```
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Flight client                            │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │  Arrow Flight (gRPC)
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  AuthGate        handshake → session token, checked per call    │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  GetFlightInfo   path → TicketCache::issue → one endpoint       │
//! │  DoGet           ticket → table → backend batches → wire        │
//! │  DoPut           wire batches → backend ingest → acks           │
//! │  DoAction        MigrateTable | DeleteRecord | DeleteStale      │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//!                  FlightBackend + WriteBackend
//! ```

pub mod config;
pub mod flight;

pub use crate::config::ServerConfig;
pub use crate::flight::{
    serve, serve_with_listener, ActionDispatcher, ActionKind, AuthGate, BackendError, BatchSink,
    FlightBackend, FlightGateway, Handler, NoopBackend, Table, TicketCache, WriteBackend,
    WriteIntent,
};

// === Error types ===

/// Crate-level error type
///
/// Every variant maps onto a gRPC status code, see the `From<Error> for Status`
/// impl below.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid ticket: {0}")]
    InvalidTicket(String),

    #[error("table not found: {table}: {reason}")]
    TableNotFound { table: String, reason: String },

    #[error("invalid path: expected 3 segments (ns/ns/table), got {0}")]
    InvalidPath(usize),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("invalid {action} payload: {reason}")]
    InvalidPayload {
        action: &'static str,
        reason: String,
    },

    #[error("failed to {operation}: {source}")]
    Backend {
        operation: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),
}

impl From<Error> for tonic::Status {
    fn from(e: Error) -> Self {
        let message = e.to_string();
        match e {
            Error::Unauthenticated(_) => tonic::Status::unauthenticated(message),
            Error::PermissionDenied(_) => tonic::Status::permission_denied(message),
            Error::FailedPrecondition(_) => tonic::Status::failed_precondition(message),
            Error::InvalidArgument(_)
            | Error::InvalidPath(_)
            | Error::UnknownAction(_)
            | Error::InvalidPayload { .. } => tonic::Status::invalid_argument(message),
            Error::InvalidTicket(_) | Error::TableNotFound { .. } => {
                tonic::Status::not_found(message)
            }
            Error::Backend { .. }
            | Error::Config(_)
            | Error::Io(_)
            | Error::Transport(_)
            | Error::Arrow(_) => tonic::Status::internal(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// === Constants ===

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// One mebibyte
pub const MIB: usize = 1024 * 1024;
