//! Backend capability set
//!
//! The server never stores data itself. Table resolution, batch reads, batch
//! ingest and the three write actions are delegated to these two traits.
//! [`Handler`] pairs a read/ingest backend with a write-action backend, and
//! [`NoopBackend`] is a do-nothing stand-in for both.

use std::sync::Arc;

use arrow_array::RecordBatch;
use arrow_schema::{Schema, SchemaRef};
use async_trait::async_trait;
use tokio::sync::mpsc;

use super::actions::{DeleteRecord, DeleteStale, MigrateTable};

/// Error reported by a backend capability. Opaque to the server.
pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

/// Handoff queue a backend pushes DoGet batches into.
///
/// Dropping the sink (or returning from [`FlightBackend::do_get`]) closes the
/// stream for the client.
pub type BatchSink = mpsc::UnboundedSender<RecordBatch>;

/// A named table and its Arrow schema, as resolved by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    pub schema: SchemaRef,
}

impl Table {
    pub fn new(name: impl Into<String>, schema: SchemaRef) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }
}

/// Read, ingest and table lookup.
#[async_trait]
pub trait FlightBackend: Send + Sync + 'static {
    /// Resolve a table name to its schema.
    async fn lookup_table(&self, table_name: &str) -> Result<Table, BackendError>;

    /// Produce every batch of `table`, in order, into `sink`.
    async fn do_get(&self, table: &Table, sink: BatchSink) -> Result<(), BackendError>;

    /// Ingest one batch received through DoPut. The batch is released as soon
    /// as this returns.
    async fn do_put(&self, batch: &RecordBatch) -> Result<(), BackendError>;
}

/// The three write actions reachable through DoAction.
///
/// Each call carries exactly one message today; the sequence form leaves room
/// for batching.
#[async_trait]
pub trait WriteBackend: Send + Sync + 'static {
    async fn migrate_table(&self, messages: Vec<MigrateTable>) -> Result<(), BackendError>;

    async fn delete_record(&self, messages: Vec<DeleteRecord>) -> Result<(), BackendError>;

    async fn delete_stale(&self, messages: Vec<DeleteStale>) -> Result<(), BackendError>;
}

#[async_trait]
impl<T: FlightBackend + ?Sized> FlightBackend for Arc<T> {
    async fn lookup_table(&self, table_name: &str) -> Result<Table, BackendError> {
        (**self).lookup_table(table_name).await
    }

    async fn do_get(&self, table: &Table, sink: BatchSink) -> Result<(), BackendError> {
        (**self).do_get(table, sink).await
    }

    async fn do_put(&self, batch: &RecordBatch) -> Result<(), BackendError> {
        (**self).do_put(batch).await
    }
}

#[async_trait]
impl<T: WriteBackend + ?Sized> WriteBackend for Arc<T> {
    async fn migrate_table(&self, messages: Vec<MigrateTable>) -> Result<(), BackendError> {
        (**self).migrate_table(messages).await
    }

    async fn delete_record(&self, messages: Vec<DeleteRecord>) -> Result<(), BackendError> {
        (**self).delete_record(messages).await
    }

    async fn delete_stale(&self, messages: Vec<DeleteStale>) -> Result<(), BackendError> {
        (**self).delete_stale(messages).await
    }
}

// =============================================================================
// HANDLER
// =============================================================================

/// Pairs a [`FlightBackend`] with a [`WriteBackend`] so the two halves can be
/// swapped independently.
#[derive(Debug, Clone, Default)]
pub struct Handler<F, W> {
    pub flight: F,
    pub write: W,
}

impl<F, W> Handler<F, W> {
    pub fn new(flight: F, write: W) -> Self {
        Self { flight, write }
    }
}

#[async_trait]
impl<F: FlightBackend, W: Send + Sync + 'static> FlightBackend for Handler<F, W> {
    async fn lookup_table(&self, table_name: &str) -> Result<Table, BackendError> {
        self.flight.lookup_table(table_name).await
    }

    async fn do_get(&self, table: &Table, sink: BatchSink) -> Result<(), BackendError> {
        self.flight.do_get(table, sink).await
    }

    async fn do_put(&self, batch: &RecordBatch) -> Result<(), BackendError> {
        self.flight.do_put(batch).await
    }
}

#[async_trait]
impl<F: Send + Sync + 'static, W: WriteBackend> WriteBackend for Handler<F, W> {
    async fn migrate_table(&self, messages: Vec<MigrateTable>) -> Result<(), BackendError> {
        self.write.migrate_table(messages).await
    }

    async fn delete_record(&self, messages: Vec<DeleteRecord>) -> Result<(), BackendError> {
        self.write.delete_record(messages).await
    }

    async fn delete_stale(&self, messages: Vec<DeleteStale>) -> Result<(), BackendError> {
        self.write.delete_stale(messages).await
    }
}

// =============================================================================
// NO-OP BACKEND
// =============================================================================

/// Accepts everything, stores nothing. Every table resolves to an empty schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBackend;

#[async_trait]
impl FlightBackend for NoopBackend {
    async fn lookup_table(&self, table_name: &str) -> Result<Table, BackendError> {
        Ok(Table::new(table_name, Arc::new(Schema::empty())))
    }

    async fn do_get(&self, _table: &Table, _sink: BatchSink) -> Result<(), BackendError> {
        Ok(())
    }

    async fn do_put(&self, _batch: &RecordBatch) -> Result<(), BackendError> {
        Ok(())
    }
}

#[async_trait]
impl WriteBackend for NoopBackend {
    async fn migrate_table(&self, _messages: Vec<MigrateTable>) -> Result<(), BackendError> {
        Ok(())
    }

    async fn delete_record(&self, _messages: Vec<DeleteRecord>) -> Result<(), BackendError> {
        Ok(())
    }

    async fn delete_stale(&self, _messages: Vec<DeleteStale>) -> Result<(), BackendError> {
        Ok(())
    }
}
