//! Write actions for Arrow Flight
//!
//! DoAction routes three named actions to the [`WriteBackend`]:
//!
//! - `MigrateTable` - create or alter a table to match a schema
//! - `DeleteRecord` - delete rows selected by a predicate tree
//! - `DeleteStale`  - delete rows a source last synced before a cutoff
//!
//! Bodies are CloudQuery plugin-v3 protobuf messages (see [`super::proto`]);
//! schemas and predicate values inside them are Arrow IPC streams.

use std::fmt;
use std::io::Cursor;
use std::str::FromStr;
use std::sync::Arc;

use arrow_array::RecordBatch;
use arrow_flight::ActionType;
use arrow_ipc::reader::StreamReader;
use arrow_schema::SchemaRef;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use prost::Message;
use tracing::debug;

use super::backend::{Table, WriteBackend};
use super::proto;
use crate::{Error, Result};

/// Body of the single Result sent back for a successful action
pub const ACTION_ACK: &[u8] = b"success";

/// Schema metadata key naming the table a migration targets
pub const TABLE_NAME_METADATA: &str = "cq:table_name";

// =============================================================================
// ACTION NAMES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    MigrateTable,
    DeleteRecord,
    DeleteStale,
}

impl ActionKind {
    pub const ALL: [ActionKind; 3] =
        [ActionKind::MigrateTable, ActionKind::DeleteRecord, ActionKind::DeleteStale];

    /// Wire name, as sent in `Action::type`
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::MigrateTable => "MigrateTable",
            ActionKind::DeleteRecord => "DeleteRecord",
            ActionKind::DeleteStale => "DeleteStale",
        }
    }

    /// What the action does, for error messages
    pub fn operation(&self) -> &'static str {
        match self {
            ActionKind::MigrateTable => "migrate table",
            ActionKind::DeleteRecord => "delete record",
            ActionKind::DeleteStale => "delete stale",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ActionKind::MigrateTable => {
                "Migrate a table to an Arrow schema (body: Write.MessageMigrateTable)"
            }
            ActionKind::DeleteRecord => {
                "Delete rows matching a predicate tree (body: Write.MessageDeleteRecord)"
            }
            ActionKind::DeleteStale => {
                "Delete rows last synced before a cutoff (body: Write.MessageDeleteStale)"
            }
        }
    }

    /// Descriptors served by ListActions
    pub fn action_types() -> Vec<ActionType> {
        Self::ALL
            .iter()
            .map(|kind| ActionType {
                r#type: kind.name().to_string(),
                description: kind.description().to_string(),
            })
            .collect()
    }
}

impl FromStr for ActionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| Error::UnknownAction(s.to_string()))
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// WRITE INTENTS
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct MigrateTable {
    pub table: Table,
    pub migrate_force: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteRecord {
    pub table_name: String,
    pub table_relations: Vec<TableRelation>,
    /// Groups are combined as a conjunction; each group combines its
    /// predicates by its own grouping type.
    pub where_clause: Vec<PredicateGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRelation {
    pub table_name: String,
    pub parent_table: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredicateGroup {
    pub grouping: GroupingType,
    pub predicates: Vec<Predicate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupingType {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub operator: PredicateOperator,
    pub column: String,
    /// Single-row record holding the comparison value for `column`
    pub record: RecordBatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateOperator {
    Eq,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteStale {
    pub table_name: String,
    pub source_name: String,
    pub sync_time: DateTime<Utc>,
}

/// A decoded DoAction body.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteIntent {
    MigrateTable(MigrateTable),
    DeleteRecord(DeleteRecord),
    DeleteStale(DeleteStale),
}

impl WriteIntent {
    pub fn kind(&self) -> ActionKind {
        match self {
            WriteIntent::MigrateTable(_) => ActionKind::MigrateTable,
            WriteIntent::DeleteRecord(_) => ActionKind::DeleteRecord,
            WriteIntent::DeleteStale(_) => ActionKind::DeleteStale,
        }
    }
}

// =============================================================================
// DECODING
// =============================================================================

fn invalid(kind: ActionKind, reason: impl Into<String>) -> Error {
    Error::InvalidPayload {
        action: kind.name(),
        reason: reason.into(),
    }
}

/// Read the schema header of an Arrow IPC stream
fn decode_ipc_schema(kind: ActionKind, data: &[u8]) -> Result<SchemaRef> {
    let reader = StreamReader::try_new(Cursor::new(data), None)
        .map_err(|e| invalid(kind, format!("failed to read arrow schema: {e}")))?;
    Ok(reader.schema())
}

/// Read the first batch of an Arrow IPC stream
fn decode_ipc_record(kind: ActionKind, data: &[u8]) -> Result<RecordBatch> {
    let mut reader = StreamReader::try_new(Cursor::new(data), None)
        .map_err(|e| invalid(kind, format!("failed to read arrow record: {e}")))?;
    match reader.next() {
        Some(Ok(batch)) => Ok(batch),
        Some(Err(e)) => Err(invalid(kind, format!("failed to read arrow record: {e}"))),
        None => Err(invalid(kind, "record stream holds no batch")),
    }
}

fn decode_migrate_table(body: &[u8]) -> Result<MigrateTable> {
    let kind = ActionKind::MigrateTable;
    let msg = proto::MessageMigrateTable::decode(body)
        .map_err(|e| invalid(kind, format!("failed to unmarshal body: {e}")))?;

    let schema = decode_ipc_schema(kind, &msg.table)?;
    let name = schema
        .metadata()
        .get(TABLE_NAME_METADATA)
        .cloned()
        .ok_or_else(|| {
            invalid(
                kind,
                format!("schema has no {TABLE_NAME_METADATA} metadata"),
            )
        })?;

    Ok(MigrateTable {
        table: Table::new(name, schema),
        migrate_force: msg.migrate_force,
    })
}

fn decode_delete_record(body: &[u8]) -> Result<DeleteRecord> {
    let kind = ActionKind::DeleteRecord;
    let msg = proto::MessageDeleteRecord::decode(body)
        .map_err(|e| invalid(kind, format!("failed to unmarshal body: {e}")))?;

    let table_relations = msg
        .table_relations
        .into_iter()
        .map(|tr| TableRelation {
            table_name: tr.table_name,
            parent_table: tr.parent_table,
        })
        .collect();

    let mut where_clause = Vec::with_capacity(msg.where_clause.len());
    for group in msg.where_clause {
        let grouping = match proto::predicates_group::GroupingType::try_from(group.grouping_type) {
            Ok(proto::predicates_group::GroupingType::And) => GroupingType::And,
            Ok(proto::predicates_group::GroupingType::Or) => GroupingType::Or,
            Err(e) => return Err(invalid(kind, e.to_string())),
        };

        let mut predicates = Vec::with_capacity(group.predicates.len());
        for p in group.predicates {
            let operator = match proto::predicate::Operator::try_from(p.operator) {
                Ok(proto::predicate::Operator::Eq) => PredicateOperator::Eq,
                Err(e) => return Err(invalid(kind, e.to_string())),
            };
            let record = decode_ipc_record(kind, &p.record)?;
            predicates.push(Predicate {
                operator,
                column: p.column,
                record,
            });
        }
        where_clause.push(PredicateGroup {
            grouping,
            predicates,
        });
    }

    Ok(DeleteRecord {
        table_name: msg.table_name,
        table_relations,
        where_clause,
    })
}

fn decode_delete_stale(body: &[u8]) -> Result<DeleteStale> {
    let kind = ActionKind::DeleteStale;
    let msg = proto::MessageDeleteStale::decode(body)
        .map_err(|e| invalid(kind, format!("failed to unmarshal body: {e}")))?;

    // An absent sync time reads as the epoch, same as a zero Timestamp.
    let sync_time = match msg.sync_time {
        None => DateTime::UNIX_EPOCH,
        Some(ts) => u32::try_from(ts.nanos)
            .ok()
            .and_then(|nanos| DateTime::from_timestamp(ts.seconds, nanos))
            .ok_or_else(|| {
                invalid(
                    kind,
                    format!("sync_time out of range: {}s {}ns", ts.seconds, ts.nanos),
                )
            })?,
    };

    Ok(DeleteStale {
        table_name: msg.table_name,
        source_name: msg.source_name,
        sync_time,
    })
}

/// Decode an action body into the intent it describes.
pub fn decode_write_intent(kind: ActionKind, body: &[u8]) -> Result<WriteIntent> {
    let intent = match kind {
        ActionKind::MigrateTable => WriteIntent::MigrateTable(decode_migrate_table(body)?),
        ActionKind::DeleteRecord => WriteIntent::DeleteRecord(decode_delete_record(body)?),
        ActionKind::DeleteStale => WriteIntent::DeleteStale(decode_delete_stale(body)?),
    };
    Ok(intent)
}

// =============================================================================
// DISPATCH
// =============================================================================

/// Routes DoAction requests to a [`WriteBackend`].
#[derive(Debug)]
pub struct ActionDispatcher<B> {
    backend: Arc<B>,
}

impl<B> Clone for ActionDispatcher<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: WriteBackend> ActionDispatcher<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Parse, decode and apply one action. Returns the acknowledgement body.
    pub async fn dispatch(&self, action_type: &str, body: &[u8]) -> Result<Bytes> {
        let kind: ActionKind = action_type.parse()?;
        let intent = decode_write_intent(kind, body)?;
        self.apply(intent).await?;
        Ok(Bytes::from_static(ACTION_ACK))
    }

    /// Hand one intent to the backend as a sequence of length one.
    pub async fn apply(&self, intent: WriteIntent) -> Result<()> {
        let operation = intent.kind().operation();
        let outcome = match intent {
            WriteIntent::MigrateTable(msg) => {
                debug!(table = %msg.table.name, force = msg.migrate_force, "migrate table");
                self.backend.migrate_table(vec![msg]).await
            }
            WriteIntent::DeleteRecord(msg) => {
                debug!(
                    table = %msg.table_name,
                    relations = msg.table_relations.len(),
                    groups = msg.where_clause.len(),
                    "delete record"
                );
                self.backend.delete_record(vec![msg]).await
            }
            WriteIntent::DeleteStale(msg) => {
                debug!(
                    table = %msg.table_name,
                    source = %msg.source_name,
                    sync_time = %msg.sync_time,
                    "delete stale"
                );
                self.backend.delete_stale(vec![msg]).await
            }
        };
        outcome.map_err(|source| Error::Backend { operation, source })
    }
}
