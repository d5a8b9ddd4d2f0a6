//! Row storage collaborator.
//!
//! The evaluators never touch stored records directly, everything goes
//! through [`RowStore`].
pub mod memory;

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use crate::ast::{ObjectName, TableSchema};
use crate::errors::Result;
use crate::row::Record;
use crate::value::ScalarValue;

pub use memory::MemoryStore;

/// Lazy sequence of stored records.
pub type RecordStream = BoxStream<'static, Result<Record>>;

/// Options passed along with every mutation.
#[derive(Debug, Clone, Default)]
pub struct MutationOptions {
    /// Transaction id of the top-level call performing the mutation. Copied
    /// onto emitted change events.
    pub tx_id: Option<Uuid>,
    /// Receives every event emitted for the mutation, in order.
    pub sink: Option<ChangeSink>,
}

impl MutationOptions {
    /// Record `event` in the sink, if any.
    pub fn record(&self, event: &ChangeEvent) {
        if let Some(sink) = &self.sink {
            sink.push(event.clone());
        }
    }
}

/// Unbounded collector for the change events of one call.
#[derive(Debug, Clone, Default)]
pub struct ChangeSink {
    events: Arc<Mutex<Vec<ChangeEvent>>>,
}

impl ChangeSink {
    pub fn push(&self, event: ChangeEvent) {
        self.events.lock().push(event);
    }

    /// Remove and return everything collected so far.
    pub fn take(&self) -> Vec<ChangeEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

#[async_trait]
pub trait RowStore: Debug + Send + Sync {
    /// Open a cursor over every record in `table`.
    ///
    /// Records are yielded in storage order. Mutations made while the cursor
    /// is open may or may not be observed.
    async fn cursor(&self, table: &TableSchema) -> Result<RecordStream>;

    /// Insert a record, returning the stored record (with identity columns
    /// filled in).
    ///
    /// Errors with `ExecError::Conflict` carrying the existing record if the
    /// key is already present.
    ///
    /// Every mutation method passes the event it emits to
    /// [`MutationOptions::record`] before returning.
    async fn insert(
        &self,
        table: &TableSchema,
        record: Record,
        opts: &MutationOptions,
    ) -> Result<Record>;

    /// Replace the record stored under `old`'s key with `new`.
    async fn update(
        &self,
        table: &TableSchema,
        old: &Record,
        new: Record,
        opts: &MutationOptions,
    ) -> Result<Record>;

    /// Delete the record stored under `old`'s key, returning it.
    async fn delete(
        &self,
        table: &TableSchema,
        old: &Record,
        opts: &MutationOptions,
    ) -> Result<Record>;

    async fn create_table(&self, schema: &TableSchema, if_not_exists: bool) -> Result<()>;

    async fn drop_table(&self, name: &ObjectName, if_exists: bool) -> Result<()>;

    async fn create_schema(&self, name: &str, if_not_exists: bool) -> Result<()>;

    async fn drop_schema(&self, name: &str, if_exists: bool, cascade: bool) -> Result<()>;

    /// Subscribe to per-mutation change events.
    fn changefeed(&self) -> tokio::sync::broadcast::Receiver<ChangeEvent>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationRef {
    pub schema: Option<String>,
    pub name: String,
    #[serde(rename = "keyColumns")]
    pub key_columns: Vec<String>,
}

impl RelationRef {
    pub fn from_schema(table: &TableSchema) -> Self {
        RelationRef {
            schema: table.schema.clone(),
            name: table.name.clone(),
            key_columns: table.key_columns(),
        }
    }
}

/// A single mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub relation: RelationRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<Vec<ScalarValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Record>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<Record>,
    #[serde(rename = "txId")]
    pub tx_id: Option<Uuid>,
}

/// Every mutation made by one top-level call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeBatch {
    #[serde(rename = "txId")]
    pub tx_id: Uuid,
    pub events: Vec<ChangeEvent>,
}

/// Key values of `record` under `table`'s key columns. Missing columns are
/// NULL.
pub fn record_key(table: &TableSchema, record: &Record) -> Vec<ScalarValue> {
    table
        .key_columns()
        .iter()
        .map(|col| record.get(col).cloned().unwrap_or_default())
        .collect()
}
