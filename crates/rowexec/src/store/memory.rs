use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use indexmap::IndexMap;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::trace;

use super::{
    ChangeEvent, ChangeKind, MutationOptions, RecordStream, RelationRef, RowStore, record_key,
};
use crate::ast::{ObjectName, TableSchema};
use crate::errors::{ExecError, Result, structural};
use crate::row::Record;
use crate::value::ScalarValue;

/// Schema used for unqualified table names.
pub const DEFAULT_SCHEMA: &str = "public";

const DEFAULT_CHANGEFEED_CAPACITY: usize = 1024;

#[derive(Debug)]
struct StoredTable {
    schema: TableSchema,
    /// Records keyed by their key values, in insertion order.
    rows: IndexMap<Vec<ScalarValue>, Record>,
    /// Last value handed out per identity column.
    identity: HashMap<String, i64>,
}

impl StoredTable {
    fn new(schema: TableSchema) -> Self {
        StoredTable {
            schema,
            rows: IndexMap::new(),
            identity: HashMap::new(),
        }
    }

    /// Reorder `record` into schema column order, filling absent columns
    /// with NULL. Identity columns left NULL get the next counter value when
    /// `fill_identity` is set.
    fn normalize(&mut self, mut record: Record, fill_identity: bool) -> Result<Record> {
        let mut out = Record::with_capacity(self.schema.columns.len());
        for col in &self.schema.columns {
            let mut value = record.shift_remove(&col.name).unwrap_or_default();
            if col.identity {
                let counter = self.identity.entry(col.name.clone()).or_insert(0);
                match &value {
                    ScalarValue::Null if fill_identity => {
                        *counter += 1;
                        value = ScalarValue::Int64(*counter);
                    }
                    ScalarValue::Int64(v) => *counter = (*counter).max(*v),
                    _ => (),
                }
            }
            out.insert(col.name.clone(), value);
        }

        if let Some((name, _)) = record.first() {
            return Err(structural!(
                "column \"{name}\" of relation \"{}\" does not exist",
                self.schema.qualified_name()
            ));
        }

        Ok(out)
    }
}

#[derive(Debug, Default)]
struct Catalog {
    schemas: HashMap<String, HashMap<String, StoredTable>>,
}

impl Catalog {
    fn new() -> Self {
        let mut schemas = HashMap::new();
        schemas.insert(DEFAULT_SCHEMA.to_string(), HashMap::new());
        Catalog { schemas }
    }

    fn table(&self, schema: Option<&str>, name: &str) -> Result<&StoredTable> {
        self.schemas
            .get(schema.unwrap_or(DEFAULT_SCHEMA))
            .and_then(|tables| tables.get(name))
            .ok_or_else(|| structural!("relation \"{name}\" does not exist"))
    }

    fn table_mut(&mut self, schema: Option<&str>, name: &str) -> Result<&mut StoredTable> {
        self.schemas
            .get_mut(schema.unwrap_or(DEFAULT_SCHEMA))
            .and_then(|tables| tables.get_mut(name))
            .ok_or_else(|| structural!("relation \"{name}\" does not exist"))
    }
}

/// In-memory row store.
///
/// Records live in insertion order. Cursors read by position, so records
/// inserted while a cursor is open are observed by it.
#[derive(Debug)]
pub struct MemoryStore {
    catalog: Arc<RwLock<Catalog>>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_changefeed_capacity(DEFAULT_CHANGEFEED_CAPACITY)
    }

    pub fn with_changefeed_capacity(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        MemoryStore {
            catalog: Arc::new(RwLock::new(Catalog::new())),
            changes,
        }
    }

    /// Copy out every record of a table.
    pub fn records(&self, name: &ObjectName) -> Result<Vec<Record>> {
        let catalog = self.catalog.read();
        let table = catalog.table(name.schema.as_deref(), &name.name)?;
        Ok(table.rows.values().cloned().collect())
    }

    fn emit(&self, opts: &MutationOptions, event: ChangeEvent) {
        opts.record(&event);
        // No subscribers is fine.
        let _ = self.changes.send(event);
    }
}

#[async_trait]
impl RowStore for MemoryStore {
    async fn cursor(&self, table: &TableSchema) -> Result<RecordStream> {
        // Fail early if the table doesn't exist.
        self.catalog
            .read()
            .table(table.schema.as_deref(), &table.name)?;

        Ok(MemoryCursor {
            catalog: self.catalog.clone(),
            schema: table.schema.clone(),
            name: table.name.clone(),
            curr: 0,
        }
        .boxed())
    }

    async fn insert(
        &self,
        table: &TableSchema,
        record: Record,
        opts: &MutationOptions,
    ) -> Result<Record> {
        let stored = {
            let mut catalog = self.catalog.write();
            let stored = catalog.table_mut(table.schema.as_deref(), &table.name)?;
            let record = stored.normalize(record, true)?;
            let key = record_key(&stored.schema, &record);

            if let Some(existing) = stored.rows.get(&key) {
                return Err(ExecError::Conflict {
                    table: stored.schema.qualified_name(),
                    existing: existing.clone(),
                });
            }
            stored.rows.insert(key.clone(), record.clone());
            trace!(table = %stored.schema.qualified_name(), ?key, "inserted record");

            (RelationRef::from_schema(&stored.schema), key, record)
        };

        let (relation, key, record) = stored;
        self.emit(opts, ChangeEvent {
            kind: ChangeKind::Insert,
            relation,
            key: Some(key),
            old: None,
            new: Some(record.clone()),
            tx_id: opts.tx_id,
        });

        Ok(record)
    }

    async fn update(
        &self,
        table: &TableSchema,
        old: &Record,
        new: Record,
        opts: &MutationOptions,
    ) -> Result<Record> {
        let (relation, key, old, new) = {
            let mut catalog = self.catalog.write();
            let stored = catalog.table_mut(table.schema.as_deref(), &table.name)?;

            let old_key = record_key(&stored.schema, old);
            let idx = stored.rows.get_index_of(&old_key).ok_or_else(|| {
                structural!(
                    "record to update no longer exists in \"{}\"",
                    stored.schema.qualified_name()
                )
            })?;

            let new = stored.normalize(new, false)?;
            let new_key = record_key(&stored.schema, &new);

            let old = if new_key == old_key {
                std::mem::replace(&mut stored.rows[idx], new.clone())
            } else {
                if let Some(existing) = stored.rows.get(&new_key) {
                    return Err(ExecError::Conflict {
                        table: stored.schema.qualified_name(),
                        existing: existing.clone(),
                    });
                }
                let (_, old) = stored
                    .rows
                    .shift_remove_index(idx)
                    .ok_or_else(|| structural!("record index {idx} out of bounds"))?;
                stored.rows.shift_insert(idx, new_key.clone(), new.clone());
                old
            };

            (RelationRef::from_schema(&stored.schema), new_key, old, new)
        };

        self.emit(opts, ChangeEvent {
            kind: ChangeKind::Update,
            relation,
            key: Some(key),
            old: Some(old),
            new: Some(new.clone()),
            tx_id: opts.tx_id,
        });

        Ok(new)
    }

    async fn delete(
        &self,
        table: &TableSchema,
        old: &Record,
        opts: &MutationOptions,
    ) -> Result<Record> {
        let (relation, key, old) = {
            let mut catalog = self.catalog.write();
            let stored = catalog.table_mut(table.schema.as_deref(), &table.name)?;

            let key = record_key(&stored.schema, old);
            let old = stored.rows.shift_remove(&key).ok_or_else(|| {
                structural!(
                    "record to delete no longer exists in \"{}\"",
                    stored.schema.qualified_name()
                )
            })?;

            (RelationRef::from_schema(&stored.schema), key, old)
        };

        self.emit(opts, ChangeEvent {
            kind: ChangeKind::Delete,
            relation,
            key: Some(key),
            old: Some(old.clone()),
            new: None,
            tx_id: opts.tx_id,
        });

        Ok(old)
    }

    async fn create_table(&self, schema: &TableSchema, if_not_exists: bool) -> Result<()> {
        let mut catalog = self.catalog.write();
        let schema_name = schema.schema.as_deref().unwrap_or(DEFAULT_SCHEMA);
        let tables = catalog
            .schemas
            .get_mut(schema_name)
            .ok_or_else(|| structural!("schema \"{schema_name}\" does not exist"))?;

        if tables.contains_key(&schema.name) {
            if if_not_exists {
                return Ok(());
            }
            return Err(structural!("relation \"{}\" already exists", schema.name));
        }

        tables.insert(schema.name.clone(), StoredTable::new(schema.clone()));
        Ok(())
    }

    async fn drop_table(&self, name: &ObjectName, if_exists: bool) -> Result<()> {
        let mut catalog = self.catalog.write();
        let removed = catalog
            .schemas
            .get_mut(name.schema.as_deref().unwrap_or(DEFAULT_SCHEMA))
            .and_then(|tables| tables.remove(&name.name));

        match removed {
            Some(_) => Ok(()),
            None if if_exists => Ok(()),
            None => Err(structural!("relation \"{name}\" does not exist")),
        }
    }

    async fn create_schema(&self, name: &str, if_not_exists: bool) -> Result<()> {
        let mut catalog = self.catalog.write();
        if catalog.schemas.contains_key(name) {
            if if_not_exists {
                return Ok(());
            }
            return Err(structural!("schema \"{name}\" already exists"));
        }
        catalog.schemas.insert(name.to_string(), HashMap::new());
        Ok(())
    }

    async fn drop_schema(&self, name: &str, if_exists: bool, cascade: bool) -> Result<()> {
        let mut catalog = self.catalog.write();
        match catalog.schemas.get(name) {
            None if if_exists => Ok(()),
            None => Err(structural!("schema \"{name}\" does not exist")),
            Some(tables) if !tables.is_empty() && !cascade => Err(structural!(
                "cannot drop schema \"{name}\" because other objects depend on it"
            )),
            Some(_) => {
                catalog.schemas.remove(name);
                Ok(())
            }
        }
    }

    fn changefeed(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

/// Cursor reading a table one record at a time.
#[derive(Debug)]
struct MemoryCursor {
    catalog: Arc<RwLock<Catalog>>,
    schema: Option<String>,
    name: String,
    curr: usize,
}

impl Stream for MemoryCursor {
    type Item = Result<Record>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let record = {
            let catalog = self.catalog.read();
            match catalog.table(self.schema.as_deref(), &self.name) {
                Ok(table) => table.rows.get_index(self.curr).map(|(_, r)| r.clone()),
                // Dropped mid-scan.
                Err(_) => None,
            }
        };

        match record {
            Some(record) => {
                self.curr += 1;
                Poll::Ready(Some(Ok(record)))
            }
            None => Poll::Ready(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;

    use super::*;
    use crate::ast::{ColumnSchema, DataType};
    use crate::row::record;
    use crate::store::ChangeSink;

    fn users() -> TableSchema {
        TableSchema::new(
            "users",
            vec![
                ColumnSchema::new("id", DataType::Int).identity(),
                ColumnSchema::new("name", DataType::Text),
            ],
        )
        .with_primary_key(["id"])
    }

    async fn store_with_users() -> MemoryStore {
        let store = MemoryStore::new();
        store.create_table(&users(), false).await.unwrap();
        store
    }

    #[tokio::test]
    async fn identity_fills_and_tracks_explicit_values() {
        let store = store_with_users().await;
        let opts = MutationOptions::default();

        let a = store
            .insert(&users(), record([("name", "a")]), &opts)
            .await
            .unwrap();
        assert_eq!(Some(&ScalarValue::Int64(1)), a.get("id"));

        store
            .insert(&users(), record([("id", 10.into()), ("name", ScalarValue::from("b"))]), &opts)
            .await
            .unwrap();
        let c = store
            .insert(&users(), record([("name", "c")]), &opts)
            .await
            .unwrap();
        assert_eq!(Some(&ScalarValue::Int64(11)), c.get("id"));
    }

    #[tokio::test]
    async fn duplicate_key_conflicts_with_existing() {
        let store = store_with_users().await;
        let opts = MutationOptions::default();
        store
            .insert(&users(), record([("id", 1.into()), ("name", ScalarValue::from("a"))]), &opts)
            .await
            .unwrap();

        let err = store
            .insert(&users(), record([("id", 1.into()), ("name", ScalarValue::from("b"))]), &opts)
            .await
            .unwrap_err();
        match err {
            ExecError::Conflict { existing, .. } => {
                assert_eq!(Some(&ScalarValue::from("a")), existing.get("name"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn cursor_observes_inserts_mid_scan() {
        let store = store_with_users().await;
        let opts = MutationOptions::default();
        store
            .insert(&users(), record([("name", "a")]), &opts)
            .await
            .unwrap();

        let mut cursor = store.cursor(&users()).await.unwrap();
        let first = cursor.try_next().await.unwrap().unwrap();
        assert_eq!(Some(&ScalarValue::from("a")), first.get("name"));

        store
            .insert(&users(), record([("name", "b")]), &opts)
            .await
            .unwrap();
        let second = cursor.try_next().await.unwrap().unwrap();
        assert_eq!(Some(&ScalarValue::from("b")), second.get("name"));
        assert!(cursor.try_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_keeps_position_and_emits_event() {
        let store = store_with_users().await;
        let mut feed = store.changefeed();
        let opts = MutationOptions::default();

        let a = store
            .insert(&users(), record([("name", "a")]), &opts)
            .await
            .unwrap();
        store
            .insert(&users(), record([("name", "b")]), &opts)
            .await
            .unwrap();

        let mut new = a.clone();
        new.insert("id".to_string(), 5.into());
        store.update(&users(), &a, new, &opts).await.unwrap();

        let records = store.records(&ObjectName::new("users")).unwrap();
        assert_eq!(Some(&ScalarValue::Int64(5)), records[0].get("id"));

        let kinds: Vec<_> = std::iter::from_fn(|| feed.try_recv().ok())
            .map(|ev| ev.kind)
            .collect();
        assert_eq!(
            vec![ChangeKind::Insert, ChangeKind::Insert, ChangeKind::Update],
            kinds
        );
    }

    #[tokio::test]
    async fn sink_collects_every_event() {
        let store = MemoryStore::with_changefeed_capacity(1);
        store.create_table(&users(), false).await.unwrap();
        let sink = ChangeSink::default();
        let opts = MutationOptions {
            tx_id: None,
            sink: Some(sink.clone()),
        };

        let a = store
            .insert(&users(), record([("name", "a")]), &opts)
            .await
            .unwrap();
        store
            .insert(&users(), record([("name", "b")]), &opts)
            .await
            .unwrap();
        store.delete(&users(), &a, &opts).await.unwrap();

        let kinds: Vec<_> = sink.take().into_iter().map(|ev| ev.kind).collect();
        assert_eq!(
            vec![ChangeKind::Insert, ChangeKind::Insert, ChangeKind::Delete],
            kinds
        );
        assert!(sink.take().is_empty());
    }

    #[tokio::test]
    async fn unknown_column_rejected() {
        let store = store_with_users().await;
        let err = store
            .insert(&users(), record([("nope", 1)]), &MutationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Structural(_)));
    }

    #[tokio::test]
    async fn drop_schema_requires_cascade() {
        let store = MemoryStore::new();
        store.create_schema("s", false).await.unwrap();
        store
            .create_table(&users().with_schema("s"), false)
            .await
            .unwrap();

        assert!(store.drop_schema("s", false, false).await.is_err());
        store.drop_schema("s", false, true).await.unwrap();
        assert!(store.drop_schema("s", true, false).await.is_ok());
    }
}
