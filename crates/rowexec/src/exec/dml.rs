//! INSERT, UPDATE and DELETE.
//!
//! UPDATE and DELETE collect every row surviving FROM/WHERE before the
//! first mutation is applied, so their input never observes their own
//! writes.

use std::collections::HashSet;

use futures::TryStreamExt;
use indexmap::IndexMap;
use tracing::debug;

use super::shape::{NamedRelation, ProjectedColumn, Shape, ShapeResolver, expand_projection};
use super::{QueryResult, StatementEvaluator};
use crate::ast::{
    Assignment, ColumnSchema, ConflictAction, Delete, Expr, FromItem, Insert, InsertSource,
    OnConflict, OriginSchemas, SelectItem, TableFactor, TableSchema, Update, ValueOrDefault,
};
use crate::context::QueryContext;
use crate::errors::{ExecError, Result, structural};
use crate::expr::cast::cast;
use crate::row::{CompositeRow, EXCLUDED_ALIAS, Record, Row};
use crate::store::record_key;
use crate::value::ScalarValue;

/// Base tables of a FROM clause that can be mutated, by alias.
fn mutable_tables<'o>(
    items: &[FromItem],
    origins: &'o [TableSchema],
    ctx: &QueryContext,
) -> Result<IndexMap<String, &'o TableSchema>> {
    let mut factors = Vec::new();
    for item in items {
        collect_factors(item, &mut factors);
    }

    let resolver = ShapeResolver::new(ctx);
    let mut tables = IndexMap::new();
    for factor in factors {
        let TableFactor::Table { name, alias } = factor else {
            continue;
        };
        if let (NamedRelation::Table(schema), _) = resolver.relation_columns(name, origins)? {
            let alias = alias
                .as_ref()
                .map(|a| a.name.clone())
                .unwrap_or_else(|| name.name.clone());
            tables.insert(alias, schema);
        }
    }
    Ok(tables)
}

fn collect_factors<'a>(item: &'a FromItem, out: &mut Vec<&'a TableFactor>) {
    let factors = std::iter::once(&item.relation).chain(item.joins.iter().map(|j| &j.relation));
    for factor in factors {
        match factor {
            TableFactor::NestedJoin(inner) => collect_factors(inner, out),
            other => out.push(other),
        }
    }
}

fn schema_column<'s>(schema: &'s TableSchema, name: &str) -> Result<&'s ColumnSchema> {
    schema.column(name).ok_or_else(|| {
        structural!(
            "column \"{name}\" of relation \"{}\" does not exist",
            schema.qualified_name()
        )
    })
}

/// Check if a conflict target names the key the store reported the
/// conflict on. An empty target matches any key.
fn conflict_target_matches(on_conflict: &OnConflict, schema: &TableSchema) -> bool {
    if on_conflict.target.is_empty() {
        return true;
    }
    let key = schema.key_columns();
    on_conflict.target.len() == key.len() && on_conflict.target.iter().all(|c| key.contains(c))
}

fn returning_projection(
    items: &[SelectItem],
    shape: &Shape,
    ctx: &QueryContext,
) -> Result<Option<Vec<ProjectedColumn>>> {
    if items.is_empty() {
        return Ok(None);
    }
    expand_projection(items, shape, ctx.dialect).map(Some)
}

fn mutation_result(
    returning: Option<Vec<ProjectedColumn>>,
    returned: Vec<Record>,
    count: u64,
) -> QueryResult {
    match returning {
        Some(projection) => QueryResult::Rows {
            columns: projection.into_iter().map(|c| c.name).collect(),
            rows: returned,
        },
        None => QueryResult::RowCount(count),
    }
}

impl StatementEvaluator<'_> {
    pub(crate) async fn insert(&self, insert: &Insert, ctx: QueryContext) -> Result<QueryResult> {
        let schema = insert
            .find_origin_schema(&insert.table)
            .ok_or_else(|| structural!("relation \"{}\" does not exist", insert.table))?;
        let alias = insert.alias.clone().unwrap_or_else(|| schema.name.clone());

        let columns = if insert.columns.is_empty() {
            schema.column_names()
        } else {
            let mut seen = HashSet::new();
            for name in &insert.columns {
                schema_column(schema, name)?;
                if !seen.insert(name) {
                    return Err(structural!("column \"{name}\" specified more than once"));
                }
            }
            insert.columns.clone()
        };

        let proposed = self.insert_records(insert, schema, &columns, &ctx).await?;
        let shape = Shape::single(alias.clone(), schema.column_names());
        let returning = returning_projection(&insert.returning, &shape, &ctx)?;

        let mut count = 0;
        let mut returned = Vec::new();
        for record in proposed {
            let stored = match self.store.insert(schema, record.clone(), &self.mutation).await {
                Ok(stored) => Some(stored),
                Err(ExecError::Conflict { table, existing }) => {
                    let Some(on_conflict) = insert
                        .on_conflict
                        .as_ref()
                        .filter(|oc| conflict_target_matches(oc, schema))
                    else {
                        return Err(ExecError::Conflict { table, existing });
                    };
                    debug!(%table, action = ?on_conflict.action, "resolving insert conflict");
                    self.resolve_conflict(on_conflict, schema, &alias, existing, record, &ctx)
                        .await?
                }
                Err(e) => return Err(e),
            };

            let Some(stored) = stored else {
                continue;
            };
            count += 1;
            if let Some(projection) = &returning {
                let row = Row::new(CompositeRow::single(alias.clone(), stored));
                returned.push(self.project(projection, &row, &ctx).await?);
            }
        }

        debug!(table = %schema.qualified_name(), count, "inserted rows");
        Ok(mutation_result(returning, returned, count))
    }

    /// Full records to insert, in schema column order, with defaults filled
    /// in and values cast to their column types.
    async fn insert_records(
        &self,
        insert: &Insert,
        schema: &TableSchema,
        columns: &[String],
        ctx: &QueryContext,
    ) -> Result<Vec<Record>> {
        match &insert.source {
            InsertSource::Values(rows) => {
                let mut out = Vec::with_capacity(rows.len());
                for values in rows {
                    if values.len() != columns.len() {
                        return Err(structural!(
                            "INSERT has {} target columns but {} expressions",
                            columns.len(),
                            values.len()
                        ));
                    }
                    let mut provided = Record::with_capacity(columns.len());
                    for (name, value) in columns.iter().zip(values) {
                        let column = schema_column(schema, name)?;
                        let value = match value {
                            ValueOrDefault::Expr(expr) => {
                                self.expr()
                                    .evaluate_to_scalar(expr, &Row::empty(), ctx)
                                    .await?
                            }
                            ValueOrDefault::Default => self.default_value(column, ctx).await?,
                        };
                        provided.insert(name.clone(), value);
                    }
                    out.push(self.complete_record(schema, provided, ctx).await?);
                }
                Ok(out)
            }
            InsertSource::Query(query) => {
                let output = self.collect_query(query, ctx.nested()?).await?;
                if output.columns.len() != columns.len() {
                    return Err(structural!(
                        "INSERT has {} target columns but the query returns {}",
                        columns.len(),
                        output.columns.len()
                    ));
                }
                let mut out = Vec::with_capacity(output.rows.len());
                for source in &output.rows {
                    let provided = columns.iter().cloned().zip(source.values().cloned()).collect();
                    out.push(self.complete_record(schema, provided, ctx).await?);
                }
                Ok(out)
            }
            InsertSource::DefaultValues => {
                Ok(vec![self.complete_record(schema, Record::new(), ctx).await?])
            }
            InsertSource::Set(assignments) => {
                let mut record = self.complete_record(schema, Record::new(), ctx).await?;
                let assignments: Vec<&Assignment> = assignments.iter().collect();
                self.apply_assignments(schema, &assignments, &Row::empty(), &mut record, ctx)
                    .await?;
                Ok(vec![record])
            }
        }
    }

    /// Value of a column's DEFAULT. NULL without one, which leaves identity
    /// columns for the store to fill.
    async fn default_value(&self, column: &ColumnSchema, ctx: &QueryContext) -> Result<ScalarValue> {
        match &column.default {
            Some(expr) => {
                self.expr()
                    .evaluate_to_scalar(expr, &Row::empty(), ctx)
                    .await
            }
            None => Ok(ScalarValue::Null),
        }
    }

    /// Fill columns missing from `provided` with their defaults.
    async fn complete_record(
        &self,
        schema: &TableSchema,
        mut provided: Record,
        ctx: &QueryContext,
    ) -> Result<Record> {
        let mut record = Record::with_capacity(schema.columns.len());
        for column in &schema.columns {
            let value = match provided.shift_remove(&column.name) {
                Some(value) => value,
                None => self.default_value(column, ctx).await?,
            };
            record.insert(column.name.clone(), cast(value, &column.datatype)?);
        }
        Ok(record)
    }

    /// Evaluate SET assignments against `row` into `record`. Every
    /// assignment sees the values of `row`, not earlier assignments.
    async fn apply_assignments(
        &self,
        schema: &TableSchema,
        assignments: &[&Assignment],
        row: &Row,
        record: &mut Record,
        ctx: &QueryContext,
    ) -> Result<()> {
        for assignment in assignments {
            let column = schema_column(schema, &assignment.target.name)?;
            let value = match &assignment.value {
                ValueOrDefault::Expr(expr) => self.expr().evaluate_to_scalar(expr, row, ctx).await?,
                ValueOrDefault::Default => self.default_value(column, ctx).await?,
            };
            record.insert(column.name.clone(), cast(value, &column.datatype)?);
        }
        Ok(())
    }

    /// Apply an ON CONFLICT action. Returns the updated record, or `None`
    /// if the proposed row was dropped.
    async fn resolve_conflict(
        &self,
        on_conflict: &OnConflict,
        schema: &TableSchema,
        alias: &str,
        existing: Record,
        proposed: Record,
        ctx: &QueryContext,
    ) -> Result<Option<Record>> {
        let (assignments, selection) = match &on_conflict.action {
            ConflictAction::DoNothing => return Ok(None),
            ConflictAction::DoUpdate {
                assignments,
                selection,
            } => (assignments, selection),
        };

        let mut data = CompositeRow::single(alias, existing.clone());
        data.insert(EXCLUDED_ALIAS, proposed);
        let row = Row::new(data);
        if !self.filter_passes(selection.as_ref(), &row, ctx).await? {
            return Ok(None);
        }

        let mut updated = existing.clone();
        let assignments: Vec<&Assignment> = assignments.iter().collect();
        self.apply_assignments(schema, &assignments, &row, &mut updated, ctx)
            .await?;
        let stored = self
            .store
            .update(schema, &existing, updated, &self.mutation)
            .await?;
        Ok(Some(stored))
    }

    /// Rows of a FROM clause passing `selection`, fully collected.
    async fn matching_rows(
        &self,
        items: &[FromItem],
        origins: &[TableSchema],
        selection: Option<&Expr>,
        ctx: &QueryContext,
    ) -> Result<Vec<Row>> {
        let mut stream = self.open_from(items, origins, ctx)?;
        let mut rows = Vec::new();
        while let Some(data) = stream.try_next().await? {
            let row = Row::new(data);
            if self.filter_passes(selection, &row, ctx).await? {
                rows.push(row);
            }
        }
        debug!(rows = rows.len(), "collected mutation candidates");
        Ok(rows)
    }

    pub(crate) async fn update(&self, update: &Update, ctx: QueryContext) -> Result<QueryResult> {
        let origins = update.origin_schemas();
        let targets = mutable_tables(std::slice::from_ref(&update.table), origins, &ctx)?;
        if targets.is_empty() {
            return Err(structural!("UPDATE target must be a base table"));
        }

        let mut by_alias: IndexMap<String, Vec<&Assignment>> = IndexMap::new();
        for assignment in &update.assignments {
            let name = &assignment.target.name;
            let alias = match &assignment.target.relation {
                Some(relation) => relation.clone(),
                None => targets
                    .iter()
                    .find(|(_, schema)| schema.column(name).is_some())
                    .map(|(alias, _)| alias.clone())
                    .ok_or_else(|| structural!("column \"{name}\" does not exist"))?,
            };
            let schema = targets
                .get(&alias)
                .ok_or_else(|| structural!("relation \"{alias}\" is not a target of UPDATE"))?;
            schema_column(schema, name)?;
            by_alias.entry(alias).or_default().push(assignment);
        }

        let items: Vec<FromItem> = std::iter::once(update.table.clone())
            .chain(update.from.iter().cloned())
            .collect();
        let shape = ShapeResolver::new(&ctx).from_shape(&items, origins)?;
        let returning = returning_projection(&update.returning, &shape, &ctx)?;
        let rows = self
            .matching_rows(&items, origins, update.selection.as_ref(), &ctx)
            .await?;

        let mut seen = HashSet::new();
        let mut count = 0;
        let mut returned = Vec::new();
        for row in rows {
            let mut data = (*row.data).clone();
            let mut touched = false;
            for (alias, assignments) in &by_alias {
                let (Some(schema), Some(old)) = (targets.get(alias), row.data.get(alias)) else {
                    continue;
                };
                // Null-filled side of an outer join.
                if old.values().all(ScalarValue::is_null) {
                    continue;
                }
                if !seen.insert((alias.clone(), record_key(schema, old))) {
                    continue;
                }

                let mut new = old.clone();
                self.apply_assignments(schema, assignments, &row, &mut new, &ctx)
                    .await?;
                let stored = self.store.update(schema, old, new, &self.mutation).await?;
                data.insert(alias.clone(), stored);
                count += 1;
                touched = true;
            }

            if touched {
                if let Some(projection) = &returning {
                    returned.push(self.project(projection, &Row::new(data), &ctx).await?);
                }
            }
        }

        debug!(count, "updated rows");
        Ok(mutation_result(returning, returned, count))
    }

    pub(crate) async fn delete(&self, delete: &Delete, ctx: QueryContext) -> Result<QueryResult> {
        let origins = delete.origin_schemas();
        let items: Vec<FromItem> = delete.from.iter().chain(&delete.using).cloned().collect();
        let tables = mutable_tables(&items, origins, &ctx)?;

        let targets = if delete.targets.is_empty() {
            let first = delete
                .from
                .first()
                .ok_or_else(|| structural!("DELETE requires a target relation"))?;
            match &first.relation {
                TableFactor::Table { name, alias } => vec![
                    alias
                        .as_ref()
                        .map(|a| a.name.clone())
                        .unwrap_or_else(|| name.name.clone()),
                ],
                _ => return Err(structural!("DELETE target must be a base table")),
            }
        } else {
            delete.targets.clone()
        };
        for target in &targets {
            if !tables.contains_key(target) {
                return Err(structural!(
                    "relation \"{target}\" is not a table in the FROM clause of DELETE"
                ));
            }
        }

        let shape = ShapeResolver::new(&ctx).from_shape(&items, origins)?;
        let returning = returning_projection(&delete.returning, &shape, &ctx)?;
        let rows = self
            .matching_rows(&items, origins, delete.selection.as_ref(), &ctx)
            .await?;

        let mut seen = HashSet::new();
        let mut count = 0;
        let mut returned = Vec::new();
        for row in rows {
            let mut touched = false;
            for target in &targets {
                let (Some(schema), Some(old)) = (tables.get(target), row.data.get(target)) else {
                    continue;
                };
                if old.values().all(ScalarValue::is_null) {
                    continue;
                }
                if !seen.insert((target.clone(), record_key(schema, old))) {
                    continue;
                }
                self.store.delete(schema, old, &self.mutation).await?;
                count += 1;
                touched = true;
            }

            if touched {
                if let Some(projection) = &returning {
                    returned.push(self.project(projection, &row, &ctx).await?);
                }
            }
        }

        debug!(count, "deleted rows");
        Ok(mutation_result(returning, returned, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::{self, *};
    use crate::ast::{ColumnRef, DataType, JoinKind, JoinConstraint, ObjectName};
    use crate::config::Dialect;
    use crate::row::record;
    use crate::store::{MemoryStore, MutationOptions, RowStore};

    fn users() -> TableSchema {
        TableSchema::new(
            "users",
            vec![
                ColumnSchema::new("id", DataType::Int).identity(),
                ColumnSchema::new("name", DataType::Text),
                ColumnSchema::new("active", DataType::Boolean).with_default(lit(true)),
            ],
        )
        .with_primary_key(["id"])
    }

    fn orders() -> TableSchema {
        TableSchema::new(
            "orders",
            vec![
                ColumnSchema::new("id", DataType::Int),
                ColumnSchema::new("user_id", DataType::Int),
            ],
        )
        .with_primary_key(["id"])
    }

    async fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.create_table(&users(), false).await.unwrap();
        store.create_table(&orders(), false).await.unwrap();
        store
    }

    fn ctx() -> QueryContext {
        QueryContext::with_dialect(Dialect::Postgres)
    }

    fn insert(columns: &[&str], rows: Vec<Vec<Expr>>) -> Insert {
        Insert {
            table: ObjectName::new("users"),
            alias: None,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            source: InsertSource::Values(
                rows.into_iter()
                    .map(|r| r.into_iter().map(ValueOrDefault::Expr).collect())
                    .collect(),
            ),
            on_conflict: None,
            returning: Vec::new(),
            origin_schemas: vec![users()],
        }
    }

    fn set(name: &str, value: Expr) -> Assignment {
        Assignment {
            target: ColumnRef {
                relation: None,
                name: name.to_string(),
            },
            value: ValueOrDefault::Expr(value),
        }
    }

    #[tokio::test]
    async fn insert_fills_defaults_and_returns() {
        let store = store().await;
        let exec = StatementEvaluator::new(&store, MutationOptions::default());

        let mut stmt = insert(&["name"], vec![vec![lit("a")], vec![lit("b")]]);
        stmt.returning = vec![item(col("id")), item(col("active"))];
        let result = exec.insert(&stmt, ctx()).await.unwrap();
        assert_eq!(vec!["id", "active"], result.columns());
        assert_eq!(
            vec![
                record([("id", ScalarValue::Int64(1)), ("active", ScalarValue::Boolean(true))]),
                record([("id", ScalarValue::Int64(2)), ("active", ScalarValue::Boolean(true))]),
            ],
            result.rows()
        );
    }

    #[tokio::test]
    async fn insert_column_count_mismatch() {
        let store = store().await;
        let exec = StatementEvaluator::new(&store, MutationOptions::default());
        let stmt = insert(&["id", "name"], vec![vec![lit(1)]]);
        let err = exec.insert(&stmt, ctx()).await.unwrap_err();
        assert!(matches!(err, ExecError::Structural(_)), "{err}");
    }

    #[tokio::test]
    async fn conflict_without_handler_propagates() {
        let store = store().await;
        let exec = StatementEvaluator::new(&store, MutationOptions::default());
        let stmt = insert(&["id", "name"], vec![vec![lit(1), lit("a")]]);
        exec.insert(&stmt, ctx()).await.unwrap();
        let err = exec.insert(&stmt, ctx()).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn on_conflict_do_nothing_and_do_update() {
        let store = store().await;
        let exec = StatementEvaluator::new(&store, MutationOptions::default());
        exec.insert(&insert(&["id", "name"], vec![vec![lit(1), lit("a")]]), ctx())
            .await
            .unwrap();

        let mut stmt = insert(&["id", "name"], vec![vec![lit(1), lit("b")]]);
        stmt.on_conflict = Some(OnConflict {
            target: vec!["id".to_string()],
            action: ConflictAction::DoNothing,
        });
        let result = exec.insert(&stmt, ctx()).await.unwrap();
        assert_eq!(QueryResult::RowCount(0), result);

        stmt.on_conflict = Some(OnConflict {
            target: vec!["id".to_string()],
            action: ConflictAction::DoUpdate {
                assignments: vec![set("name", qcol(EXCLUDED_ALIAS, "name"))],
                selection: None,
            },
        });
        let result = exec.insert(&stmt, ctx()).await.unwrap();
        assert_eq!(QueryResult::RowCount(1), result);
        assert_eq!(
            vec![record([
                ("id", ScalarValue::Int64(1)),
                ("name", ScalarValue::from("b")),
                ("active", ScalarValue::Boolean(true)),
            ])],
            store.records(&ObjectName::new("users")).unwrap()
        );
    }

    #[tokio::test]
    async fn conflict_target_must_match_key() {
        let store = store().await;
        let exec = StatementEvaluator::new(&store, MutationOptions::default());
        let mut stmt = insert(&["id", "name"], vec![vec![lit(1), lit("a")]]);
        exec.insert(&stmt, ctx()).await.unwrap();
        stmt.on_conflict = Some(OnConflict {
            target: vec!["name".to_string()],
            action: ConflictAction::DoNothing,
        });
        assert!(exec.insert(&stmt, ctx()).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn update_from_join() {
        let store = store().await;
        let exec = StatementEvaluator::new(&store, MutationOptions::default());
        exec.insert(
            &insert(&["name"], vec![vec![lit("a")], vec![lit("b")], vec![lit("c")]]),
            ctx(),
        )
        .await
        .unwrap();
        for (id, user_id) in [(1, 1), (2, 1), (3, 3)] {
            store
                .insert(
                    &orders(),
                    record([("id", id), ("user_id", user_id)]),
                    &MutationOptions::default(),
                )
                .await
                .unwrap();
        }

        // UPDATE users SET active = false FROM orders WHERE orders.user_id = users.id
        let update = Update {
            table: from(table("users")),
            assignments: vec![set("active", lit(false))],
            from: vec![from(table("orders"))],
            selection: Some(eq(qcol("orders", "user_id"), qcol("users", "id"))),
            returning: Vec::new(),
            origin_schemas: vec![users(), orders()],
        };
        let result = exec.update(&update, ctx()).await.unwrap();
        // User 1 matches two orders but is updated once.
        assert_eq!(QueryResult::RowCount(2), result);

        let active: Vec<_> = store
            .records(&ObjectName::new("users"))
            .unwrap()
            .into_iter()
            .map(|r| r["active"].clone())
            .collect();
        assert_eq!(
            vec![
                ScalarValue::Boolean(false),
                ScalarValue::Boolean(true),
                ScalarValue::Boolean(false)
            ],
            active
        );
    }

    #[tokio::test]
    async fn update_assignments_see_old_values() {
        let store = store().await;
        let exec = StatementEvaluator::new(&store, MutationOptions::default());
        exec.insert(&insert(&["id", "name"], vec![vec![lit(1), lit("a")]]), ctx())
            .await
            .unwrap();

        let update = Update {
            table: from(table("users")),
            assignments: vec![set("name", build::cast(col("id"), DataType::Text)), set("id", lit(10))],
            from: Vec::new(),
            selection: None,
            returning: vec![SelectItem::Wildcard],
            origin_schemas: vec![users()],
        };
        let result = exec.update(&update, ctx()).await.unwrap();
        assert_eq!(
            vec![record([
                ("id", ScalarValue::Int64(10)),
                ("name", ScalarValue::from("1")),
                ("active", ScalarValue::Boolean(true)),
            ])],
            result.rows()
        );
    }

    #[tokio::test]
    async fn multi_table_delete() {
        let store = store().await;
        let exec = StatementEvaluator::new(&store, MutationOptions::default());
        exec.insert(&insert(&["name"], vec![vec![lit("a")], vec![lit("b")]]), ctx())
            .await
            .unwrap();
        store
            .insert(
                &orders(),
                record([("id", 1), ("user_id", 2)]),
                &MutationOptions::default(),
            )
            .await
            .unwrap();

        // DELETE u, o FROM users u JOIN orders o ON o.user_id = u.id
        let mut item = from(table_as("users", "u"));
        item.joins.push(join(
            table_as("orders", "o"),
            JoinKind::Inner,
            JoinConstraint::On(eq(qcol("o", "user_id"), qcol("u", "id"))),
        ));
        let delete = Delete {
            targets: vec!["u".to_string(), "o".to_string()],
            from: vec![item],
            using: Vec::new(),
            selection: None,
            returning: Vec::new(),
            origin_schemas: vec![users(), orders()],
        };
        let result = exec.delete(&delete, ctx()).await.unwrap();
        assert_eq!(QueryResult::RowCount(2), result);
        assert_eq!(1, store.records(&ObjectName::new("users")).unwrap().len());
        assert!(store.records(&ObjectName::new("orders")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_unknown_target() {
        let store = store().await;
        let exec = StatementEvaluator::new(&store, MutationOptions::default());
        let delete = Delete {
            targets: vec!["x".to_string()],
            from: vec![from(table("users"))],
            using: Vec::new(),
            selection: None,
            returning: Vec::new(),
            origin_schemas: vec![users()],
        };
        let err = exec.delete(&delete, ctx()).await.unwrap_err();
        assert!(matches!(err, ExecError::Structural(_)));
    }
}
