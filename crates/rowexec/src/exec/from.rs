//! FROM clause sources and joins.
//!
//! Every source produces a stream of composite rows. Joins are nested
//! loops: the left side streams, the right side is collected once, or once
//! per left row when it is LATERAL.

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use indexmap::IndexMap;
use tracing::trace;

use super::shape::{
    NamedRelation, Shape, ShapeResolver, UsingColumn, derived_alias, function_alias,
    function_columns, rename_columns, values_column_name,
};
use super::{QueryStream, StatementEvaluator, record_values, visit, zip_record};
use crate::ast::{
    Expr, FromItem, FunctionCall, JoinConstraint, JoinKind, ObjectName, TableFactor, TableSchema,
};
use crate::context::QueryContext;
use crate::errors::{Result, internal, structural};
use crate::expr::functions;
use crate::row::{CompositeRow, Record, Row};
use crate::value::ScalarValue;

pub(crate) type CompositeStream<'a> = BoxStream<'a, Result<CompositeRow>>;

static CROSS_JOIN: JoinConstraint = JoinConstraint::None;

/// Tracks which rows on the right side of an outer join found a match.
#[derive(Debug, Default)]
struct MatchTracker {
    matches: Vec<bool>,
}

impl MatchTracker {
    fn ensure_initialized(&mut self, len: usize) {
        if self.matches.len() < len {
            self.matches.resize(len, false);
        }
    }

    fn set_match(&mut self, idx: usize) {
        self.matches[idx] = true;
    }

    fn is_matched(&self, idx: usize) -> bool {
        self.matches.get(idx).copied().unwrap_or(false)
    }
}

/// Right side of a join: a single factor, or a whole comma-separated item.
#[derive(Debug, Clone, Copy)]
enum JoinInput<'a> {
    Factor(&'a TableFactor),
    Item(&'a FromItem),
}

impl JoinInput<'_> {
    fn is_lateral(&self) -> bool {
        match self {
            JoinInput::Factor(factor) => factor_is_lateral(factor),
            JoinInput::Item(item) => item_is_lateral(item),
        }
    }
}

fn factor_is_lateral(factor: &TableFactor) -> bool {
    match factor {
        TableFactor::NestedJoin(item) => item_is_lateral(item),
        other => other.is_lateral(),
    }
}

fn item_is_lateral(item: &FromItem) -> bool {
    factor_is_lateral(&item.relation) || item.joins.iter().any(|j| factor_is_lateral(&j.relation))
}

enum JoinPredicate<'a> {
    On(&'a Expr),
    Using(Vec<UsingColumn>),
    Always,
}

impl<'a> JoinPredicate<'a> {
    fn new(constraint: &'a JoinConstraint, using: Vec<UsingColumn>) -> Self {
        match constraint {
            JoinConstraint::On(expr) => JoinPredicate::On(expr),
            JoinConstraint::Using(_) | JoinConstraint::Natural => JoinPredicate::Using(using),
            JoinConstraint::None => JoinPredicate::Always,
        }
    }
}

/// Value of a merged column on one side of a join: the first non-NULL value
/// among the aliases providing it.
fn merged_value(row: &CompositeRow, name: &str, sources: &[String]) -> ScalarValue {
    sources
        .iter()
        .filter_map(|alias| row.get(alias).and_then(|rec| rec.get(name)))
        .find(|v| !v.is_null())
        .cloned()
        .unwrap_or_default()
}

impl<'s> StatementEvaluator<'s> {
    /// Open a FROM clause. Comma-separated items are cross joined. An empty
    /// FROM produces a single row with no relations.
    pub(crate) fn open_from<'a>(
        &'a self,
        items: &'a [FromItem],
        origins: &'a [TableSchema],
        ctx: &QueryContext,
    ) -> Result<CompositeStream<'a>> {
        let Some((first, rest)) = items.split_first() else {
            return Ok(stream::once(async { Ok(CompositeRow::new()) }).boxed());
        };

        let resolver = ShapeResolver::new(ctx);
        let mut shape = resolver.item_shape(first, origins)?;
        let mut rows = self.open_item(first, origins, ctx)?;
        for item in rest {
            let right_shape = resolver.item_shape(item, origins)?;
            rows = self.join_stream(
                rows,
                shape.clone(),
                JoinInput::Item(item),
                right_shape.clone(),
                JoinKind::Cross,
                JoinPredicate::new(&CROSS_JOIN, Vec::new()),
                origins,
                ctx.clone(),
            );
            shape.extend(right_shape)?;
        }
        Ok(rows)
    }

    fn open_item<'a>(
        &'a self,
        item: &'a FromItem,
        origins: &'a [TableSchema],
        ctx: &QueryContext,
    ) -> Result<CompositeStream<'a>> {
        let resolver = ShapeResolver::new(ctx);
        let mut shape = resolver.factor_shape(&item.relation, origins)?;
        let mut rows = self.open_factor(&item.relation, origins, ctx.clone());
        for join in &item.joins {
            let right_shape = resolver.factor_shape(&join.relation, origins)?;
            let left_shape = shape.clone();
            let using = shape.join(right_shape.clone(), &join.constraint)?;
            rows = self.join_stream(
                rows,
                left_shape,
                JoinInput::Factor(&join.relation),
                right_shape,
                join.kind,
                JoinPredicate::new(&join.constraint, using),
                origins,
                ctx.clone(),
            );
        }
        Ok(rows)
    }

    fn open_input<'a>(
        &'a self,
        input: JoinInput<'a>,
        origins: &'a [TableSchema],
        ctx: &QueryContext,
    ) -> Result<CompositeStream<'a>> {
        match input {
            JoinInput::Factor(factor) => Ok(self.open_factor(factor, origins, ctx.clone())),
            JoinInput::Item(item) => self.open_item(item, origins, ctx),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn join_stream<'a>(
        &'a self,
        left: CompositeStream<'a>,
        left_shape: Shape,
        right: JoinInput<'a>,
        right_shape: Shape,
        kind: JoinKind,
        predicate: JoinPredicate<'a>,
        origins: &'a [TableSchema],
        ctx: QueryContext,
    ) -> CompositeStream<'a> {
        Box::pin(async_stream::try_stream! {
            let lateral = right.is_lateral();
            let emit_unmatched_left = matches!(kind, JoinKind::Left | JoinKind::Full);
            let emit_unmatched_right = matches!(kind, JoinKind::Right | JoinKind::Full);

            let mut cached: Option<Arc<[CompositeRow]>> = None;
            let mut tracker = MatchTracker::default();
            // Right rows seen across LATERAL re-evaluations, keyed by
            // structural hash.
            let mut lateral_seen: IndexMap<u64, (CompositeRow, bool)> = IndexMap::new();

            let mut left = left;
            while let Some(left_row) = left.next().await {
                let left_row = left_row?;
                let rights: Arc<[CompositeRow]> = if lateral {
                    let scope = ctx.with_outer_row(&Row::new(left_row.clone()));
                    let rows: Vec<CompositeRow> =
                        self.open_input(right, origins, &scope)?.try_collect().await?;
                    rows.into()
                } else {
                    match &cached {
                        Some(rows) => rows.clone(),
                        None => {
                            let rows: Vec<CompositeRow> =
                                self.open_input(right, origins, &ctx)?.try_collect().await?;
                            trace!(rows = rows.len(), "materialized join input");
                            let rows: Arc<[CompositeRow]> = rows.into();
                            tracker.ensure_initialized(rows.len());
                            cached = Some(rows.clone());
                            rows
                        }
                    }
                };

                let mut matched = false;
                for (idx, right_row) in rights.iter().enumerate() {
                    let joined = left_row.join(right_row);
                    let is_match = self
                        .join_matches(&predicate, &left_row, right_row, &joined, &ctx)
                        .await?;
                    if lateral && emit_unmatched_right {
                        let entry = lateral_seen
                            .entry(right_row.structural_hash())
                            .or_insert_with(|| (right_row.clone(), false));
                        entry.1 |= is_match;
                    } else if is_match && emit_unmatched_right {
                        tracker.set_match(idx);
                    }
                    if is_match {
                        matched = true;
                        yield joined;
                    }
                }
                if !matched && emit_unmatched_left {
                    yield left_row.join(&right_shape.null_row());
                }
            }

            if emit_unmatched_right {
                let left_nulls = left_shape.null_row();
                if lateral {
                    for (_, (right_row, matched)) in lateral_seen {
                        if !matched {
                            yield left_nulls.join(&right_row);
                        }
                    }
                } else {
                    let rights: Arc<[CompositeRow]> = match cached {
                        Some(rows) => rows,
                        None => {
                            let rows: Vec<CompositeRow> =
                                self.open_input(right, origins, &ctx)?.try_collect().await?;
                            rows.into()
                        }
                    };
                    for (idx, right_row) in rights.iter().enumerate() {
                        if !tracker.is_matched(idx) {
                            yield left_nulls.join(right_row);
                        }
                    }
                }
            }
        })
    }

    async fn join_matches(
        &self,
        predicate: &JoinPredicate<'_>,
        left: &CompositeRow,
        right: &CompositeRow,
        joined: &CompositeRow,
        ctx: &QueryContext,
    ) -> Result<bool> {
        match predicate {
            JoinPredicate::Always => Ok(true),
            JoinPredicate::On(expr) => {
                let row = Row::new(joined.clone());
                Ok(self.expr().evaluate(expr, &row, ctx).await?.is_truthy())
            }
            JoinPredicate::Using(columns) => Ok(columns.iter().all(|col| {
                let l = merged_value(left, &col.name, &col.left);
                let r = merged_value(right, &col.name, &col.right);
                l.sql_eq(&r)
            })),
        }
    }

    fn open_factor<'a>(
        &'a self,
        factor: &'a TableFactor,
        origins: &'a [TableSchema],
        ctx: QueryContext,
    ) -> CompositeStream<'a> {
        Box::pin(async_stream::try_stream! {
            match factor {
                TableFactor::Table { name, alias } => {
                    let alias_name = alias.as_ref().map(|a| a.name.as_str()).unwrap_or(&name.name);
                    let (columns, mut rows) = self.scan_relation(name, origins, &ctx)?;
                    let columns = rename_columns(alias_name, columns, alias.as_ref())?;
                    while let Some(values) = rows.next().await {
                        yield CompositeRow::single(alias_name, zip_record(&columns, values?));
                    }
                }
                TableFactor::Derived { subquery, alias, .. } => {
                    let alias_name = derived_alias(alias.as_ref());
                    if ctx.is_correlated(subquery, |q| visit::is_correlated(&ctx, q)) {
                        let opened = self.open_query(subquery, ctx.nested()?).await?;
                        let columns = rename_columns(alias_name, opened.columns, alias.as_ref())?;
                        let mut rows = opened.rows;
                        while let Some(record) = rows.next().await {
                            let values = record_values(&record?);
                            yield CompositeRow::single(alias_name, zip_record(&columns, values));
                        }
                    } else {
                        let output = self.subquery_output(subquery, &Row::empty(), &ctx).await?;
                        let columns =
                            rename_columns(alias_name, output.columns.clone(), alias.as_ref())?;
                        for record in output.rows.iter() {
                            let values = record_values(record);
                            yield CompositeRow::single(alias_name, zip_record(&columns, values));
                        }
                    }
                }
                TableFactor::Values { rows, alias } => {
                    let alias_name = alias.as_ref().map(|a| a.name.as_str()).unwrap_or("values");
                    let (columns, records) = self.values_records(rows, &Row::empty(), &ctx).await?;
                    let columns = rename_columns(alias_name, columns, alias.as_ref())?;
                    for record in records {
                        let values = record_values(&record);
                        yield CompositeRow::single(alias_name, zip_record(&columns, values));
                    }
                }
                TableFactor::Function { functions, with_ordinality, alias, .. } => {
                    let alias_name = function_alias(functions, alias.as_ref());
                    let columns = function_columns(functions, *with_ordinality, alias.as_ref())?;
                    let rows = self.function_rows(functions, *with_ordinality, &ctx).await?;
                    for values in rows {
                        yield CompositeRow::single(alias_name, zip_record(&columns, values));
                    }
                }
                TableFactor::NestedJoin(item) => {
                    let mut rows = self.open_item(item, origins, &ctx)?;
                    while let Some(row) = rows.next().await {
                        yield row?;
                    }
                }
            }
        })
    }

    /// Scan a named relation, a CTE if one is in scope and a base table
    /// otherwise. Returns the relation's own column names and a stream of
    /// values in that column order.
    fn scan_relation<'a>(
        &'a self,
        name: &'a ObjectName,
        origins: &'a [TableSchema],
        ctx: &QueryContext,
    ) -> Result<(Vec<String>, BoxStream<'a, Result<Vec<ScalarValue>>>)> {
        let (relation, columns) = ShapeResolver::new(ctx).relation_columns(name, origins)?;
        let rows = match relation {
            NamedRelation::Cte => {
                let entry = ctx
                    .cte(&name.name)
                    .cloned()
                    .ok_or_else(|| internal!("CTE \"{}\" is not materialized", name.name))?;
                let len = entry.rows.len();
                stream::iter((0..len).map(move |idx| Ok(record_values(&entry.rows[idx])))).boxed()
            }
            NamedRelation::Table(schema) => {
                let buffered = ctx.buffered;
                let names = columns.clone();
                Box::pin(async_stream::try_stream! {
                    let mut cursor = self.store.cursor(schema).await?;
                    if buffered {
                        let records: Vec<Record> = cursor.try_collect().await?;
                        trace!(table = %schema.qualified_name(), rows = records.len(), "buffered scan");
                        for record in records {
                            yield project_record(&names, &record);
                        }
                    } else {
                        while let Some(record) = cursor.next().await {
                            yield project_record(&names, &record?);
                        }
                    }
                }) as BoxStream<'a, Result<Vec<ScalarValue>>>
            }
        };
        Ok((columns, rows))
    }

    /// `TABLE name`.
    pub(crate) async fn open_table_body<'a>(
        &'a self,
        name: &'a ObjectName,
        origins: &'a [TableSchema],
        ctx: QueryContext,
    ) -> Result<QueryStream<'a>> {
        let (columns, rows) = self.scan_relation(name, origins, &ctx)?;
        let names = columns.clone();
        Ok(QueryStream {
            columns,
            rows: rows
                .map_ok(move |values| zip_record(&names, values))
                .boxed(),
        })
    }

    /// Evaluate the rows of a VALUES list. Every row must have the same
    /// width.
    pub(crate) async fn values_records(
        &self,
        rows: &[Vec<Expr>],
        row: &Row,
        ctx: &QueryContext,
    ) -> Result<(Vec<String>, Vec<Record>)> {
        let width = rows.first().map(|r| r.len()).unwrap_or(0);
        if rows.iter().any(|r| r.len() != width) {
            return Err(structural!("VALUES lists must all be the same length"));
        }
        let columns: Vec<String> = (0..width)
            .map(|idx| values_column_name(idx, ctx.dialect))
            .collect();

        let mut records = Vec::with_capacity(rows.len());
        for exprs in rows {
            let mut values = Vec::with_capacity(width);
            for expr in exprs {
                values.push(self.expr().evaluate_to_scalar(expr, row, ctx).await?);
            }
            records.push(zip_record(&columns, values));
        }
        Ok((columns, records))
    }

    /// Rows of a function source. Multiple functions are zipped, shorter
    /// ones padded with NULL. Scalar functions produce a single row.
    async fn function_rows(
        &self,
        calls: &[FunctionCall],
        with_ordinality: bool,
        ctx: &QueryContext,
    ) -> Result<Vec<Vec<ScalarValue>>> {
        let row = Row::empty();
        let mut iters: Vec<functions::ValueIter> = Vec::with_capacity(calls.len());
        for call in calls {
            match functions::find_table_function(&call.name) {
                Some(func) => {
                    func.check_arity(call.args.len())?;
                    let args = self.expr().evaluate_all(&call.args, &row, ctx).await?;
                    iters.push((func.function)(args)?);
                }
                None => {
                    let value = self
                        .expr()
                        .evaluate(&Expr::Function(call.clone()), &row, ctx)
                        .await?;
                    iters.push(Box::new(std::iter::once(value)));
                }
            }
        }

        let mut rows = Vec::new();
        loop {
            let values: Vec<Option<ScalarValue>> = iters.iter_mut().map(|it| it.next()).collect();
            if values.iter().all(Option::is_none) {
                break;
            }
            let mut values: Vec<ScalarValue> =
                values.into_iter().map(Option::unwrap_or_default).collect();
            if with_ordinality {
                values.push(ScalarValue::Int64(rows.len() as i64 + 1));
            }
            rows.push(values);
        }
        Ok(rows)
    }
}

/// Values of a stored record in `columns` order. Missing columns are NULL.
fn project_record(columns: &[String], record: &Record) -> Vec<ScalarValue> {
    columns
        .iter()
        .map(|col| record.get(col).cloned().unwrap_or_default())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::*;
    use crate::ast::{ColumnSchema, DataType, Join, TableAlias};
    use crate::config::Dialect;
    use crate::row::record;
    use crate::store::{MemoryStore, MutationOptions, RowStore};

    fn schema(name: &str, cols: &[&str]) -> TableSchema {
        TableSchema::new(
            name,
            cols.iter()
                .map(|c| ColumnSchema::new(*c, DataType::Int))
                .collect(),
        )
        .with_primary_key([cols[0]])
    }

    async fn store_with(tables: &[(&TableSchema, Vec<Record>)]) -> MemoryStore {
        let store = MemoryStore::new();
        for (table, rows) in tables {
            store.create_table(table, false).await.unwrap();
            for row in rows {
                store
                    .insert(table, row.clone(), &MutationOptions::default())
                    .await
                    .unwrap();
            }
        }
        store
    }

    async fn collect(
        exec: &StatementEvaluator<'_>,
        items: &[FromItem],
        origins: &[TableSchema],
    ) -> Vec<CompositeRow> {
        let ctx = QueryContext::with_dialect(Dialect::Postgres);
        exec.open_from(items, origins, &ctx)
            .unwrap()
            .try_collect()
            .await
            .unwrap()
    }

    fn joined(kind: JoinKind, constraint: JoinConstraint) -> Vec<FromItem> {
        vec![FromItem {
            relation: table("a"),
            joins: vec![Join {
                relation: table("b"),
                kind,
                constraint,
            }],
        }]
    }

    #[tokio::test]
    async fn outer_join_cardinalities() {
        let a = schema("a", &["id"]);
        let b = schema("b", &["id", "v"]);
        let store = store_with(&[
            (&a, vec![record([("id", 1)]), record([("id", 2)])]),
            (
                &b,
                vec![record([("id", 2), ("v", 20)]), record([("id", 3), ("v", 30)])],
            ),
        ])
        .await;
        let exec = StatementEvaluator::new(&store, MutationOptions::default());
        let origins = vec![a, b];
        let on = || JoinConstraint::On(eq(col("a.id"), col("b.id")));

        assert_eq!(1, collect(&exec, &joined(JoinKind::Inner, on()), &origins).await.len());
        assert_eq!(4, collect(&exec, &joined(JoinKind::Cross, JoinConstraint::None), &origins).await.len());

        let left = collect(&exec, &joined(JoinKind::Left, on()), &origins).await;
        assert_eq!(2, left.len());
        assert_eq!(Some(&ScalarValue::Null), left[0].get("b").unwrap().get("v"));

        let right = collect(&exec, &joined(JoinKind::Right, on()), &origins).await;
        assert_eq!(2, right.len());
        assert_eq!(Some(&ScalarValue::Null), right[1].get("a").unwrap().get("id"));

        assert_eq!(3, collect(&exec, &joined(JoinKind::Full, on()), &origins).await.len());
    }

    #[tokio::test]
    async fn using_join_matches_on_named_columns() {
        let a = schema("a", &["id"]);
        let b = schema("b", &["id", "v"]);
        let store = store_with(&[
            (&a, vec![record([("id", 1)]), record([("id", 2)])]),
            (&b, vec![record([("id", 2), ("v", 20)])]),
        ])
        .await;
        let exec = StatementEvaluator::new(&store, MutationOptions::default());
        let rows = collect(
            &exec,
            &joined(JoinKind::Inner, JoinConstraint::Using(vec!["id".to_string()])),
            &[a, b],
        )
        .await;
        assert_eq!(1, rows.len());
        assert_eq!(Some(&ScalarValue::Int64(20)), rows[0].get("b").unwrap().get("v"));
    }

    #[tokio::test]
    async fn lateral_function_sees_left_row() {
        let a = schema("a", &["n"]);
        let store = store_with(&[(&a, vec![record([("n", 1)]), record([("n", 3)])])]).await;
        let exec = StatementEvaluator::new(&store, MutationOptions::default());

        let series = TableFactor::Function {
            lateral: true,
            functions: vec![FunctionCall::new("generate_series", vec![lit(1), col("a.n")])],
            with_ordinality: false,
            alias: Some(TableAlias::new("s")),
        };
        let items = vec![from(table("a")), from(series)];
        let rows = collect(&exec, &items, &[a]).await;
        let values: Vec<_> = rows
            .iter()
            .map(|r| r.get("s").unwrap()["s"].clone())
            .collect();
        assert_eq!(
            vec![
                ScalarValue::Int64(1),
                ScalarValue::Int64(1),
                ScalarValue::Int64(2),
                ScalarValue::Int64(3)
            ],
            values
        );
    }

    #[tokio::test]
    async fn rows_from_zips_with_ordinality() {
        let store = MemoryStore::new();
        let exec = StatementEvaluator::new(&store, MutationOptions::default());
        let factor = TableFactor::Function {
            lateral: false,
            functions: vec![
                FunctionCall::new("generate_series", vec![lit(1), lit(3)]),
                FunctionCall::new("generate_series", vec![lit(10), lit(11)]),
            ],
            with_ordinality: true,
            alias: Some(TableAlias {
                name: "f".to_string(),
                columns: vec!["a".to_string(), "b".to_string()],
            }),
        };
        let rows = collect(&exec, &[from(factor)], &[]).await;
        assert_eq!(3, rows.len());
        assert_eq!(
            &record([
                ("a", ScalarValue::Int64(3)),
                ("b", ScalarValue::Null),
                ("ordinality", ScalarValue::Int64(3)),
            ]),
            rows[2].get("f").unwrap()
        );
    }

    #[tokio::test]
    async fn ragged_values_rejected() {
        let store = MemoryStore::new();
        let exec = StatementEvaluator::new(&store, MutationOptions::default());
        let ctx = QueryContext::with_dialect(Dialect::Postgres);
        let err = exec
            .values_records(&[vec![lit(1)], vec![lit(1), lit(2)]], &Row::empty(), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::errors::ExecError::Structural(_)));
    }

    #[tokio::test]
    async fn empty_from_is_one_row() {
        let store = MemoryStore::new();
        let exec = StatementEvaluator::new(&store, MutationOptions::default());
        let rows = collect(&exec, &[], &[]).await;
        assert_eq!(vec![CompositeRow::new()], rows);
    }
}
