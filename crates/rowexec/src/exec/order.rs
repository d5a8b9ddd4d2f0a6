//! ORDER BY, and the back-reference resolution shared with GROUP BY.
//!
//! Resolution never touches the statement tree. It produces new key lists
//! in which ordinals and output aliases point at projected columns.

use futures::stream::{self, StreamExt, TryStreamExt};

use super::shape::ProjectedColumn;
use super::{QueryStream, StatementEvaluator};
use crate::ast::{Expr, GroupByExpr, OrderByExpr};
use crate::context::QueryContext;
use crate::errors::{Result, structural};
use crate::row::{CompositeRow, Record, Row};
use crate::util::{SortOrder, compare_sort_keys};
use crate::value::ScalarValue;

/// A resolved ORDER BY key.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderKey {
    /// Index of a projected output column.
    Output(usize),
    /// Expression evaluated against the pre-projection row.
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOrderBy {
    pub key: OrderKey,
    pub order: SortOrder,
}

/// Resolve `ORDER BY` keys against the output columns.
///
/// An integer literal is a 1-based output position. An unqualified column
/// naming an output column refers to that column, output names win over
/// input columns. Anything else is evaluated per row.
pub fn resolve_order_by(
    order_by: &[OrderByExpr],
    columns: &[String],
    ctx: &QueryContext,
) -> Result<Vec<ResolvedOrderBy>> {
    order_by
        .iter()
        .map(|o| {
            let key = match output_reference(&o.expr, columns, "ORDER BY")? {
                Some(idx) => OrderKey::Output(idx),
                None => OrderKey::Expr(o.expr.clone()),
            };
            Ok(ResolvedOrderBy {
                key,
                order: SortOrder::from_order_by(o, ctx.dialect),
            })
        })
        .collect()
}

fn output_reference(expr: &Expr, columns: &[String], clause: &str) -> Result<Option<usize>> {
    match expr {
        Expr::Literal(ScalarValue::Int64(pos)) => {
            if *pos < 1 || *pos as usize > columns.len() {
                return Err(structural!(
                    "{clause} position {pos} is not in select list"
                ));
            }
            Ok(Some(*pos as usize - 1))
        }
        Expr::Column(col) if col.relation.is_none() => {
            Ok(columns.iter().position(|name| *name == col.name))
        }
        _ => Ok(None),
    }
}

/// Replace ordinal and output-alias references in GROUP BY with the
/// projected expressions they name.
///
/// An unqualified name only refers to an output alias when no input column
/// has that name.
pub fn resolve_group_by(
    group_by: &[GroupByExpr],
    projection: &[ProjectedColumn],
    input_has_column: impl Fn(&str) -> bool,
) -> Result<Vec<GroupByExpr>> {
    let names: Vec<String> = projection.iter().map(|c| c.name.clone()).collect();
    let resolve = |expr: &Expr| -> Result<Expr> {
        if let Expr::Column(col) = expr {
            if col.relation.is_none() && input_has_column(&col.name) {
                return Ok(expr.clone());
            }
        }
        Ok(match output_reference(expr, &names, "GROUP BY")? {
            Some(idx) => projection[idx].expr.clone(),
            None => expr.clone(),
        })
    };
    let resolve_all = |exprs: &[Expr]| exprs.iter().map(resolve).collect::<Result<Vec<_>>>();

    group_by
        .iter()
        .map(|entry| {
            Ok(match entry {
                GroupByExpr::Expr(expr) => GroupByExpr::Expr(resolve(expr)?),
                GroupByExpr::GroupingSets(sets) => GroupByExpr::GroupingSets(
                    sets.iter()
                        .map(|set| resolve_all(set))
                        .collect::<Result<_>>()?,
                ),
                GroupByExpr::Rollup(exprs) => GroupByExpr::Rollup(resolve_all(exprs)?),
                GroupByExpr::Cube(exprs) => GroupByExpr::Cube(resolve_all(exprs)?),
            })
        })
        .collect()
}

/// Row used to evaluate ORDER BY expressions over already projected
/// output.
pub fn output_row(record: &Record) -> Row {
    Row::new(CompositeRow::single("", record.clone()))
}

impl StatementEvaluator<'_> {
    /// Evaluate the sort key of one projected row.
    pub(crate) async fn sort_key(
        &self,
        keys: &[ResolvedOrderBy],
        row: &Row,
        record: &Record,
        ctx: &QueryContext,
    ) -> Result<Vec<ScalarValue>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            let value = match &key.key {
                OrderKey::Output(idx) => record
                    .get_index(*idx)
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default(),
                OrderKey::Expr(expr) => self.expr().evaluate(expr, row, ctx).await?,
            };
            values.push(value);
        }
        Ok(values)
    }

    /// Sort the output of a non-SELECT body (set operation, VALUES, TABLE)
    /// by keys resolved against its output columns.
    pub(crate) async fn sort_output<'a>(
        &'a self,
        opened: QueryStream<'a>,
        order_by: &[OrderByExpr],
        ctx: &QueryContext,
    ) -> Result<QueryStream<'a>> {
        let keys = resolve_order_by(order_by, &opened.columns, ctx)?;
        let records: Vec<Record> = opened.rows.try_collect().await?;

        let mut keyed = Vec::with_capacity(records.len());
        for record in records {
            let row = output_row(&record);
            let key = self.sort_key(&keys, &row, &record, ctx).await?;
            keyed.push((key, record));
        }
        sort_keyed(&mut keyed, &keys);

        Ok(QueryStream {
            columns: opened.columns,
            rows: stream::iter(keyed.into_iter().map(|(_, record)| Ok(record))).boxed(),
        })
    }
}

/// Stable sort of `(key, item)` pairs.
pub fn sort_keyed<T>(items: &mut [(Vec<ScalarValue>, T)], keys: &[ResolvedOrderBy]) {
    let orders: Vec<SortOrder> = keys.iter().map(|k| k.order).collect();
    items.sort_by(|a, b| compare_sort_keys(&a.0, &b.0, &orders));
}
