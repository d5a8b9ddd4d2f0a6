//! SELECT: FROM/JOIN -> WHERE -> GROUP -> WINDOW -> ORDER BY -> PROJECT.
//!
//! A SELECT without aggregation, windows or ORDER BY streams straight
//! through. Anything else materializes the filtered rows first.

use std::collections::HashSet;

use futures::stream::{self, BoxStream, StreamExt};

use super::order::{ResolvedOrderBy, resolve_group_by, resolve_order_by, sort_keyed};
use super::shape::{ProjectedColumn, ShapeResolver, expand_projection};
use super::{QueryStream, StatementEvaluator, record_values};
use crate::ast::{Distinct, Expr, FunctionCall, OrderByExpr, Select};
use crate::context::QueryContext;
use crate::errors::{Result, evaluation};
use crate::expr::aggregate::contains_aggregate;
use crate::expr::window::collect_window_calls;
use crate::row::{Record, Row};
use crate::value::ScalarValue;

/// Check if an expression contains a windowed function call.
pub(crate) fn contains_windowed(expr: &Expr) -> bool {
    let mut calls = Vec::new();
    collect_window_calls(expr, &mut calls);
    !calls.is_empty()
}

/// How output rows are deduplicated.
#[derive(Debug)]
enum DistinctMode {
    None,
    /// Whole output rows.
    All,
    /// First row per key.
    On(Vec<ResolvedOrderBy>),
}

impl StatementEvaluator<'_> {
    pub(crate) async fn open_select<'a>(
        &'a self,
        select: &'a Select,
        order_by: &'a [OrderByExpr],
        ctx: QueryContext,
    ) -> Result<QueryStream<'a>> {
        let ctx = ctx.with_windows(&select.windows);
        let shape = ShapeResolver::new(&ctx).from_shape(&select.from, &select.origin_schemas)?;
        let projection = expand_projection(&select.projection, &shape, ctx.dialect)?;
        let columns: Vec<String> = projection.iter().map(|c| c.name.clone()).collect();

        if let Some(selection) = &select.selection {
            if contains_aggregate(selection) {
                return Err(evaluation!("aggregate functions are not allowed in WHERE"));
            }
            if contains_windowed(selection) {
                return Err(evaluation!("window functions are not allowed in WHERE"));
            }
        }
        if let Some(having) = &select.having {
            if contains_windowed(having) {
                return Err(evaluation!("window functions are not allowed in HAVING"));
            }
        }

        let aggregated = !select.group_by.is_empty()
            || select.having.is_some()
            || projection.iter().any(|c| contains_aggregate(&c.expr))
            || order_by.iter().any(|o| contains_aggregate(&o.expr));

        let mut window_calls: Vec<&FunctionCall> = Vec::new();
        for col in &projection {
            collect_window_calls(&col.expr, &mut window_calls);
        }
        for order in order_by {
            collect_window_calls(&order.expr, &mut window_calls);
        }

        let distinct = match &select.distinct {
            None => DistinctMode::None,
            Some(Distinct::Distinct) => DistinctMode::All,
            Some(Distinct::On(exprs)) => {
                let keys: Vec<OrderByExpr> = exprs
                    .iter()
                    .map(|expr| OrderByExpr {
                        expr: expr.clone(),
                        asc: None,
                        nulls_first: None,
                    })
                    .collect();
                DistinctMode::On(resolve_order_by(&keys, &columns, &ctx)?)
            }
        };

        let rows = self.open_from(&select.from, &select.origin_schemas, &ctx)?;

        if !aggregated && window_calls.is_empty() && order_by.is_empty() {
            let rows: BoxStream<'a, Result<Record>> = Box::pin(async_stream::try_stream! {
                let mut seen: HashSet<Vec<ScalarValue>> = HashSet::new();
                let mut rows = rows;
                while let Some(data) = rows.next().await {
                    let row = Row::new(data?);
                    if !self.filter_passes(select.selection.as_ref(), &row, &ctx).await? {
                        continue;
                    }
                    let record = self.project(&projection, &row, &ctx).await?;
                    if let Some(key) = self.distinct_key(&distinct, &row, &record, &ctx).await? {
                        if !seen.insert(key) {
                            continue;
                        }
                    }
                    yield record;
                }
            });
            return Ok(QueryStream { columns, rows });
        }

        let mut filtered = Vec::new();
        let mut rows = rows;
        while let Some(data) = rows.next().await {
            let row = Row::new(data?);
            if self.filter_passes(select.selection.as_ref(), &row, &ctx).await? {
                filtered.push(row);
            }
        }

        if aggregated {
            let group_by = resolve_group_by(&select.group_by, &projection, |name| {
                shape.has_column(name)
            })?;
            let groups = self.group_rows(filtered, &group_by, &shape, &ctx).await?;
            filtered = Vec::with_capacity(groups.len());
            for group in groups {
                if self.filter_passes(select.having.as_ref(), &group, &ctx).await? {
                    filtered.push(group);
                }
            }
        }

        if !window_calls.is_empty() {
            filtered = self.window_rows(filtered, &window_calls, &ctx).await?;
        }

        let keys = resolve_order_by(order_by, &columns, &ctx)?;
        let mut projected = Vec::with_capacity(filtered.len());
        for row in filtered {
            let record = self.project(&projection, &row, &ctx).await?;
            let key = self.sort_key(&keys, &row, &record, &ctx).await?;
            projected.push((key, (row, record)));
        }
        sort_keyed(&mut projected, &keys);

        let mut seen: HashSet<Vec<ScalarValue>> = HashSet::new();
        let mut out = Vec::with_capacity(projected.len());
        for (_, (row, record)) in projected {
            if let Some(key) = self.distinct_key(&distinct, &row, &record, &ctx).await? {
                if !seen.insert(key) {
                    continue;
                }
            }
            out.push(Ok(record));
        }

        Ok(QueryStream {
            columns,
            rows: stream::iter(out).boxed(),
        })
    }

    /// Evaluate a WHERE/HAVING condition. A missing condition passes, NULL
    /// does not.
    pub(crate) async fn filter_passes(
        &self,
        condition: Option<&Expr>,
        row: &Row,
        ctx: &QueryContext,
    ) -> Result<bool> {
        match condition {
            Some(expr) => Ok(self.expr().evaluate(expr, row, ctx).await?.is_truthy()),
            None => Ok(true),
        }
    }

    /// Evaluate output columns against a row.
    pub(crate) async fn project(
        &self,
        projection: &[ProjectedColumn],
        row: &Row,
        ctx: &QueryContext,
    ) -> Result<Record> {
        let mut record = Record::with_capacity(projection.len());
        for col in projection {
            let value = self.expr().evaluate_to_scalar(&col.expr, row, ctx).await?;
            record.insert(col.name.clone(), value);
        }
        Ok(record)
    }

    async fn distinct_key(
        &self,
        mode: &DistinctMode,
        row: &Row,
        record: &Record,
        ctx: &QueryContext,
    ) -> Result<Option<Vec<ScalarValue>>> {
        match mode {
            DistinctMode::None => Ok(None),
            DistinctMode::All => Ok(Some(record_values(record))),
            DistinctMode::On(keys) => Ok(Some(self.sort_key(keys, row, record, ctx).await?)),
        }
    }
}
