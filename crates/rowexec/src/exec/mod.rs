//! Statement evaluation.
//!
//! Queries compile into a chain of lazily pulled stages:
//!
//! FROM/JOIN -> WHERE -> GROUP -> WINDOW -> ORDER BY -> PROJECT -> LIMIT
//!
//! Only GROUP, WINDOW and ORDER BY materialize their input, everything
//! else streams. DML runs its source through the same stages and then
//! applies mutations through the [`RowStore`].
mod cte;
mod ddl;
mod dml;
mod from;
mod group;
mod order;
mod select;
mod setop;
mod window;

pub mod shape;
pub mod visit;

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tracing::trace;

use crate::ast::{Query, QueryBody, Statement};
use crate::context::{QueryContext, QueryOutput};
use crate::errors::{Result, evaluation};
use crate::expr::{ExpressionEvaluator, SubqueryExecutor};
use crate::row::{Record, Row};
use crate::store::{MutationOptions, RowStore};
use crate::value::ScalarValue;

/// Output of a single statement.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Rows {
        columns: Vec<String>,
        rows: Vec<Record>,
    },
    RowCount(u64),
}

impl QueryResult {
    /// Result rows, empty for statements that only report a count.
    pub fn rows(&self) -> &[Record] {
        match self {
            QueryResult::Rows { rows, .. } => rows,
            QueryResult::RowCount(_) => &[],
        }
    }

    pub fn columns(&self) -> &[String] {
        match self {
            QueryResult::Rows { columns, .. } => columns,
            QueryResult::RowCount(_) => &[],
        }
    }

    /// Number of rows returned or affected.
    pub fn row_count(&self) -> u64 {
        match self {
            QueryResult::Rows { rows, .. } => rows.len() as u64,
            QueryResult::RowCount(n) => *n,
        }
    }

    pub fn into_rows(self) -> Vec<Record> {
        match self {
            QueryResult::Rows { rows, .. } => rows,
            QueryResult::RowCount(_) => Vec::new(),
        }
    }
}

/// An opened query: output column names, and the lazily produced records.
pub struct QueryStream<'a> {
    pub columns: Vec<String>,
    pub rows: BoxStream<'a, Result<Record>>,
}

impl std::fmt::Debug for QueryStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryStream")
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

impl<'a> QueryStream<'a> {
    pub async fn collect(self) -> Result<QueryOutput> {
        let rows = self.rows.try_collect().await?;
        Ok(QueryOutput::new(self.columns, rows))
    }
}

/// Evaluates statements against a [`RowStore`].
#[derive(Debug, Clone)]
pub struct StatementEvaluator<'s> {
    store: &'s dyn RowStore,
    mutation: MutationOptions,
}

impl<'s> StatementEvaluator<'s> {
    pub fn new(store: &'s dyn RowStore, mutation: MutationOptions) -> Self {
        StatementEvaluator { store, mutation }
    }

    pub(crate) fn expr(&self) -> ExpressionEvaluator<'_> {
        ExpressionEvaluator::new(self)
    }

    pub async fn execute(&self, statement: &Statement, ctx: QueryContext) -> Result<QueryResult> {
        match statement {
            Statement::Query(query) => {
                let output = self.open_query(query, ctx).await?.collect().await?;
                Ok(QueryResult::Rows {
                    columns: output.columns,
                    rows: output.rows,
                })
            }
            Statement::Insert(insert) => self.insert(insert, ctx).await,
            Statement::Update(update) => self.update(update, ctx).await,
            Statement::Delete(delete) => self.delete(delete, ctx).await,
            Statement::CreateTable(_)
            | Statement::DropTable(_)
            | Statement::CreateSchema(_)
            | Statement::DropSchema(_)
            | Statement::AlterTable(_) => self.execute_ddl(statement).await,
        }
    }

    /// Open a query: materialize its CTEs, then build the stage chain for
    /// its body with the trailing ORDER BY and LIMIT/OFFSET applied.
    pub fn open_query<'a>(
        &'a self,
        query: &'a Query,
        ctx: QueryContext,
    ) -> BoxFuture<'a, Result<QueryStream<'a>>> {
        async move {
            let ctx = match &query.with {
                Some(with) => self.materialize_ctes(with, ctx).await?,
                None => ctx,
            };

            let opened = match &query.body {
                QueryBody::Select(select) => {
                    self.open_select(select, &query.order_by, ctx.clone()).await?
                }
                body => {
                    let opened = self.open_body(body, ctx.clone()).await?;
                    if query.order_by.is_empty() {
                        opened
                    } else {
                        self.sort_output(opened, &query.order_by, &ctx).await?
                    }
                }
            };

            self.apply_limit(opened, query, &ctx).await
        }
        .boxed()
    }

    /// Open a query body without any trailing ORDER BY or LIMIT.
    pub fn open_body<'a>(
        &'a self,
        body: &'a QueryBody,
        ctx: QueryContext,
    ) -> BoxFuture<'a, Result<QueryStream<'a>>> {
        async move {
            match body {
                QueryBody::Select(select) => self.open_select(select, &[], ctx).await,
                QueryBody::SetOperation {
                    op,
                    all,
                    left,
                    right,
                } => self.set_operation(*op, *all, left, right, ctx).await,
                QueryBody::Values(rows) => {
                    let (columns, records) = self.values_records(rows, &Row::empty(), &ctx).await?;
                    Ok(QueryStream {
                        columns,
                        rows: stream::iter(records.into_iter().map(Ok)).boxed(),
                    })
                }
                QueryBody::Table {
                    name,
                    origin_schemas,
                } => self.open_table_body(name, origin_schemas, ctx).await,
                QueryBody::Nested(query) => self.open_query(query, ctx).await,
            }
        }
        .boxed()
    }

    pub async fn collect_query(&self, query: &Query, ctx: QueryContext) -> Result<QueryOutput> {
        self.open_query(query, ctx).await?.collect().await
    }

    async fn apply_limit<'a>(
        &'a self,
        opened: QueryStream<'a>,
        query: &'a Query,
        ctx: &QueryContext,
    ) -> Result<QueryStream<'a>> {
        let offset = self.count_clause(query.offset.as_ref(), "OFFSET", ctx).await?;
        let limit = self.count_clause(query.limit.as_ref(), "LIMIT", ctx).await?;

        let mut rows = opened.rows;
        if let Some(offset) = offset {
            rows = rows.skip(offset).boxed();
        }
        if let Some(limit) = limit {
            rows = rows.take(limit).boxed();
        }
        Ok(QueryStream {
            columns: opened.columns,
            rows,
        })
    }

    /// Evaluate a LIMIT or OFFSET expression. NULL means no limit.
    async fn count_clause(
        &self,
        expr: Option<&crate::ast::Expr>,
        clause: &str,
        ctx: &QueryContext,
    ) -> Result<Option<usize>> {
        let Some(expr) = expr else {
            return Ok(None);
        };
        let value = self.expr().evaluate(expr, &Row::empty(), ctx).await?;
        if value.is_null() {
            return Ok(None);
        }
        let count = value.try_as_i64()?;
        if count < 0 {
            return Err(evaluation!("{clause} must not be negative"));
        }
        Ok(Some(count as usize))
    }

    /// Materialize a subquery, reusing the cached output of non-correlated
    /// ones.
    async fn subquery_output(
        &self,
        query: &Query,
        row: &Row,
        ctx: &QueryContext,
    ) -> Result<Arc<QueryOutput>> {
        let correlated = ctx.is_correlated(query, |q| visit::is_correlated(ctx, q));
        if !correlated {
            if let Some(output) = ctx.cached_subquery(query) {
                trace!(rows = output.rows.len(), "subquery cache hit");
                return Ok(output);
            }
        }

        let nested = ctx.nested()?.with_outer_row(row);
        let output = Arc::new(self.collect_query(query, nested).await?);
        if !correlated {
            ctx.cache_subquery(query, output.clone());
        }
        Ok(output)
    }
}

impl SubqueryExecutor for StatementEvaluator<'_> {
    fn query_rows<'a>(
        &'a self,
        query: &'a Query,
        row: &'a Row,
        ctx: &'a QueryContext,
    ) -> BoxFuture<'a, Result<Arc<QueryOutput>>> {
        self.subquery_output(query, row, ctx).boxed()
    }

    fn query_stream<'a>(
        &'a self,
        query: &'a Query,
        row: &'a Row,
        ctx: &'a QueryContext,
    ) -> BoxStream<'a, Result<Record>> {
        Box::pin(async_stream::try_stream! {
            let nested = ctx.nested()?.with_outer_row(row);
            let opened = self.open_query(query, nested).await?;
            let mut rows = opened.rows;
            while let Some(record) = rows.next().await {
                yield record?;
            }
        })
    }
}

/// Values of a record in column order.
pub(crate) fn record_values(record: &Record) -> Vec<ScalarValue> {
    record.values().cloned().collect()
}

/// Build a record from column names and values, positionally.
pub(crate) fn zip_record(columns: &[String], values: impl IntoIterator<Item = ScalarValue>) -> Record {
    columns.iter().cloned().zip(values).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::*;
    use crate::config::Dialect;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn limit_offset_and_null_limit() {
        let store = MemoryStore::new();
        let exec = StatementEvaluator::new(&store, MutationOptions::default());
        let ctx = QueryContext::with_dialect(Dialect::Postgres);

        let mut query = Query::new(QueryBody::Values(vec![
            vec![lit(1)],
            vec![lit(2)],
            vec![lit(3)],
        ]));
        query.offset = Some(lit(1));
        query.limit = Some(lit(1));
        let out = exec.collect_query(&query, ctx.clone()).await.unwrap();
        assert_eq!(vec![crate::row::record([("column1", 2)])], out.rows);

        query.offset = None;
        query.limit = Some(null());
        let out = exec.collect_query(&query, ctx.clone()).await.unwrap();
        assert_eq!(3, out.rows.len());

        query.limit = Some(lit(-1));
        assert!(exec.collect_query(&query, ctx).await.is_err());
    }

    #[tokio::test]
    async fn values_body_orders_by_ordinal() {
        let store = MemoryStore::new();
        let exec = StatementEvaluator::new(&store, MutationOptions::default());
        let ctx = QueryContext::with_dialect(Dialect::Postgres);

        let mut query = Query::new(QueryBody::Values(vec![
            vec![lit(2), lit("b")],
            vec![lit(1), lit("a")],
        ]));
        query.order_by = vec![asc(lit(1))];
        let out = exec.collect_query(&query, ctx).await.unwrap();
        assert_eq!(vec!["column1", "column2"], out.columns);
        assert_eq!(ScalarValue::Int64(1), out.rows[0]["column1"]);
    }
}
