//! Expression evaluation against composite rows.
pub mod aggregate;
pub mod cast;
pub mod functions;
pub mod json;
pub mod ops;
pub mod window;

use std::fmt;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, BoxStream, StreamExt};

use crate::ast::{BinaryOperator, ColumnRef, Expr, FunctionCall, Quantifier, Query, WhenThen};
use crate::context::{QueryContext, QueryOutput};
use crate::errors::{Result, evaluation, structural};
use crate::row::{EXCLUDED_ALIAS, Record, Row};
use crate::value::ScalarValue;

/// Callback into statement evaluation for subqueries.
///
/// `row` is the row the subquery is evaluated for, visible to it as the
/// innermost enclosing row.
pub trait SubqueryExecutor: Send + Sync {
    /// Fully evaluate a subquery.
    fn query_rows<'a>(
        &'a self,
        query: &'a Query,
        row: &'a Row,
        ctx: &'a QueryContext,
    ) -> BoxFuture<'a, Result<Arc<QueryOutput>>>;

    /// Lazily evaluate a subquery. Used where only the first few rows
    /// matter.
    fn query_stream<'a>(
        &'a self,
        query: &'a Query,
        row: &'a Row,
        ctx: &'a QueryContext,
    ) -> BoxStream<'a, Result<Record>>;
}

/// Subquery executor that rejects every subquery. For evaluating
/// standalone expressions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSubqueries;

impl SubqueryExecutor for NoSubqueries {
    fn query_rows<'a>(
        &'a self,
        _query: &'a Query,
        _row: &'a Row,
        _ctx: &'a QueryContext,
    ) -> BoxFuture<'a, Result<Arc<QueryOutput>>> {
        async { Err(evaluation!("subqueries are not supported in this context")) }.boxed()
    }

    fn query_stream<'a>(
        &'a self,
        _query: &'a Query,
        _row: &'a Row,
        _ctx: &'a QueryContext,
    ) -> BoxStream<'a, Result<Record>> {
        stream::once(async { Err(evaluation!("subqueries are not supported in this context")) })
            .boxed()
    }
}

/// Evaluates expressions.
///
/// Stateless apart from the subquery callback, all per-call state lives in
/// the [`QueryContext`].
#[derive(Clone, Copy)]
pub struct ExpressionEvaluator<'a> {
    subqueries: &'a dyn SubqueryExecutor,
}

impl fmt::Debug for ExpressionEvaluator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpressionEvaluator").finish_non_exhaustive()
    }
}

impl<'a> ExpressionEvaluator<'a> {
    pub fn new(subqueries: &'a dyn SubqueryExecutor) -> Self {
        ExpressionEvaluator { subqueries }
    }

    pub fn evaluate<'b>(
        &'b self,
        expr: &'b Expr,
        row: &'b Row,
        ctx: &'b QueryContext,
    ) -> BoxFuture<'b, Result<ScalarValue>> {
        async move {
            match expr {
                Expr::Literal(v) => Ok(v.clone()),
                Expr::Column(col) => resolve_column(col, row, ctx),
                Expr::Parameter(idx) => ctx.param(*idx).cloned(),
                Expr::Wildcard => Err(evaluation!("* is only valid as an argument to COUNT")),
                Expr::Unary { op, expr } => {
                    let value = self.evaluate(expr, row, ctx).await?;
                    ops::unary(*op, value)
                }
                Expr::Binary {
                    op: BinaryOperator::And,
                    left,
                    right,
                } => {
                    if !self.evaluate(left, row, ctx).await?.is_truthy() {
                        return Ok(ScalarValue::Boolean(false));
                    }
                    let right = self.evaluate(right, row, ctx).await?;
                    Ok(ScalarValue::Boolean(right.is_truthy()))
                }
                Expr::Binary {
                    op: BinaryOperator::Or,
                    left,
                    right,
                } => {
                    if self.evaluate(left, row, ctx).await?.is_truthy() {
                        return Ok(ScalarValue::Boolean(true));
                    }
                    let right = self.evaluate(right, row, ctx).await?;
                    Ok(ScalarValue::Boolean(right.is_truthy()))
                }
                Expr::Binary { op, left, right } => {
                    let left = self.evaluate(left, row, ctx).await?;
                    let right = self.evaluate(right, row, ctx).await?;
                    ops::binary(*op, &left, &right, ctx)
                }
                Expr::Quantified {
                    op,
                    quantifier,
                    left,
                    right,
                } => {
                    let left = self.evaluate_to_scalar(left, row, ctx).await?;
                    let list = self.evaluate_to_list(right, row, ctx).await?;
                    let mut results = Vec::with_capacity(list.len());
                    for item in &list {
                        results.push(ops::binary(*op, &left, item, ctx)?.is_truthy());
                    }
                    let matched = match quantifier {
                        Quantifier::All => results.iter().all(|r| *r),
                        Quantifier::Any => results.iter().any(|r| *r),
                    };
                    Ok(ScalarValue::Boolean(matched))
                }
                Expr::InList {
                    expr,
                    list,
                    negated,
                } => {
                    let value = self.evaluate_to_scalar(expr, row, ctx).await?;
                    if value.is_null() {
                        return Ok(ScalarValue::Boolean(false));
                    }
                    let mut found = false;
                    for item in list {
                        let item = self.evaluate_to_scalar(item, row, ctx).await?;
                        if value.sql_eq(&item) {
                            found = true;
                            break;
                        }
                    }
                    Ok(ScalarValue::Boolean(found != *negated))
                }
                Expr::InSubquery {
                    expr,
                    subquery,
                    negated,
                } => {
                    let value = self.evaluate_to_scalar(expr, row, ctx).await?;
                    if value.is_null() {
                        return Ok(ScalarValue::Boolean(false));
                    }
                    let output = self.subqueries.query_rows(subquery, row, ctx).await?;
                    let found = single_column_values(&output)?
                        .iter()
                        .any(|item| value.sql_eq(item));
                    Ok(ScalarValue::Boolean(found != *negated))
                }
                Expr::Between {
                    expr,
                    low,
                    high,
                    negated,
                } => {
                    let value = self.evaluate(expr, row, ctx).await?;
                    let low = self.evaluate(low, row, ctx).await?;
                    let high = self.evaluate(high, row, ctx).await?;
                    if value.is_null() || low.is_null() || high.is_null() {
                        return Ok(ScalarValue::Boolean(false));
                    }
                    let ge = ops::binary(BinaryOperator::GtEq, &value, &low, ctx)?.is_truthy();
                    let le = ops::binary(BinaryOperator::LtEq, &value, &high, ctx)?.is_truthy();
                    Ok(ScalarValue::Boolean((ge && le) != *negated))
                }
                Expr::Case {
                    operand,
                    branches,
                    else_result,
                } => {
                    self.evaluate_case(operand.as_deref(), branches, else_result.as_deref(), row, ctx)
                        .await
                }
                Expr::Cast { expr, datatype } => {
                    let value = self.evaluate(expr, row, ctx).await?;
                    cast::cast(value, datatype)
                }
                Expr::Exists { subquery, negated } => {
                    let mut rows = self.subqueries.query_stream(subquery, row, ctx);
                    let found = match rows.next().await {
                        Some(Ok(_)) => true,
                        Some(Err(e)) => return Err(e),
                        None => false,
                    };
                    Ok(ScalarValue::Boolean(found != *negated))
                }
                Expr::Subquery(_) => self.evaluate_to_scalar(expr, row, ctx).await,
                Expr::Row(exprs) | Expr::Array(exprs) => {
                    let mut values = Vec::with_capacity(exprs.len());
                    for expr in exprs {
                        values.push(self.evaluate(expr, row, ctx).await?);
                    }
                    Ok(ScalarValue::List(values))
                }
                Expr::Function(call) => self.evaluate_function(call, row, ctx).await,
            }
        }
        .boxed()
    }

    /// Evaluate an expression that must produce a single scalar.
    ///
    /// Subqueries must produce at most one row and exactly one column, and
    /// single element row constructors are unwrapped.
    pub async fn evaluate_to_scalar(
        &self,
        expr: &Expr,
        row: &Row,
        ctx: &QueryContext,
    ) -> Result<ScalarValue> {
        match expr {
            Expr::Subquery(query) => {
                let output = self.subqueries.query_rows(query, row, ctx).await?;
                let mut values = single_column_values(&output)?;
                match values.len() {
                    0 => Ok(ScalarValue::Null),
                    1 => Ok(values.swap_remove(0)),
                    _ => Err(evaluation!(
                        "more than one row returned by a subquery used as an expression"
                    )),
                }
            }
            Expr::Row(exprs) if exprs.len() == 1 => self.evaluate(&exprs[0], row, ctx).await,
            other => self.evaluate(other, row, ctx).await,
        }
    }

    /// Evaluate an expression into a list of values, for `IN`/`ANY`/`ALL`.
    pub async fn evaluate_to_list(
        &self,
        expr: &Expr,
        row: &Row,
        ctx: &QueryContext,
    ) -> Result<Vec<ScalarValue>> {
        match expr {
            Expr::Subquery(query) => {
                let output = self.subqueries.query_rows(query, row, ctx).await?;
                single_column_values(&output)
            }
            Expr::Row(exprs) | Expr::Array(exprs) => {
                let mut values = Vec::with_capacity(exprs.len());
                for expr in exprs {
                    values.push(self.evaluate(expr, row, ctx).await?);
                }
                Ok(values)
            }
            other => match self.evaluate(other, row, ctx).await? {
                ScalarValue::Null => Ok(Vec::new()),
                ScalarValue::List(values) => Ok(values),
                ScalarValue::Json(serde_json::Value::Array(values)) => {
                    Ok(values.into_iter().map(ScalarValue::from_json).collect())
                }
                other => Ok(vec![other]),
            },
        }
    }

    async fn evaluate_case(
        &self,
        operand: Option<&Expr>,
        branches: &[WhenThen],
        else_result: Option<&Expr>,
        row: &Row,
        ctx: &QueryContext,
    ) -> Result<ScalarValue> {
        let subject = match operand {
            Some(operand) => Some(self.evaluate(operand, row, ctx).await?),
            None => None,
        };

        for branch in branches {
            let cond = self.evaluate(&branch.when, row, ctx).await?;
            let matched = match &subject {
                Some(subject) => subject.sql_eq(&cond),
                None => cond.is_truthy(),
            };
            if matched {
                return self.evaluate(&branch.then, row, ctx).await;
            }
        }

        match else_result {
            Some(expr) => self.evaluate(expr, row, ctx).await,
            None => Ok(ScalarValue::Null),
        }
    }

    async fn evaluate_function(
        &self,
        call: &FunctionCall,
        row: &Row,
        ctx: &QueryContext,
    ) -> Result<ScalarValue> {
        if call.over.is_some() {
            return window::evaluate_window_call(self, call, row, ctx).await;
        }

        match call.name.as_str() {
            "grouping" | "grouping_id" => {
                if call.args.is_empty() {
                    return Err(evaluation!("{} requires at least one argument", call.name));
                }
                let meta = row.group.as_ref().ok_or_else(|| {
                    evaluation!("{} can only be used in a grouped query", call.name)
                })?;
                let mut id = 0u64;
                for arg in &call.args {
                    id = (id << 1) | meta.grouping_bit(arg)?;
                }
                return Ok(ScalarValue::Int64(id as i64));
            }
            "values" => return excluded_value(call, row),
            _ => (),
        }

        if let Some(agg) = aggregate::find_aggregate(&call.name) {
            return aggregate::evaluate_grouped(self, agg, call, row, ctx).await;
        }
        if window::is_window_function(&call.name) {
            return Err(evaluation!(
                "window function {} requires an OVER clause",
                call.name
            ));
        }
        if functions::find_table_function(&call.name).is_some() {
            return Err(evaluation!(
                "set-returning function {} is only supported in FROM",
                call.name
            ));
        }

        let func = functions::find_scalar_function(&call.name, ctx.dialect)
            .ok_or_else(|| evaluation!("function {}() does not exist", call.name))?;
        func.check_arity(call.args.len())?;

        let mut args = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            args.push(self.evaluate(arg, row, ctx).await?);
        }
        (func.function)(&args, ctx.dialect)
    }

    /// Evaluate a list of expressions against a row.
    pub async fn evaluate_all(
        &self,
        exprs: &[Expr],
        row: &Row,
        ctx: &QueryContext,
    ) -> Result<Vec<ScalarValue>> {
        let mut values = Vec::with_capacity(exprs.len());
        for expr in exprs {
            values.push(self.evaluate(expr, row, ctx).await?);
        }
        Ok(values)
    }
}

/// Resolve a column against the row, then against enclosing rows from
/// innermost outward.
///
/// Qualified references must name an alias present in one of those rows.
/// Unqualified references take the first alias containing a column of that
/// name, no ambiguity check is done.
pub fn resolve_column(col: &ColumnRef, row: &Row, ctx: &QueryContext) -> Result<ScalarValue> {
    let rows = std::iter::once(row).chain(ctx.outer_rows());
    match &col.relation {
        Some(relation) => {
            for row in rows {
                if let Some(record) = row.data.get(relation) {
                    return record.get(&col.name).cloned().ok_or_else(|| {
                        evaluation!("column {relation}.{} does not exist", col.name)
                    });
                }
            }
            Err(structural!(
                "missing FROM-clause entry for table \"{relation}\""
            ))
        }
        None => {
            for row in rows {
                if let Some(value) = row.data.find_column(&col.name) {
                    return Ok(value.clone());
                }
            }
            Err(evaluation!("column \"{}\" does not exist", col.name))
        }
    }
}

/// MySQL `VALUES(col)` inside `ON DUPLICATE KEY UPDATE`.
fn excluded_value(call: &FunctionCall, row: &Row) -> Result<ScalarValue> {
    let col = match call.args.as_slice() {
        [Expr::Column(col)] => col,
        _ => return Err(evaluation!("VALUES() expects a single column reference")),
    };
    let excluded = row
        .data
        .get(EXCLUDED_ALIAS)
        .ok_or_else(|| evaluation!("VALUES() is only valid in ON DUPLICATE KEY UPDATE"))?;
    excluded
        .get(&col.name)
        .cloned()
        .ok_or_else(|| evaluation!("column \"{}\" does not exist", col.name))
}

fn single_column_values(output: &QueryOutput) -> Result<Vec<ScalarValue>> {
    if output.columns.len() != 1 {
        return Err(evaluation!(
            "subquery must return only one column, got {}",
            output.columns.len()
        ));
    }
    Ok(output
        .rows
        .iter()
        .map(|rec| {
            rec.get_index(0)
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        })
        .collect())
}
