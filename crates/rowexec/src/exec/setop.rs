//! UNION, INTERSECT and EXCEPT.

use futures::stream::{self, StreamExt, TryStreamExt};
use indexmap::IndexMap;
use tracing::trace;

use super::{QueryStream, StatementEvaluator, record_values, zip_record};
use crate::ast::{DataType, QueryBody, SetOperator};
use crate::context::QueryContext;
use crate::errors::{Result, structural};
use crate::expr::cast::cast;
use crate::row::Record;
use crate::value::{ScalarValue, ValueKind};

/// Type both sides of a column are coerced to. `None` leaves values as
/// they are.
fn unify(left: Option<ValueKind>, right: Option<ValueKind>) -> Option<DataType> {
    let kind = match (left, right) {
        (None, None) => return None,
        (Some(kind), None) | (None, Some(kind)) => kind,
        (Some(ValueKind::Integer), Some(ValueKind::Float))
        | (Some(ValueKind::Float), Some(ValueKind::Integer)) => ValueKind::Float,
        (Some(left), Some(_)) => left,
    };
    match kind {
        ValueKind::Integer => Some(DataType::Int),
        ValueKind::Float => Some(DataType::Float),
        ValueKind::Text => Some(DataType::Text),
        ValueKind::Boolean => Some(DataType::Boolean),
        ValueKind::Json => Some(DataType::Json),
        ValueKind::Null | ValueKind::List => None,
    }
}

/// Kind of the first non-NULL value in a column.
fn column_kind(rows: &[Vec<ScalarValue>], idx: usize) -> Option<ValueKind> {
    rows.iter()
        .map(|row| &row[idx])
        .find(|v| !v.is_null())
        .map(|v| v.kind())
}

/// Cast every value of each column to its unified type. Values that don't
/// cast are kept as they are.
fn coerce(rows: &mut [Vec<ScalarValue>], types: &[Option<DataType>]) {
    for row in rows {
        for (value, datatype) in row.iter_mut().zip(types) {
            let Some(datatype) = datatype else {
                continue;
            };
            if let Ok(cast) = cast(value.clone(), datatype) {
                *value = cast;
            }
        }
    }
}

/// Combine two coerced row sets.
pub fn combine(
    op: SetOperator,
    all: bool,
    left: Vec<Vec<ScalarValue>>,
    right: Vec<Vec<ScalarValue>>,
) -> Vec<Vec<ScalarValue>> {
    match op {
        SetOperator::Union if all => left.into_iter().chain(right).collect(),
        SetOperator::Union => {
            let mut seen: IndexMap<Vec<ScalarValue>, ()> = IndexMap::new();
            for row in left.into_iter().chain(right) {
                seen.entry(row).or_insert(());
            }
            seen.into_keys().collect()
        }
        SetOperator::Intersect | SetOperator::Except => {
            let mut right_counts: IndexMap<Vec<ScalarValue>, usize> = IndexMap::new();
            for row in right {
                *right_counts.entry(row).or_default() += 1;
            }
            let mut left_counts: IndexMap<Vec<ScalarValue>, usize> = IndexMap::new();
            for row in left {
                *left_counts.entry(row).or_default() += 1;
            }

            let mut out = Vec::new();
            for (row, left_count) in left_counts {
                let right_count = right_counts.get(&row).copied().unwrap_or(0);
                let copies = match (op, all) {
                    (SetOperator::Intersect, true) => left_count.min(right_count),
                    (SetOperator::Intersect, false) => usize::from(right_count > 0),
                    (_, true) => left_count.saturating_sub(right_count),
                    (_, false) => usize::from(right_count == 0),
                };
                out.extend(std::iter::repeat_n(row, copies));
            }
            out
        }
    }
}

impl StatementEvaluator<'_> {
    pub(crate) async fn set_operation<'a>(
        &'a self,
        op: SetOperator,
        all: bool,
        left: &'a QueryBody,
        right: &'a QueryBody,
        ctx: QueryContext,
    ) -> Result<QueryStream<'a>> {
        let left = self.open_body(left, ctx.clone()).await?;
        let columns = left.columns;
        let left_records: Vec<Record> = left.rows.try_collect().await?;
        let right = self.open_body(right, ctx).await?;
        if right.columns.len() != columns.len() {
            return Err(structural!(
                "each {op} query must have the same number of columns, got {} and {}",
                columns.len(),
                right.columns.len()
            ));
        }
        let right_records: Vec<Record> = right.rows.try_collect().await?;

        let mut left_rows: Vec<Vec<ScalarValue>> = left_records.iter().map(record_values).collect();
        let mut right_rows: Vec<Vec<ScalarValue>> =
            right_records.iter().map(record_values).collect();

        let types: Vec<Option<DataType>> = (0..columns.len())
            .map(|idx| unify(column_kind(&left_rows, idx), column_kind(&right_rows, idx)))
            .collect();
        coerce(&mut left_rows, &types);
        coerce(&mut right_rows, &types);

        trace!(
            %op,
            all,
            left = left_rows.len(),
            right = right_rows.len(),
            "combining set operation"
        );
        let rows: Vec<Result<Record>> = combine(op, all, left_rows, right_rows)
            .into_iter()
            .map(|values| Ok(zip_record(&columns, values)))
            .collect();

        Ok(QueryStream {
            columns,
            rows: stream::iter(rows).boxed(),
        })
    }
}
