use std::collections::HashSet;

use serde_json::{Map as JsonMap, Value as JsonValue};

use super::ExpressionEvaluator;
use super::functions::Arity;
use crate::ast::{Expr, FunctionCall};
use crate::config::Dialect;
use crate::context::QueryContext;
use crate::errors::{Result, evaluation};
use crate::meta::Frame;
use crate::row::Row;
use crate::util::{SortOrder, compare_sort_keys};
use crate::value::ScalarValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateKind {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    ArrayAgg,
    StringAgg,
    GroupConcat,
    JsonAgg,
    JsonObjectAgg,
    BitAnd,
    BitOr,
    BitXor,
    BoolAnd,
    BoolOr,
}

#[derive(Debug, Clone, Copy)]
pub struct AggregateFunctionSet {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub dialect: Option<Dialect>,
    pub description: &'static str,
    pub arity: Arity,
    pub kind: AggregateKind,
}

const fn aggregate(
    name: &'static str,
    aliases: &'static [&'static str],
    dialect: Option<Dialect>,
    description: &'static str,
    arity: Arity,
    kind: AggregateKind,
) -> AggregateFunctionSet {
    AggregateFunctionSet {
        name,
        aliases,
        dialect,
        description,
        arity,
        kind,
    }
}

pub static BUILTIN_AGGREGATE_FUNCTION_SETS: &[AggregateFunctionSet] = &[
    aggregate("count", &[], None, "Number of non-NULL inputs, or of rows for COUNT(*).", Arity::Range(0, 1), AggregateKind::Count),
    aggregate("sum", &[], None, "Sum of non-NULL inputs.", Arity::Exact(1), AggregateKind::Sum),
    aggregate("avg", &["mean"], None, "Average of non-NULL inputs.", Arity::Exact(1), AggregateKind::Avg),
    aggregate("min", &[], None, "Smallest non-NULL input.", Arity::Exact(1), AggregateKind::Min),
    aggregate("max", &[], None, "Largest non-NULL input.", Arity::Exact(1), AggregateKind::Max),
    aggregate("array_agg", &[], Some(Dialect::Postgres), "Inputs collected into an array, NULLs included.", Arity::Exact(1), AggregateKind::ArrayAgg),
    aggregate("string_agg", &[], Some(Dialect::Postgres), "Non-NULL inputs concatenated with a separator.", Arity::Exact(2), AggregateKind::StringAgg),
    aggregate("group_concat", &[], Some(Dialect::MySql), "Non-NULL inputs concatenated with a separator (default ',').", Arity::Range(1, 2), AggregateKind::GroupConcat),
    aggregate("json_agg", &["jsonb_agg"], Some(Dialect::Postgres), "Inputs collected into a JSON array.", Arity::Exact(1), AggregateKind::JsonAgg),
    aggregate("json_arrayagg", &[], Some(Dialect::MySql), "Inputs collected into a JSON array.", Arity::Exact(1), AggregateKind::JsonAgg),
    aggregate("json_object_agg", &["jsonb_object_agg"], Some(Dialect::Postgres), "Key/value pairs collected into a JSON object.", Arity::Exact(2), AggregateKind::JsonObjectAgg),
    aggregate("json_objectagg", &[], Some(Dialect::MySql), "Key/value pairs collected into a JSON object.", Arity::Exact(2), AggregateKind::JsonObjectAgg),
    aggregate("bit_and", &[], None, "Bitwise AND of non-NULL inputs.", Arity::Exact(1), AggregateKind::BitAnd),
    aggregate("bit_or", &[], None, "Bitwise OR of non-NULL inputs.", Arity::Exact(1), AggregateKind::BitOr),
    aggregate("bit_xor", &[], None, "Bitwise XOR of non-NULL inputs.", Arity::Exact(1), AggregateKind::BitXor),
    aggregate("bool_and", &["every"], Some(Dialect::Postgres), "True if every non-NULL input is true.", Arity::Exact(1), AggregateKind::BoolAnd),
    aggregate("bool_or", &[], Some(Dialect::Postgres), "True if any non-NULL input is true.", Arity::Exact(1), AggregateKind::BoolOr),
];

pub fn find_aggregate(name: &str) -> Option<&'static AggregateFunctionSet> {
    BUILTIN_AGGREGATE_FUNCTION_SETS
        .iter()
        .find(|set| set.name == name || set.aliases.contains(&name))
}

/// Check if a call is a plain (non-windowed) aggregate.
pub fn is_aggregate_call(call: &FunctionCall) -> bool {
    call.over.is_none() && find_aggregate(&call.name).is_some()
}

/// Check if an expression contains a plain aggregate call. Subqueries are
/// not looked into.
pub fn contains_aggregate(expr: &Expr) -> bool {
    let mut found = false;
    expr.walk(&mut |e| {
        if let Expr::Function(call) = e {
            if is_aggregate_call(call) {
                found = true;
            }
        }
    });
    found
}

/// Evaluate an aggregate over the current row's group.
pub async fn evaluate_grouped(
    eval: &ExpressionEvaluator<'_>,
    agg: &AggregateFunctionSet,
    call: &FunctionCall,
    row: &Row,
    ctx: &QueryContext,
) -> Result<ScalarValue> {
    let meta = row.group.as_ref().ok_or_else(|| {
        evaluation!(
            "aggregate function {}() is not allowed outside of a grouped query",
            call.name
        )
    })?;
    evaluate_frame(eval, agg, call, &meta.members, meta.frame(), ctx).await
}

/// Evaluate an aggregate over `members[frame]`. A `None` frame is empty.
pub async fn evaluate_frame(
    eval: &ExpressionEvaluator<'_>,
    agg: &AggregateFunctionSet,
    call: &FunctionCall,
    members: &[Row],
    frame: Option<Frame>,
    ctx: &QueryContext,
) -> Result<ScalarValue> {
    if let Some(dialect) = agg.dialect {
        if dialect != ctx.dialect {
            return Err(evaluation!(
                "aggregate {}() is not available under {}",
                call.name,
                ctx.dialect
            ));
        }
    }

    let star = matches!(call.args.as_slice(), [Expr::Wildcard]);
    if star && agg.kind != AggregateKind::Count {
        return Err(evaluation!("{}(*) is not supported", call.name));
    }
    agg.arity.check(agg.name, call.args.len())?;

    let rows = match frame {
        Some(frame) => members.get(frame.start..=frame.end).ok_or_else(|| {
            evaluation!(
                "frame [{}, {}] out of bounds for window of {} rows",
                frame.start,
                frame.end,
                members.len()
            )
        })?,
        None => &[],
    };

    let mut inputs: Vec<(Vec<ScalarValue>, Vec<ScalarValue>)> = Vec::with_capacity(rows.len());
    for member in rows {
        if let Some(filter) = &call.filter {
            if !eval.evaluate(filter, member, ctx).await?.is_truthy() {
                continue;
            }
        }
        let args = if star {
            Vec::new()
        } else {
            eval.evaluate_all(&call.args, member, ctx).await?
        };
        let mut keys = Vec::with_capacity(call.order_by.len());
        for order in &call.order_by {
            keys.push(eval.evaluate(&order.expr, member, ctx).await?);
        }
        inputs.push((args, keys));
    }

    if !call.order_by.is_empty() {
        let orders: Vec<_> = call
            .order_by
            .iter()
            .map(|o| SortOrder::from_order_by(o, ctx.dialect))
            .collect();
        inputs.sort_by(|a, b| compare_sort_keys(&a.1, &b.1, &orders));
    }

    let mut args: Vec<Vec<ScalarValue>> = inputs.into_iter().map(|(args, _)| args).collect();
    if call.distinct {
        let mut seen = HashSet::with_capacity(args.len());
        args.retain(|a| seen.insert(a.clone()));
    }

    compute(agg.kind, star || call.args.is_empty(), &args)
}

fn first_values(args: &[Vec<ScalarValue>]) -> impl Iterator<Item = &ScalarValue> {
    args.iter().map(|a| a.first().unwrap_or(&ScalarValue::Null))
}

fn non_null(args: &[Vec<ScalarValue>]) -> impl Iterator<Item = &ScalarValue> {
    first_values(args).filter(|v| !v.is_null())
}

fn compute(kind: AggregateKind, count_rows: bool, args: &[Vec<ScalarValue>]) -> Result<ScalarValue> {
    match kind {
        AggregateKind::Count => {
            let count = if count_rows {
                args.len()
            } else {
                non_null(args).count()
            };
            Ok(ScalarValue::Int64(count as i64))
        }
        AggregateKind::Sum => sum(non_null(args)),
        AggregateKind::Avg => {
            let mut total = 0.0;
            let mut count = 0usize;
            for v in non_null(args) {
                total += v.try_as_f64()?;
                count += 1;
            }
            if count == 0 {
                Ok(ScalarValue::Null)
            } else {
                Ok(ScalarValue::Float64(total / count as f64))
            }
        }
        AggregateKind::Min => Ok(non_null(args)
            .min_by(|a, b| a.total_cmp(b))
            .cloned()
            .unwrap_or_default()),
        AggregateKind::Max => Ok(non_null(args)
            .max_by(|a, b| a.total_cmp(b))
            .cloned()
            .unwrap_or_default()),
        AggregateKind::ArrayAgg => {
            if args.is_empty() {
                return Ok(ScalarValue::Null);
            }
            Ok(ScalarValue::List(first_values(args).cloned().collect()))
        }
        AggregateKind::StringAgg | AggregateKind::GroupConcat => {
            let default_sep = if kind == AggregateKind::GroupConcat { "," } else { "" };
            let sep = args
                .first()
                .and_then(|a| a.get(1))
                .and_then(|s| s.to_text())
                .unwrap_or_else(|| default_sep.to_string());
            let parts: Vec<String> = non_null(args).filter_map(|v| v.to_text()).collect();
            if parts.is_empty() {
                Ok(ScalarValue::Null)
            } else {
                Ok(ScalarValue::Utf8(parts.join(&sep)))
            }
        }
        AggregateKind::JsonAgg => {
            if args.is_empty() {
                return Ok(ScalarValue::Null);
            }
            Ok(ScalarValue::Json(JsonValue::Array(
                first_values(args).map(|v| v.to_json()).collect(),
            )))
        }
        AggregateKind::JsonObjectAgg => {
            if args.is_empty() {
                return Ok(ScalarValue::Null);
            }
            let mut obj = JsonMap::new();
            for pair in args {
                let key = pair
                    .first()
                    .and_then(|k| k.to_text())
                    .ok_or_else(|| evaluation!("field name must not be null"))?;
                let value = pair.get(1).map(|v| v.to_json()).unwrap_or(JsonValue::Null);
                obj.insert(key, value);
            }
            Ok(ScalarValue::Json(JsonValue::Object(obj)))
        }
        AggregateKind::BitAnd | AggregateKind::BitOr | AggregateKind::BitXor => {
            let mut acc: Option<i64> = None;
            for v in non_null(args) {
                let v = v.try_as_i64()?;
                acc = Some(match (acc, kind) {
                    (None, _) => v,
                    (Some(a), AggregateKind::BitAnd) => a & v,
                    (Some(a), AggregateKind::BitOr) => a | v,
                    (Some(a), _) => a ^ v,
                });
            }
            Ok(acc.map(ScalarValue::Int64).unwrap_or_default())
        }
        AggregateKind::BoolAnd | AggregateKind::BoolOr => {
            let mut acc: Option<bool> = None;
            for v in non_null(args) {
                let v = v.is_truthy();
                acc = Some(match (acc, kind) {
                    (None, _) => v,
                    (Some(a), AggregateKind::BoolAnd) => a && v,
                    (Some(a), _) => a || v,
                });
            }
            Ok(acc.map(ScalarValue::Boolean).unwrap_or_default())
        }
    }
}

fn sum<'a>(values: impl Iterator<Item = &'a ScalarValue>) -> Result<ScalarValue> {
    let mut int_sum: Option<i64> = None;
    let mut float_sum: Option<f64> = None;

    for v in values {
        match (v, float_sum) {
            (ScalarValue::Int64(i), None) => {
                int_sum = Some(
                    int_sum
                        .unwrap_or(0)
                        .checked_add(*i)
                        .ok_or_else(|| evaluation!("integer out of range"))?,
                );
            }
            (v, _) => {
                let base = float_sum.unwrap_or_else(|| int_sum.unwrap_or(0) as f64);
                float_sum = Some(base + v.try_as_f64()?);
            }
        }
    }

    Ok(match (float_sum, int_sum) {
        (Some(f), _) => ScalarValue::Float64(f),
        (None, Some(i)) => ScalarValue::Int64(i),
        (None, None) => ScalarValue::Null,
    })
}
