//! Window function evaluation.
//!
//! Partitions, ordering and frames are computed by the window stage of
//! statement evaluation. Rows coming out of that stage carry a
//! [`WindowMeta`](crate::meta::WindowMeta) per effective window spec, and
//! everything here reads from it.

use super::ExpressionEvaluator;
use super::aggregate;
use crate::ast::{Expr, FunctionCall, WindowSpec};
use crate::context::QueryContext;
use crate::errors::{Result, evaluation, structural};
use crate::meta::WindowKey;
use crate::row::Row;
use crate::util::stable_hash;
use crate::value::ScalarValue;

/// Functions that are only valid with an OVER clause.
pub const WINDOW_FUNCTIONS: &[&str] = &[
    "row_number",
    "rank",
    "dense_rank",
    "percent_rank",
    "cume_dist",
    "ntile",
    "lag",
    "lead",
    "first_value",
    "last_value",
    "nth_value",
];

pub fn is_window_function(name: &str) -> bool {
    WINDOW_FUNCTIONS.contains(&name)
}

/// Merge a window spec with the named window it builds on.
///
/// The base supplies the partitioning. Ordering and frame come from the
/// call when it has them, and from the base otherwise.
pub fn effective_window_spec(spec: &WindowSpec, ctx: &QueryContext) -> Result<WindowSpec> {
    resolve_spec(spec, ctx, 0)
}

fn resolve_spec(spec: &WindowSpec, ctx: &QueryContext, depth: usize) -> Result<WindowSpec> {
    let Some(base_name) = &spec.base else {
        return Ok(spec.clone());
    };
    if depth > 32 {
        return Err(structural!("window \"{base_name}\" references itself"));
    }
    let named = ctx
        .named_window(base_name)
        .ok_or_else(|| structural!("window \"{base_name}\" does not exist"))?;
    let base = resolve_spec(&named.spec, ctx, depth + 1)?;

    if !spec.partition_by.is_empty() {
        return Err(structural!(
            "cannot override PARTITION BY clause of window \"{base_name}\""
        ));
    }

    Ok(WindowSpec {
        base: None,
        partition_by: base.partition_by,
        order_by: if spec.order_by.is_empty() {
            base.order_by
        } else {
            spec.order_by.clone()
        },
        frame: spec.frame.clone().or(base.frame),
    })
}

/// Key identifying the effective window of a windowed call. Calls sharing
/// an effective spec share partitions.
pub fn window_key(call: &FunctionCall, ctx: &QueryContext) -> Result<WindowKey> {
    let spec = call
        .over
        .as_ref()
        .ok_or_else(|| evaluation!("{}() has no OVER clause", call.name))?;
    let effective = effective_window_spec(spec, ctx)?;
    Ok(WindowKey(stable_hash(&effective)))
}

pub async fn evaluate_window_call(
    eval: &ExpressionEvaluator<'_>,
    call: &FunctionCall,
    row: &Row,
    ctx: &QueryContext,
) -> Result<ScalarValue> {
    let key = window_key(call, ctx)?;
    let meta = row.window(key).ok_or_else(|| {
        evaluation!(
            "window function {}() is not allowed in this context",
            call.name
        )
    })?;
    let partition = &meta.partition;
    let pos = meta.position;
    let n = partition.len();

    let arity = |min: usize, max: usize| {
        if call.args.len() < min || call.args.len() > max {
            Err(evaluation!(
                "wrong number of arguments to {}(): {}",
                call.name,
                call.args.len()
            ))
        } else {
            Ok(())
        }
    };

    match call.name.as_str() {
        "row_number" => {
            arity(0, 0)?;
            Ok(ScalarValue::Int64(pos as i64 + 1))
        }
        "rank" => {
            arity(0, 0)?;
            Ok(ScalarValue::Int64(partition.peer_start[pos] as i64 + 1))
        }
        "dense_rank" => {
            arity(0, 0)?;
            Ok(ScalarValue::Int64(partition.peer_group[pos] as i64 + 1))
        }
        "percent_rank" => {
            arity(0, 0)?;
            if n <= 1 {
                return Ok(ScalarValue::Float64(0.0));
            }
            Ok(ScalarValue::Float64(
                partition.peer_start[pos] as f64 / (n - 1) as f64,
            ))
        }
        "cume_dist" => {
            arity(0, 0)?;
            Ok(ScalarValue::Float64(
                (partition.peer_end[pos] + 1) as f64 / n as f64,
            ))
        }
        "ntile" => {
            arity(1, 1)?;
            let buckets = eval.evaluate(&call.args[0], row, ctx).await?;
            if buckets.is_null() {
                return Ok(ScalarValue::Null);
            }
            let buckets = buckets.try_as_i64()?;
            if buckets <= 0 {
                return Err(evaluation!("argument of ntile must be greater than zero"));
            }
            Ok(ScalarValue::Int64(ntile_bucket(pos, n, buckets as usize) as i64))
        }
        "lag" | "lead" => {
            arity(1, 3)?;
            let offset = match call.args.get(1) {
                Some(expr) => eval.evaluate(expr, row, ctx).await?.try_as_i64()?,
                None => 1,
            };
            let offset = if call.name == "lag" { -offset } else { offset };
            let target = (pos as i64)
                .checked_add(offset)
                .filter(|t| *t >= 0 && (*t as usize) < n);
            match target {
                Some(target) => {
                    eval.evaluate(&call.args[0], &partition.members[target as usize], ctx)
                        .await
                }
                None => match call.args.get(2) {
                    Some(default) => eval.evaluate(default, row, ctx).await,
                    None => Ok(ScalarValue::Null),
                },
            }
        }
        "first_value" | "last_value" => {
            arity(1, 1)?;
            let Some(frame) = meta.frame else {
                return Ok(ScalarValue::Null);
            };
            let idx = if call.name == "first_value" {
                frame.start
            } else {
                frame.end
            };
            eval.evaluate(&call.args[0], &partition.members[idx], ctx)
                .await
        }
        "nth_value" => {
            arity(2, 2)?;
            let nth = eval.evaluate(&call.args[1], row, ctx).await?.try_as_i64()?;
            if nth <= 0 {
                return Err(evaluation!("argument of nth_value must be greater than zero"));
            }
            let Some(frame) = meta.frame else {
                return Ok(ScalarValue::Null);
            };
            let idx = frame.start.saturating_add(nth as usize - 1);
            if !frame.contains(idx) {
                return Ok(ScalarValue::Null);
            }
            eval.evaluate(&call.args[0], &partition.members[idx], ctx)
                .await
        }
        name => match aggregate::find_aggregate(name) {
            Some(agg) => {
                aggregate::evaluate_frame(eval, agg, call, &partition.members, meta.frame, ctx)
                    .await
            }
            None => Err(evaluation!("function {name}() is not a window function")),
        },
    }
}

/// 1-based NTILE bucket for `pos` in a partition of `n` rows. Earlier
/// buckets take one extra row each until the remainder is used up.
fn ntile_bucket(pos: usize, n: usize, buckets: usize) -> usize {
    let base = n / buckets;
    let rem = n % buckets;
    let large = rem * (base + 1);
    if pos < large {
        pos / (base + 1) + 1
    } else {
        rem + (pos - large) / base.max(1) + 1
    }
}

/// Collect every windowed call in `expr`, outer calls first.
pub fn collect_window_calls<'a>(expr: &'a Expr, out: &mut Vec<&'a FunctionCall>) {
    expr.walk(&mut |e| {
        if let Expr::Function(call) = e {
            if call.over.is_some() {
                out.push(call);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use crate::ast::build::*;
    use crate::ast::{FrameBound, FrameUnits, NamedWindow, WindowFrame};
    use crate::config::Dialect;
    use crate::expr::NoSubqueries;
    use crate::meta::{Frame, WindowMeta, WindowPartition};
    use crate::row::{CompositeRow, record};

    /// Rows of `t(v)` with values 10, 20, 20, 30 under a window ordered by
    /// `v`, with the default frame.
    fn windowed_rows(key: WindowKey) -> Vec<Row> {
        let values = [10, 20, 20, 30];
        let members: Arc<[Row]> = values
            .iter()
            .map(|v| Row::new(CompositeRow::single("t", record([("v", *v)]))))
            .collect();
        let hashes = values.iter().map(|v| stable_hash(v)).collect();
        let partition = Arc::new(WindowPartition::new(members.clone(), hashes));

        members
            .iter()
            .enumerate()
            .map(|(pos, member)| {
                let mut row = member.clone();
                let meta = WindowMeta {
                    partition: partition.clone(),
                    position: pos,
                    frame: Some(Frame {
                        start: 0,
                        end: partition.peer_end[pos],
                    }),
                };
                row.windows = Some(Arc::new(HashMap::from([(key, meta)])));
                row
            })
            .collect()
    }

    async fn eval_all(expr: &Expr) -> Vec<ScalarValue> {
        let ctx = QueryContext::with_dialect(Dialect::Postgres);
        let Expr::Function(call) = expr else {
            panic!("not a call")
        };
        let key = window_key(call, &ctx).unwrap();
        let eval = ExpressionEvaluator::new(&NoSubqueries);
        let mut out = Vec::new();
        for row in windowed_rows(key) {
            out.push(eval.evaluate(expr, &row, &ctx).await.unwrap());
        }
        out
    }

    fn ints(values: &[i64]) -> Vec<ScalarValue> {
        values.iter().map(|v| ScalarValue::Int64(*v)).collect()
    }

    fn by_v() -> WindowSpec {
        window(vec![], vec![asc(col("v"))])
    }

    #[tokio::test]
    async fn ranking() {
        assert_eq!(
            ints(&[1, 2, 3, 4]),
            eval_all(&over(func("row_number", vec![]), by_v())).await
        );
        assert_eq!(
            ints(&[1, 2, 2, 4]),
            eval_all(&over(func("rank", vec![]), by_v())).await
        );
        assert_eq!(
            ints(&[1, 2, 2, 3]),
            eval_all(&over(func("dense_rank", vec![]), by_v())).await
        );
        assert_eq!(
            ints(&[1, 1, 2, 3]),
            eval_all(&over(func("ntile", vec![lit(3)]), by_v())).await
        );
    }

    #[tokio::test]
    async fn distribution() {
        let cume = eval_all(&over(func("cume_dist", vec![]), by_v())).await;
        assert_eq!(
            vec![
                ScalarValue::Float64(0.25),
                ScalarValue::Float64(0.75),
                ScalarValue::Float64(0.75),
                ScalarValue::Float64(1.0)
            ],
            cume
        );
        let pct = eval_all(&over(func("percent_rank", vec![]), by_v())).await;
        assert_eq!(ScalarValue::Float64(0.0), pct[0]);
        assert_eq!(ScalarValue::Float64(1.0), pct[3]);
    }

    #[tokio::test]
    async fn offsets() {
        assert_eq!(
            vec![
                ScalarValue::Null,
                ScalarValue::Int64(10),
                ScalarValue::Int64(20),
                ScalarValue::Int64(20)
            ],
            eval_all(&over(func("lag", vec![col("v")]), by_v())).await
        );
        assert_eq!(
            ints(&[20, 30, -1, -1]),
            eval_all(&over(func("lead", vec![col("v"), lit(2), lit(-1)]), by_v())).await
        );
    }

    #[tokio::test]
    async fn frame_values_and_running_sum() {
        assert_eq!(
            ints(&[10, 20, 20, 30]),
            eval_all(&over(func("last_value", vec![col("v")]), by_v())).await
        );
        assert_eq!(
            vec![
                ScalarValue::Null,
                ScalarValue::Int64(20),
                ScalarValue::Int64(20),
                ScalarValue::Int64(20)
            ],
            eval_all(&over(func("nth_value", vec![col("v"), lit(2)]), by_v())).await
        );
        assert_eq!(
            ints(&[10, 50, 50, 80]),
            eval_all(&over(func("sum", vec![col("v")]), by_v())).await
        );
    }

    #[tokio::test]
    async fn ntile_rejects_non_positive() {
        let ctx = QueryContext::with_dialect(Dialect::Postgres);
        let expr = over(func("ntile", vec![lit(0)]), by_v());
        let Expr::Function(call) = &expr else {
            unreachable!()
        };
        let key = window_key(call, &ctx).unwrap();
        let rows = windowed_rows(key);
        let err = ExpressionEvaluator::new(&NoSubqueries)
            .evaluate(&expr, &rows[0], &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::errors::ExecError::Evaluation(_)));
    }

    #[test]
    fn named_window_merge() {
        let base = NamedWindow {
            name: "w".to_string(),
            spec: WindowSpec {
                base: None,
                partition_by: vec![col("k")],
                order_by: vec![asc(col("v"))],
                frame: Some(WindowFrame {
                    units: FrameUnits::Rows,
                    start: FrameBound::UnboundedPreceding,
                    end: FrameBound::CurrentRow,
                }),
            },
        };
        let ctx = QueryContext::with_dialect(Dialect::Postgres).with_windows(&[base]);

        let call_spec = WindowSpec {
            base: Some("w".to_string()),
            order_by: vec![desc(col("v"))],
            ..Default::default()
        };
        let merged = effective_window_spec(&call_spec, &ctx).unwrap();
        assert_eq!(vec![col("k")], merged.partition_by);
        assert_eq!(vec![desc(col("v"))], merged.order_by);
        assert_eq!(FrameUnits::Rows, merged.frame.unwrap().units);

        let missing = WindowSpec {
            base: Some("nope".to_string()),
            ..Default::default()
        };
        assert!(effective_window_spec(&missing, &ctx).is_err());
    }

    #[test]
    fn ntile_distribution() {
        let buckets: Vec<_> = (0..7).map(|pos| ntile_bucket(pos, 7, 3)).collect();
        assert_eq!(vec![1, 1, 1, 2, 2, 3, 3], buckets);
        let buckets: Vec<_> = (0..2).map(|pos| ntile_bucket(pos, 2, 5)).collect();
        assert_eq!(vec![1, 2], buckets);
    }
}
