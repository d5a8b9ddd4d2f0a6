//! The WINDOW stage: partitioning, ordering and framing.
//!
//! For every distinct effective window spec used by the SELECT, rows are
//! partitioned and sorted once. Each row then carries a [`WindowMeta`] per
//! spec, and window function evaluation only reads from those.

use std::cmp::Ordering;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use super::StatementEvaluator;
use crate::ast::{BinaryOperator, FrameBound, FrameUnits, FunctionCall, WindowFrame, WindowSpec};
use crate::context::QueryContext;
use crate::errors::{Result, evaluation, structural};
use crate::expr::ops;
use crate::expr::window::{effective_window_spec, window_key};
use crate::meta::{Frame, WindowKey, WindowMeta, WindowPartition};
use crate::row::{Row, WindowMetas};
use crate::util::{SortOrder, compare_sort_keys, stable_hash};
use crate::value::ScalarValue;

/// A frame bound with its offset evaluated.
#[derive(Debug, Clone, PartialEq)]
enum Bound {
    UnboundedPreceding,
    Preceding(ScalarValue),
    CurrentRow,
    Following(ScalarValue),
    UnboundedFollowing,
}

#[derive(Debug, Clone, PartialEq)]
struct ResolvedFrame {
    units: FrameUnits,
    start: Bound,
    end: Bound,
}

impl ResolvedFrame {
    /// RANGE UNBOUNDED PRECEDING to CURRENT ROW.
    fn default_ordered() -> Self {
        ResolvedFrame {
            units: FrameUnits::Range,
            start: Bound::UnboundedPreceding,
            end: Bound::CurrentRow,
        }
    }

    fn whole_partition() -> Self {
        ResolvedFrame {
            units: FrameUnits::Rows,
            start: Bound::UnboundedPreceding,
            end: Bound::UnboundedFollowing,
        }
    }
}

/// Context a frame is computed in: the sorted partition plus the evaluated
/// order keys of every member.
struct SortedPartition<'p> {
    partition: &'p WindowPartition,
    keys: &'p [Vec<ScalarValue>],
    orders: &'p [SortOrder],
}

impl StatementEvaluator<'_> {
    /// Attach window metadata to every row for each distinct window used by
    /// `calls`. Rows keep their input order.
    pub(crate) async fn window_rows(
        &self,
        rows: Vec<Row>,
        calls: &[&FunctionCall],
        ctx: &QueryContext,
    ) -> Result<Vec<Row>> {
        let mut specs: IndexMap<WindowKey, WindowSpec> = IndexMap::new();
        for call in calls {
            let key = window_key(call, ctx)?;
            if !specs.contains_key(&key) {
                let spec = call
                    .over
                    .as_ref()
                    .ok_or_else(|| evaluation!("{}() has no OVER clause", call.name))?;
                specs.insert(key, effective_window_spec(spec, ctx)?);
            }
        }

        let mut metas: Vec<WindowMetas> = vec![WindowMetas::new(); rows.len()];
        for (key, spec) in &specs {
            let frame = self.resolve_frame(spec, ctx).await?;
            let orders: Vec<SortOrder> = spec
                .order_by
                .iter()
                .map(|o| SortOrder::from_order_by(o, ctx.dialect))
                .collect();

            let mut partitions: IndexMap<Vec<ScalarValue>, Vec<usize>> = IndexMap::new();
            for (idx, row) in rows.iter().enumerate() {
                let partition_key = self.expr().evaluate_all(&spec.partition_by, row, ctx).await?;
                partitions.entry(partition_key).or_default().push(idx);
            }

            for (_, indices) in partitions {
                let mut keyed = Vec::with_capacity(indices.len());
                for idx in indices {
                    let mut sort_key = Vec::with_capacity(spec.order_by.len());
                    for order in &spec.order_by {
                        sort_key.push(self.expr().evaluate(&order.expr, &rows[idx], ctx).await?);
                    }
                    keyed.push((sort_key, idx));
                }
                keyed.sort_by(|a, b| compare_sort_keys(&a.0, &b.0, &orders));

                let members: Arc<[Row]> = keyed.iter().map(|(_, idx)| rows[*idx].clone()).collect();
                let keys: Vec<Vec<ScalarValue>> = keyed.iter().map(|(key, _)| key.clone()).collect();
                let hashes = keys.iter().map(|key| peer_hash(key)).collect();
                let partition = Arc::new(WindowPartition::new(members, hashes));

                let sorted = SortedPartition {
                    partition: &partition,
                    keys: &keys,
                    orders: &orders,
                };
                for (position, (_, idx)) in keyed.iter().enumerate() {
                    metas[*idx].insert(
                        *key,
                        WindowMeta {
                            partition: partition.clone(),
                            position,
                            frame: frame_bounds(&frame, &sorted, position, ctx)?,
                        },
                    );
                }
            }
        }

        debug!(rows = rows.len(), windows = specs.len(), "computed windows");
        Ok(rows
            .into_iter()
            .zip(metas)
            .map(|(row, metas)| Row {
                windows: Some(Arc::new(metas)),
                ..row
            })
            .collect())
    }

    async fn resolve_frame(&self, spec: &WindowSpec, ctx: &QueryContext) -> Result<ResolvedFrame> {
        let Some(WindowFrame { units, start, end }) = &spec.frame else {
            return Ok(if spec.order_by.is_empty() {
                ResolvedFrame::whole_partition()
            } else {
                ResolvedFrame::default_ordered()
            });
        };

        if matches!(start, FrameBound::UnboundedFollowing) {
            return Err(structural!("frame start cannot be UNBOUNDED FOLLOWING"));
        }
        if matches!(end, FrameBound::UnboundedPreceding) {
            return Err(structural!("frame end cannot be UNBOUNDED PRECEDING"));
        }
        let has_offset = |b: &FrameBound| {
            matches!(b, FrameBound::Preceding(_) | FrameBound::Following(_))
        };
        if *units == FrameUnits::Range
            && (has_offset(start) || has_offset(end))
            && spec.order_by.len() != 1
        {
            return Err(structural!(
                "RANGE with offset PRECEDING/FOLLOWING requires exactly one ORDER BY column"
            ));
        }

        Ok(ResolvedFrame {
            units: *units,
            start: self.resolve_bound(start, *units, ctx).await?,
            end: self.resolve_bound(end, *units, ctx).await?,
        })
    }

    async fn resolve_bound(
        &self,
        bound: &FrameBound,
        units: FrameUnits,
        ctx: &QueryContext,
    ) -> Result<Bound> {
        let offset = match bound {
            FrameBound::UnboundedPreceding => return Ok(Bound::UnboundedPreceding),
            FrameBound::CurrentRow => return Ok(Bound::CurrentRow),
            FrameBound::UnboundedFollowing => return Ok(Bound::UnboundedFollowing),
            FrameBound::Preceding(expr) | FrameBound::Following(expr) => {
                self.expr().evaluate(expr, &Row::empty(), ctx).await?
            }
        };

        if offset.is_null() {
            return Err(evaluation!("frame offset must not be null"));
        }
        let negative = match units {
            FrameUnits::Rows | FrameUnits::Groups => offset.try_as_i64()? < 0,
            FrameUnits::Range => offset.try_as_f64()? < 0.0,
        };
        if negative {
            return Err(evaluation!("frame offset must not be negative"));
        }

        Ok(match bound {
            FrameBound::Preceding(_) => Bound::Preceding(offset),
            _ => Bound::Following(offset),
        })
    }
}

/// Hash of an ORDER BY key under which values that sort as equal agree.
/// Integral floats hash like the matching integer.
fn peer_hash(key: &[ScalarValue]) -> u64 {
    let normalized: Vec<ScalarValue> = key
        .iter()
        .map(|value| match value {
            ScalarValue::Float64(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                ScalarValue::Int64(*f as i64)
            }
            other => other.clone(),
        })
        .collect();
    stable_hash(&normalized)
}

/// Inclusive frame of the row at `pos`, `None` if it is empty.
fn frame_bounds(
    frame: &ResolvedFrame,
    sorted: &SortedPartition<'_>,
    pos: usize,
    ctx: &QueryContext,
) -> Result<Option<Frame>> {
    let len = sorted.partition.len() as i64;
    let (start, end) = match frame.units {
        FrameUnits::Rows => (
            rows_bound(&frame.start, pos, len)?,
            rows_bound(&frame.end, pos, len)?,
        ),
        FrameUnits::Groups => (
            groups_bound(&frame.start, sorted.partition, pos, true)?,
            groups_bound(&frame.end, sorted.partition, pos, false)?,
        ),
        FrameUnits::Range => (
            range_bound(&frame.start, sorted, pos, true, ctx)?,
            range_bound(&frame.end, sorted, pos, false, ctx)?,
        ),
    };

    let start = start.max(0);
    let end = end.min(len - 1);
    if start > end {
        return Ok(None);
    }
    Ok(Some(Frame {
        start: start as usize,
        end: end as usize,
    }))
}

fn rows_bound(bound: &Bound, pos: usize, len: i64) -> Result<i64> {
    let pos = pos as i64;
    Ok(match bound {
        Bound::UnboundedPreceding => 0,
        Bound::Preceding(n) => pos.saturating_sub(n.try_as_i64()?),
        Bound::CurrentRow => pos,
        Bound::Following(n) => pos.saturating_add(n.try_as_i64()?),
        Bound::UnboundedFollowing => len - 1,
    })
}

fn groups_bound(bound: &Bound, partition: &WindowPartition, pos: usize, is_start: bool) -> Result<i64> {
    let len = partition.len() as i64;
    let groups = partition.num_peer_groups() as i64;
    let group = partition.peer_group[pos] as i64;

    let target = match bound {
        Bound::UnboundedPreceding => return Ok(0),
        Bound::UnboundedFollowing => return Ok(len - 1),
        Bound::CurrentRow => group,
        Bound::Preceding(n) => group.saturating_sub(n.try_as_i64()?),
        Bound::Following(n) => group.saturating_add(n.try_as_i64()?),
    };

    if target < 0 {
        return Ok(if is_start { 0 } else { -1 });
    }
    if target >= groups {
        return Ok(if is_start { len } else { len - 1 });
    }
    let idx = if is_start {
        partition.group_start(target as usize)
    } else {
        partition.group_end(target as usize)
    };
    Ok(idx.map(|i| i as i64).unwrap_or(-1))
}

fn range_bound(
    bound: &Bound,
    sorted: &SortedPartition<'_>,
    pos: usize,
    is_start: bool,
    ctx: &QueryContext,
) -> Result<i64> {
    let partition = sorted.partition;
    let len = partition.len() as i64;
    let (offset, preceding) = match bound {
        Bound::UnboundedPreceding => return Ok(0),
        Bound::UnboundedFollowing => return Ok(len - 1),
        Bound::CurrentRow => {
            return Ok(if is_start {
                partition.peer_start[pos] as i64
            } else {
                partition.peer_end[pos] as i64
            });
        }
        Bound::Preceding(n) => (n, true),
        Bound::Following(n) => (n, false),
    };

    let current = &sorted.keys[pos][0];
    let order = sorted.orders[0];
    // NULLs only have their peers in range.
    if current.is_null() {
        return Ok(if is_start {
            partition.peer_start[pos] as i64
        } else {
            partition.peer_end[pos] as i64
        });
    }

    // Moving toward the start of the partition means subtracting in an
    // ascending sort and adding in a descending one.
    let op = if preceding == order.asc {
        BinaryOperator::Minus
    } else {
        BinaryOperator::Plus
    };
    let target = ops::binary(op, current, offset, ctx)?;
    if !target.is_numeric() {
        return Err(evaluation!("RANGE offsets require a numeric ORDER BY column"));
    }

    let keys = sorted.keys;
    if is_start {
        // First row not sorting before the target.
        Ok(keys
            .iter()
            .position(|key| order.compare(&key[0], &target) != Ordering::Less)
            .map(|i| i as i64)
            .unwrap_or(len))
    } else {
        // Last row not sorting after the target.
        Ok(keys
            .iter()
            .rposition(|key| order.compare(&key[0], &target) != Ordering::Greater)
            .map(|i| i as i64)
            .unwrap_or(-1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::*;
    use crate::ast::{Expr, OrderByExpr};
    use crate::config::Dialect;
    use crate::row::{CompositeRow, record};
    use crate::store::{MemoryStore, MutationOptions};

    fn rows(values: &[Option<i64>]) -> Vec<Row> {
        values
            .iter()
            .map(|v| Row::new(CompositeRow::single("t", record([("v", *v)]))))
            .collect()
    }

    fn call(spec: WindowSpec) -> FunctionCall {
        let Expr::Function(call) = over(func("sum", vec![col("v")]), spec) else {
            unreachable!()
        };
        call
    }

    fn framed(order_by: Vec<OrderByExpr>, units: FrameUnits, start: FrameBound, end: FrameBound) -> WindowSpec {
        WindowSpec {
            order_by,
            frame: Some(WindowFrame { units, start, end }),
            ..Default::default()
        }
    }

    async fn frames(values: &[Option<i64>], spec: WindowSpec) -> Result<Vec<Option<(usize, usize)>>> {
        frames_of(rows(values), spec).await
    }

    async fn frames_of(input: Vec<Row>, spec: WindowSpec) -> Result<Vec<Option<(usize, usize)>>> {
        let store = MemoryStore::new();
        let exec = StatementEvaluator::new(&store, MutationOptions::default());
        let ctx = QueryContext::with_dialect(Dialect::Postgres);
        let call = call(spec);
        let out = exec.window_rows(input, &[&call], &ctx).await?;
        let key = window_key(&call, &ctx)?;
        Ok(out
            .iter()
            .map(|row| {
                row.window(key)
                    .unwrap()
                    .frame
                    .map(|f| (f.start, f.end))
            })
            .collect())
    }

    fn offset(n: i64) -> Box<Expr> {
        Box::new(lit(n))
    }

    #[tokio::test]
    async fn default_frames() {
        let ordered = window(vec![], vec![asc(col("v"))]);
        let got = frames(&[Some(1), Some(1), Some(2)], ordered).await.unwrap();
        assert_eq!(vec![Some((0, 1)), Some((0, 1)), Some((0, 2))], got);

        let unordered = window(vec![], vec![]);
        let got = frames(&[Some(1), Some(2)], unordered).await.unwrap();
        assert_eq!(vec![Some((0, 1)), Some((0, 1))], got);
    }

    #[tokio::test]
    async fn mixed_numeric_keys_are_peers() {
        let input = [
            ScalarValue::Int64(1),
            ScalarValue::Float64(1.0),
            ScalarValue::Int64(2),
        ]
        .into_iter()
        .map(|v| Row::new(CompositeRow::single("t", record([("v", v)]))))
        .collect();
        let got = frames_of(input, window(vec![], vec![asc(col("v"))]))
            .await
            .unwrap();
        assert_eq!(vec![Some((0, 1)), Some((0, 1)), Some((0, 2))], got);
    }

    #[tokio::test]
    async fn rows_frames_clamp_to_partition() {
        let spec = framed(
            vec![asc(col("v"))],
            FrameUnits::Rows,
            FrameBound::Preceding(offset(1)),
            FrameBound::Following(offset(1)),
        );
        let got = frames(&[Some(1), Some(2), Some(3)], spec).await.unwrap();
        assert_eq!(vec![Some((0, 1)), Some((0, 2)), Some((1, 2))], got);

        let spec = framed(
            vec![asc(col("v"))],
            FrameUnits::Rows,
            FrameBound::Following(offset(1)),
            FrameBound::UnboundedFollowing,
        );
        let got = frames(&[Some(1), Some(2)], spec).await.unwrap();
        assert_eq!(vec![Some((1, 1)), None], got);
    }

    #[tokio::test]
    async fn groups_frames_follow_peer_groups() {
        let spec = framed(
            vec![asc(col("v"))],
            FrameUnits::Groups,
            FrameBound::Preceding(offset(1)),
            FrameBound::CurrentRow,
        );
        let got = frames(&[Some(1), Some(1), Some(2), Some(3)], spec).await.unwrap();
        assert_eq!(
            vec![Some((0, 1)), Some((0, 1)), Some((0, 2)), Some((2, 3))],
            got
        );
    }

    #[tokio::test]
    async fn range_frames_use_value_distance() {
        let spec = framed(
            vec![asc(col("v"))],
            FrameUnits::Range,
            FrameBound::Preceding(offset(2)),
            FrameBound::CurrentRow,
        );
        let got = frames(&[Some(1), Some(2), Some(5), None], spec).await.unwrap();
        assert_eq!(
            vec![Some((0, 0)), Some((0, 1)), Some((2, 2)), Some((3, 3))],
            got
        );

        let spec = framed(
            vec![desc(col("v"))],
            FrameUnits::Range,
            FrameBound::CurrentRow,
            FrameBound::Following(offset(3)),
        );
        // Sorted descending: 5, 2, 1.
        let got = frames(&[Some(1), Some(2), Some(5)], spec).await.unwrap();
        assert_eq!(vec![Some((2, 2)), Some((1, 2)), Some((0, 1))], got);
    }

    #[tokio::test]
    async fn invalid_frames() {
        let spec = framed(
            vec![asc(col("v"))],
            FrameUnits::Rows,
            FrameBound::UnboundedFollowing,
            FrameBound::UnboundedFollowing,
        );
        assert!(frames(&[Some(1)], spec).await.is_err());

        let spec = framed(
            vec![asc(col("v"))],
            FrameUnits::Rows,
            FrameBound::Preceding(offset(-1)),
            FrameBound::CurrentRow,
        );
        assert!(frames(&[Some(1)], spec).await.is_err());

        let spec = framed(
            vec![],
            FrameUnits::Range,
            FrameBound::Preceding(offset(1)),
            FrameBound::CurrentRow,
        );
        assert!(frames(&[Some(1)], spec).await.is_err());
    }

    #[tokio::test]
    async fn partitions_keep_input_order() {
        let store = MemoryStore::new();
        let exec = StatementEvaluator::new(&store, MutationOptions::default());
        let ctx = QueryContext::with_dialect(Dialect::Postgres);
        let input: Vec<Row> = [("a", 2), ("b", 1), ("a", 1)]
            .into_iter()
            .map(|(g, v)| Row::new(CompositeRow::single("t", record([("g", ScalarValue::from(g)), ("v", ScalarValue::from(v))]))))
            .collect();
        let call = call(window(vec![col("g")], vec![asc(col("v"))]));
        let out = exec.window_rows(input, &[&call], &ctx).await.unwrap();
        let key = window_key(&call, &ctx).unwrap();

        let positions: Vec<_> = out.iter().map(|r| r.window(key).unwrap().position).collect();
        assert_eq!(vec![1, 0, 0], positions);
        assert_eq!(
            Some(&ScalarValue::Int64(2)),
            out[0].data.get("t").unwrap().get("v")
        );
    }
}
