//! GROUP BY, GROUPING SETS, ROLLUP and CUBE.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use super::StatementEvaluator;
use super::select::contains_windowed;
use super::shape::Shape;
use crate::ast::{Expr, GroupByExpr};
use crate::context::QueryContext;
use crate::errors::{Result, evaluation};
use crate::meta::{GroupMeta, GroupingSet, same_grouping_expr};
use crate::row::{CompositeRow, Row};
use crate::value::ScalarValue;

/// Most expressions a single CUBE may list.
const MAX_CUBE_EXPRS: usize = 12;

/// Expand a GROUP BY clause into its grouping sets.
///
/// Each element contributes a list of alternatives, and the result is their
/// cross product. A plain expression is a single alternative, ROLLUP
/// contributes every prefix from longest to empty, CUBE every subset with
/// the first expression as the most significant bit.
pub fn expand_grouping_sets(group_by: &[GroupByExpr]) -> Result<Vec<Vec<Expr>>> {
    let mut sets: Vec<Vec<Expr>> = vec![Vec::new()];
    for element in group_by {
        let alternatives: Vec<Vec<Expr>> = match element {
            GroupByExpr::Expr(expr) => vec![vec![expr.clone()]],
            GroupByExpr::GroupingSets(sets) => sets.clone(),
            GroupByExpr::Rollup(exprs) => (0..=exprs.len())
                .rev()
                .map(|len| exprs[..len].to_vec())
                .collect(),
            GroupByExpr::Cube(exprs) => {
                let n = exprs.len();
                if n > MAX_CUBE_EXPRS {
                    return Err(evaluation!("CUBE is limited to {MAX_CUBE_EXPRS} elements"));
                }
                (0..1u64 << n)
                    .rev()
                    .map(|mask| {
                        exprs
                            .iter()
                            .enumerate()
                            .filter(|(idx, _)| mask & (1 << (n - 1 - idx)) != 0)
                            .map(|(_, e)| e.clone())
                            .collect()
                    })
                    .collect()
            }
        };

        sets = sets
            .iter()
            .flat_map(|set| {
                alternatives.iter().map(move |alt| {
                    let mut combined = set.clone();
                    for expr in alt {
                        if !combined.contains(expr) {
                            combined.push(expr.clone());
                        }
                    }
                    combined
                })
            })
            .collect();
    }
    Ok(sets)
}

/// Grouping sets with their presence masks over the distinct entries.
fn grouping_sets(group_by: &[GroupByExpr]) -> Result<Vec<Arc<GroupingSet>>> {
    let sets = expand_grouping_sets(group_by)?;
    let mut entries: Vec<Expr> = Vec::new();
    for expr in sets.iter().flatten() {
        if !entries.contains(expr) {
            entries.push(expr.clone());
        }
    }
    let entries: Arc<[Expr]> = entries.into();
    Ok(sets
        .into_iter()
        .map(|set| {
            Arc::new(GroupingSet {
                present: entries.iter().map(|e| set.contains(e)).collect(),
                entries: entries.clone(),
            })
        })
        .collect())
}

/// Null out columns that only absent grouping entries refer to.
fn null_absent_columns(row: &mut CompositeRow, set: &GroupingSet) {
    let present: Vec<&Expr> = set.exprs().collect();
    for (entry, is_present) in set.entries.iter().zip(&set.present) {
        if *is_present {
            continue;
        }
        let Expr::Column(col) = entry else {
            continue;
        };
        if present.iter().any(|p| same_grouping_expr(p, entry)) {
            continue;
        }
        for (alias, record) in row.iter_mut() {
            if col.relation.as_deref().is_some_and(|rel| rel != alias) {
                continue;
            }
            if let Some(value) = record.get_mut(&col.name) {
                *value = ScalarValue::Null;
            }
        }
    }
}

impl StatementEvaluator<'_> {
    /// Partition rows into groups, one pass per grouping set. Returns one
    /// representative per group with its [`GroupMeta`] attached.
    ///
    /// A set with no expressions always produces exactly one group, even
    /// over no rows.
    pub(crate) async fn group_rows(
        &self,
        rows: Vec<Row>,
        group_by: &[GroupByExpr],
        shape: &Shape,
        ctx: &QueryContext,
    ) -> Result<Vec<Row>> {
        let sets = grouping_sets(group_by)?;
        let mut out = Vec::new();

        for set in sets {
            let exprs: Vec<&Expr> = set.exprs().collect();
            if exprs.iter().any(|e| contains_windowed(e)) {
                return Err(evaluation!("window functions are not allowed in GROUP BY"));
            }

            let mut groups: IndexMap<Vec<ScalarValue>, Vec<Row>> = IndexMap::new();
            for row in &rows {
                let mut key = Vec::with_capacity(exprs.len());
                for expr in &exprs {
                    key.push(self.expr().evaluate(expr, row, ctx).await?);
                }
                groups.entry(key).or_default().push(row.clone());
            }
            if exprs.is_empty() && groups.is_empty() {
                groups.insert(Vec::new(), Vec::new());
            }

            for (_, members) in groups {
                let mut representative = match members.first() {
                    Some(first) => (*first.data).clone(),
                    None => shape.null_row(),
                };
                null_absent_columns(&mut representative, &set);
                out.push(Row {
                    data: Arc::new(representative),
                    group: Some(Arc::new(GroupMeta {
                        members: members.into(),
                        set: set.clone(),
                    })),
                    windows: None,
                });
            }
        }

        debug!(input = rows.len(), groups = out.len(), "grouped rows");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::*;
    use crate::config::Dialect;
    use crate::row::record;
    use crate::store::{MemoryStore, MutationOptions};

    fn names(sets: &[Vec<Expr>]) -> Vec<String> {
        sets.iter()
            .map(|set| {
                set.iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .collect()
    }

    #[test]
    fn rollup_prefixes() {
        let sets = expand_grouping_sets(&[GroupByExpr::Rollup(vec![col("a"), col("b")])]).unwrap();
        assert_eq!(vec!["a,b", "a", ""], names(&sets));
    }

    #[test]
    fn cube_subsets() {
        let sets = expand_grouping_sets(&[GroupByExpr::Cube(vec![col("a"), col("b")])]).unwrap();
        assert_eq!(vec!["a,b", "a", "b", ""], names(&sets));
    }

    #[test]
    fn oversized_cube_rejected() {
        let exprs: Vec<Expr> = (0..64).map(|i| col(&format!("c{i}"))).collect();
        let err = expand_grouping_sets(&[GroupByExpr::Cube(exprs)]).unwrap_err();
        assert!(matches!(err, crate::errors::ExecError::Evaluation(_)));
    }

    #[test]
    fn cross_product_of_elements() {
        let sets = expand_grouping_sets(&[
            GroupByExpr::Expr(col("a")),
            GroupByExpr::Rollup(vec![col("b"), col("c")]),
        ])
        .unwrap();
        assert_eq!(vec!["a,b,c", "a,b", "a"], names(&sets));

        let sets = expand_grouping_sets(&[GroupByExpr::GroupingSets(vec![
            vec![col("a")],
            vec![],
        ])])
        .unwrap();
        assert_eq!(vec!["a", ""], names(&sets));
    }

    fn rows() -> Vec<Row> {
        [(1, 10), (1, 20), (2, 30)]
            .into_iter()
            .map(|(a, b)| Row::new(CompositeRow::single("t", record([("a", a), ("b", b)]))))
            .collect()
    }

    #[tokio::test]
    async fn rollup_groups_null_absent_columns() {
        let store = MemoryStore::new();
        let exec = StatementEvaluator::new(&store, MutationOptions::default());
        let ctx = QueryContext::with_dialect(Dialect::Postgres);
        let shape = Shape::single("t", vec!["a".to_string(), "b".to_string()]);

        let groups = exec
            .group_rows(rows(), &[GroupByExpr::Rollup(vec![col("a")])], &shape, &ctx)
            .await
            .unwrap();
        assert_eq!(3, groups.len());

        let grand = &groups[2];
        assert_eq!(Some(&ScalarValue::Null), grand.data.get("t").unwrap().get("a"));
        let meta = grand.group.as_ref().unwrap();
        assert_eq!(3, meta.members.len());
        assert_eq!(1, meta.grouping_bit(&col("a")).unwrap());

        assert_eq!(2, groups[0].group.as_ref().unwrap().members.len());
        assert_eq!(
            Some(&ScalarValue::Int64(1)),
            groups[0].data.get("t").unwrap().get("a")
        );
    }

    #[tokio::test]
    async fn empty_input_still_has_grand_total() {
        let store = MemoryStore::new();
        let exec = StatementEvaluator::new(&store, MutationOptions::default());
        let ctx = QueryContext::with_dialect(Dialect::Postgres);
        let shape = Shape::single("t", vec!["a".to_string()]);

        let groups = exec.group_rows(Vec::new(), &[], &shape, &ctx).await.unwrap();
        assert_eq!(1, groups.len());
        assert!(groups[0].group.as_ref().unwrap().members.is_empty());

        let groups = exec
            .group_rows(Vec::new(), &[GroupByExpr::Expr(col("a"))], &shape, &ctx)
            .await
            .unwrap();
        assert!(groups.is_empty());
    }
}
