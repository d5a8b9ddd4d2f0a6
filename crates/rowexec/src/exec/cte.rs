//! WITH clauses.
//!
//! Every CTE is materialized once, in declaration order, before the body of
//! its query is opened. Later CTEs see earlier ones.

use std::collections::HashSet;
use std::sync::Arc;

use futures::TryStreamExt;
use tracing::{debug, trace};

use super::shape::rename_columns;
use super::{StatementEvaluator, record_values, visit, zip_record};
use crate::ast::{Cte, QueryBody, SetOperator, TableAlias, With};
use crate::context::{CteEntry, QueryContext};
use crate::errors::{Result, evaluation, structural};
use crate::row::Record;
use crate::value::ScalarValue;

/// Anchor and recursive parts of a self-referencing CTE.
struct RecursiveParts<'a> {
    anchor: &'a QueryBody,
    step: &'a QueryBody,
    all: bool,
}

fn recursive_parts<'a>(with: &With, cte: &'a Cte) -> Option<RecursiveParts<'a>> {
    if !with.recursive || cte.query.with.is_some() {
        return None;
    }
    match &cte.query.body {
        QueryBody::SetOperation {
            op: SetOperator::Union,
            all,
            left,
            right,
        } if visit::references_relation(right, &cte.name) => Some(RecursiveParts {
            anchor: left,
            step: right,
            all: *all,
        }),
        _ => None,
    }
}

impl StatementEvaluator<'_> {
    /// Materialize every CTE of a WITH clause, returning a context where
    /// they can be referenced by name.
    pub(crate) async fn materialize_ctes(&self, with: &With, ctx: QueryContext) -> Result<QueryContext> {
        let mut names = HashSet::with_capacity(with.ctes.len());
        for cte in &with.ctes {
            if !names.insert(cte.name.as_str()) {
                return Err(structural!(
                    "WITH query name \"{}\" specified more than once",
                    cte.name
                ));
            }
        }

        let mut ctx = ctx;
        for cte in &with.ctes {
            let entry = match recursive_parts(with, cte) {
                Some(parts) => self.materialize_recursive(cte, parts, &ctx).await?,
                None => {
                    let output = self.collect_query(&cte.query, ctx.nested()?).await?;
                    let columns = cte_columns(cte, output.columns)?;
                    let rows = output
                        .rows
                        .iter()
                        .map(|r| zip_record(&columns, record_values(r)))
                        .collect::<Vec<_>>();
                    CteEntry {
                        columns,
                        rows: rows.into(),
                    }
                }
            };
            debug!(cte = %cte.name, rows = entry.rows.len(), "materialized cte");
            ctx = ctx.with_ctes(vec![(cte.name.clone(), Arc::new(entry))])?;
        }
        Ok(ctx)
    }

    /// Iterate the recursive part against the rows produced by the previous
    /// iteration until it produces nothing new.
    async fn materialize_recursive(
        &self,
        cte: &Cte,
        parts: RecursiveParts<'_>,
        ctx: &QueryContext,
    ) -> Result<CteEntry> {
        let anchor = self.open_body(parts.anchor, ctx.nested()?).await?;
        let columns = cte_columns(cte, anchor.columns)?;
        let anchor_rows: Vec<Record> = anchor.rows.try_collect().await?;

        let mut seen: HashSet<Vec<ScalarValue>> = HashSet::new();
        let mut result: Vec<Record> = Vec::new();
        let mut working: Vec<Record> = Vec::new();
        for record in anchor_rows {
            let values = record_values(&record);
            if parts.all || seen.insert(values.clone()) {
                let record = zip_record(&columns, values);
                result.push(record.clone());
                working.push(record);
            }
        }

        let max_iterations = ctx.max_recursive_iterations();
        let mut iteration = 0;
        while !working.is_empty() {
            iteration += 1;
            if iteration > max_iterations {
                return Err(evaluation!(
                    "recursive query \"{}\" exceeded {max_iterations} iterations",
                    cte.name
                ));
            }

            let step_ctx = ctx
                .nested()?
                .without_cache()
                .with_ctes(vec![(
                    cte.name.clone(),
                    Arc::new(CteEntry {
                        columns: columns.clone(),
                        rows: std::mem::take(&mut working).into(),
                    }),
                )])?;
            let step = self.open_body(parts.step, step_ctx).await?;
            if step.columns.len() != columns.len() {
                return Err(structural!(
                    "recursive query \"{}\" column count mismatch, {} in non-recursive term but {} overall",
                    cte.name,
                    columns.len(),
                    step.columns.len()
                ));
            }
            let produced: Vec<Record> = step.rows.try_collect().await?;

            for record in produced {
                let values = record_values(&record);
                if parts.all || seen.insert(values.clone()) {
                    let record = zip_record(&columns, values);
                    result.push(record.clone());
                    working.push(record);
                }
            }
            trace!(cte = %cte.name, iteration, new = working.len(), "recursive step");
        }

        Ok(CteEntry {
            columns,
            rows: result.into(),
        })
    }
}

/// Output column names of a CTE, applying its column list.
fn cte_columns(cte: &Cte, columns: Vec<String>) -> Result<Vec<String>> {
    let alias = TableAlias {
        name: cte.name.clone(),
        columns: cte.columns.clone(),
    };
    rename_columns(&cte.name, columns, Some(&alias))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::*;
    use crate::ast::{Query, Select};
    use crate::config::{Dialect, ExecutionConfig, QueryOptions};
    use crate::errors::ExecError;
    use crate::store::{MemoryStore, MutationOptions};

    fn counter(limit: i64, all: bool) -> Query {
        // WITH RECURSIVE n(x) AS (SELECT 1 UNION SELECT x + 1 FROM n WHERE x < limit)
        // SELECT x FROM n
        let mut step = select(vec![item(add(col("x"), lit(1)))], vec![from(table("n"))]);
        step.selection = Some(lt(col("x"), lit(limit)));
        let body = QueryBody::SetOperation {
            op: SetOperator::Union,
            all,
            left: Box::new(QueryBody::Select(Box::new(select(vec![item(lit(1))], vec![])))),
            right: Box::new(QueryBody::Select(Box::new(step))),
        };
        let mut query: Query = select(vec![item(col("x"))], vec![from(table("n"))]).into();
        query.with = Some(With {
            recursive: true,
            ctes: vec![Cte {
                name: "n".to_string(),
                columns: vec!["x".to_string()],
                query: Box::new(Query::new(body)),
            }],
        });
        query
    }

    #[tokio::test]
    async fn recursive_counter() {
        let store = MemoryStore::new();
        let exec = StatementEvaluator::new(&store, MutationOptions::default());
        let out = exec
            .collect_query(&counter(5, true), QueryContext::with_dialect(Dialect::Postgres))
            .await
            .unwrap();
        let got: Vec<_> = out.rows.iter().map(|r| r["x"].clone()).collect();
        assert_eq!(
            (1..=5).map(ScalarValue::Int64).collect::<Vec<_>>(),
            got
        );
    }

    #[tokio::test]
    async fn recursion_limit() {
        let store = MemoryStore::new();
        let exec = StatementEvaluator::new(&store, MutationOptions::default());
        let config = ExecutionConfig {
            max_recursive_iterations: 10,
            ..Default::default()
        };
        let ctx = QueryContext::new(&config, &QueryOptions::default(), uuid::Uuid::nil());
        let err = exec
            .collect_query(&counter(100, true), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Evaluation(_)), "{err}");
    }

    #[tokio::test]
    async fn later_ctes_see_earlier_ones() {
        let store = MemoryStore::new();
        let exec = StatementEvaluator::new(&store, MutationOptions::default());

        let a: Query = select(vec![item_as(lit(1), "v")], vec![]).into();
        let b: Query = select(vec![item_as(add(col("v"), lit(1)), "w")], vec![from(table("a"))]).into();
        let mut query: Query = select(vec![item(col("w"))], vec![from(table("b"))]).into();
        query.with = Some(With {
            recursive: false,
            ctes: vec![
                Cte {
                    name: "a".to_string(),
                    columns: vec![],
                    query: Box::new(a),
                },
                Cte {
                    name: "b".to_string(),
                    columns: vec![],
                    query: Box::new(b),
                },
            ],
        });

        let out = exec
            .collect_query(&query, QueryContext::with_dialect(Dialect::Postgres))
            .await
            .unwrap();
        assert_eq!(vec![crate::row::record([("w", 2)])], out.rows);
    }

    #[tokio::test]
    async fn duplicate_cte_name() {
        let store = MemoryStore::new();
        let exec = StatementEvaluator::new(&store, MutationOptions::default());
        let cte = Cte {
            name: "a".to_string(),
            columns: vec![],
            query: Box::new(Select::default().into()),
        };
        let mut query: Query = select(vec![item(lit(1))], vec![]).into();
        query.with = Some(With {
            recursive: false,
            ctes: vec![cte.clone(), cte],
        });
        let err = exec
            .collect_query(&query, QueryContext::with_dialect(Dialect::Postgres))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Structural(_)));
    }
}
