//! Read-only walks over query trees, descending into subqueries.

use crate::ast::{
    ColumnRef, Distinct, Expr, FromItem, GroupByExpr, JoinConstraint, ObjectName, Query,
    QueryBody, Select, SelectItem, TableFactor,
};
use crate::context::QueryContext;
use crate::errors::Result;
use crate::exec::shape::{Shape, ShapeResolver};
use crate::row::EXCLUDED_ALIAS;

/// Call `f` with every relation name the query reads, including those
/// read by CTEs and subqueries.
fn walk_relations<'a, F>(query: &'a Query, f: &mut F)
where
    F: FnMut(&'a ObjectName),
{
    if let Some(with) = &query.with {
        for cte in &with.ctes {
            walk_relations(&cte.query, f);
        }
    }
    walk_body_relations(&query.body, f);
    for order in &query.order_by {
        walk_expr_relations(&order.expr, f);
    }
}

fn walk_body_relations<'a, F>(body: &'a QueryBody, f: &mut F)
where
    F: FnMut(&'a ObjectName),
{
    match body {
        QueryBody::Select(select) => {
            for item in &select.projection {
                if let SelectItem::Expr { expr, .. } = item {
                    walk_expr_relations(expr, f);
                }
            }
            for item in &select.from {
                walk_item_relations(item, f);
            }
            for expr in select.selection.iter().chain(select.having.as_ref()) {
                walk_expr_relations(expr, f);
            }
        }
        QueryBody::SetOperation { left, right, .. } => {
            walk_body_relations(left, f);
            walk_body_relations(right, f);
        }
        QueryBody::Values(rows) => rows
            .iter()
            .flatten()
            .for_each(|e| walk_expr_relations(e, f)),
        QueryBody::Table { name, .. } => f(name),
        QueryBody::Nested(query) => walk_relations(query, f),
    }
}

fn walk_item_relations<'a, F>(item: &'a FromItem, f: &mut F)
where
    F: FnMut(&'a ObjectName),
{
    let factors = std::iter::once(&item.relation).chain(item.joins.iter().map(|j| &j.relation));
    for factor in factors {
        match factor {
            TableFactor::Table { name, .. } => f(name),
            TableFactor::Derived { subquery, .. } => walk_relations(subquery, f),
            TableFactor::NestedJoin(item) => walk_item_relations(item, f),
            TableFactor::Values { .. } | TableFactor::Function { .. } => (),
        }
    }
    for join in &item.joins {
        if let JoinConstraint::On(expr) = &join.constraint {
            walk_expr_relations(expr, f);
        }
    }
}

fn walk_expr_relations<'a, F>(expr: &'a Expr, f: &mut F)
where
    F: FnMut(&'a ObjectName),
{
    expr.walk(&mut |e| match e {
        Expr::Subquery(query)
        | Expr::Exists {
            subquery: query, ..
        }
        | Expr::InSubquery {
            subquery: query, ..
        } => walk_relations(query, &mut *f),
        _ => (),
    });
}

/// Check if a query references columns that none of its own FROM items
/// provide, so its result depends on the enclosing row.
///
/// A query whose shape cannot be resolved counts as correlated. That only
/// costs a cache miss.
pub fn is_correlated(ctx: &QueryContext, query: &Query) -> bool {
    let resolver = ShapeResolver::new(ctx);
    FreeColumns::default()
        .query(&resolver, query)
        .unwrap_or(true)
}

/// Scope stack for the correlation check. Each entry is a shape visible to
/// the expressions currently being checked, innermost last.
#[derive(Debug, Default)]
struct FreeColumns {
    scopes: Vec<Shape>,
}

impl FreeColumns {
    fn query(&mut self, resolver: &ShapeResolver<'_>, query: &Query) -> Result<bool> {
        let resolver = resolver.with_query_ctes(query)?;
        if let Some(with) = &query.with {
            for cte in &with.ctes {
                if self.query(&resolver, &cte.query)? {
                    return Ok(true);
                }
            }
        }
        if self.body(&resolver, &query.body)? {
            return Ok(true);
        }

        // ORDER BY sees output columns, and the input columns of a SELECT.
        let mut pushed = 1;
        self.scopes
            .push(Shape::single("", resolver.body_columns(&query.body)?));
        if let QueryBody::Select(select) = &query.body {
            self.scopes
                .push(resolver.from_shape(&select.from, &select.origin_schemas)?);
            pushed += 1;
        }
        let tail = query
            .order_by
            .iter()
            .map(|o| &o.expr)
            .chain(query.limit.as_ref())
            .chain(query.offset.as_ref());
        let free = self.exprs(&resolver, tail);
        self.scopes.truncate(self.scopes.len() - pushed);
        free
    }

    fn body(&mut self, resolver: &ShapeResolver<'_>, body: &QueryBody) -> Result<bool> {
        match body {
            QueryBody::Select(select) => self.select(resolver, select),
            QueryBody::SetOperation { left, right, .. } => {
                Ok(self.body(resolver, left)? || self.body(resolver, right)?)
            }
            QueryBody::Values(rows) => self.exprs(resolver, rows.iter().flatten()),
            QueryBody::Table { .. } => Ok(false),
            QueryBody::Nested(query) => self.query(resolver, query),
        }
    }

    fn select(&mut self, resolver: &ShapeResolver<'_>, select: &Select) -> Result<bool> {
        let shape = resolver.from_shape(&select.from, &select.origin_schemas)?;
        let outputs: Vec<String> = resolver
            .select_projection(select)?
            .into_iter()
            .map(|c| c.name)
            .collect();

        self.scopes.push(shape);
        let free = self.select_parts(resolver, select, outputs);
        self.scopes.pop();
        free
    }

    fn select_parts(
        &mut self,
        resolver: &ShapeResolver<'_>,
        select: &Select,
        outputs: Vec<String>,
    ) -> Result<bool> {
        for item in &select.from {
            if self.from_item(resolver, item)? {
                return Ok(true);
            }
        }

        let projection = select.projection.iter().filter_map(|item| match item {
            SelectItem::Expr { expr, .. } => Some(expr),
            _ => None,
        });
        let windows = select.windows.iter().flat_map(|w| {
            w.spec
                .partition_by
                .iter()
                .chain(w.spec.order_by.iter().map(|o| &o.expr))
        });
        let distinct_on = match &select.distinct {
            Some(Distinct::On(exprs)) => exprs.as_slice(),
            _ => &[][..],
        };
        let exprs = projection
            .chain(select.selection.as_ref())
            .chain(select.having.as_ref())
            .chain(windows)
            .chain(distinct_on);
        if self.exprs(resolver, exprs)? {
            return Ok(true);
        }

        // GROUP BY may name output aliases.
        let mut group_by: Vec<&Expr> = Vec::new();
        for group in &select.group_by {
            match group {
                GroupByExpr::Expr(expr) => group_by.push(expr),
                GroupByExpr::GroupingSets(sets) => group_by.extend(sets.iter().flatten()),
                GroupByExpr::Rollup(exprs) | GroupByExpr::Cube(exprs) => group_by.extend(exprs),
            }
        }
        self.scopes.push(Shape::single("", outputs));
        let free = self.exprs(resolver, group_by);
        self.scopes.pop();
        free
    }

    fn from_item(&mut self, resolver: &ShapeResolver<'_>, item: &FromItem) -> Result<bool> {
        if self.factor(resolver, &item.relation)? {
            return Ok(true);
        }
        for join in &item.joins {
            if self.factor(resolver, &join.relation)? {
                return Ok(true);
            }
            if let JoinConstraint::On(expr) = &join.constraint {
                if self.expr(resolver, expr)? {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn factor(&mut self, resolver: &ShapeResolver<'_>, factor: &TableFactor) -> Result<bool> {
        if let TableFactor::NestedJoin(item) = factor {
            return self.from_item(resolver, item);
        }
        // Only LATERAL items see the FROM clause they are part of.
        let hidden = match factor.is_lateral() {
            true => None,
            false => self.scopes.pop(),
        };
        let free = match factor {
            TableFactor::Derived { subquery, .. } => self.query(resolver, subquery),
            TableFactor::Values { rows, .. } => self.exprs(resolver, rows.iter().flatten()),
            TableFactor::Function { functions, .. } => {
                self.exprs(resolver, functions.iter().flat_map(|call| call.args.iter()))
            }
            TableFactor::Table { .. } | TableFactor::NestedJoin(_) => Ok(false),
        };
        self.scopes.extend(hidden);
        free
    }

    fn exprs<'e>(
        &mut self,
        resolver: &ShapeResolver<'_>,
        exprs: impl IntoIterator<Item = &'e Expr>,
    ) -> Result<bool> {
        for expr in exprs {
            if self.expr(resolver, expr)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn expr(&mut self, resolver: &ShapeResolver<'_>, expr: &Expr) -> Result<bool> {
        let mut free = false;
        let mut subqueries = Vec::new();
        let scopes = &self.scopes;
        expr.walk(&mut |e| match e {
            Expr::Column(col) => free |= !resolves(scopes, col),
            Expr::Subquery(query)
            | Expr::Exists {
                subquery: query, ..
            }
            | Expr::InSubquery {
                subquery: query, ..
            } => subqueries.push(query),
            _ => (),
        });
        if free {
            return Ok(true);
        }
        for query in subqueries {
            if self.query(resolver, query)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn resolves(scopes: &[Shape], col: &ColumnRef) -> bool {
    match &col.relation {
        Some(relation) => {
            relation == EXCLUDED_ALIAS || scopes.iter().any(|s| s.columns(relation).is_some())
        }
        None => scopes.iter().any(|s| s.has_column(&col.name)),
    }
}

/// Check if a query body reads from an unqualified relation named `name`.
pub fn references_relation(body: &QueryBody, name: &str) -> bool {
    let mut found = false;
    walk_body_relations(body, &mut |rel| {
        if rel.schema.is_none() && rel.name == name {
            found = true;
        }
    });
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::*;
    use crate::ast::{ColumnSchema, DataType, TableSchema};
    use crate::config::Dialect;

    fn t_schema() -> TableSchema {
        TableSchema::new(
            "t",
            vec![
                ColumnSchema::new("id", DataType::Int),
                ColumnSchema::new("v", DataType::Int),
            ],
        )
    }

    fn select_from(factor: TableFactor, selection: Option<Expr>) -> Select {
        let mut s = select(vec![item(col("v"))], vec![from(factor)]);
        s.selection = selection;
        s.origin_schemas = vec![t_schema()];
        s
    }

    fn select_from_t(selection: Option<Expr>) -> Query {
        select_from(table("t"), selection).into()
    }

    fn correlated(query: &Query) -> bool {
        is_correlated(&QueryContext::with_dialect(Dialect::Postgres), query)
    }

    #[test]
    fn local_references_are_not_correlated() {
        assert!(!correlated(&select_from_t(Some(gt(col("t.id"), lit(1))))));
        assert!(!correlated(&select_from_t(Some(gt(col("id"), lit(1))))));
    }

    #[test]
    fn outer_references_are_correlated() {
        assert!(correlated(&select_from_t(Some(eq(col("t.id"), col("o.id"))))));
        assert!(correlated(&select_from_t(Some(eq(col("id"), col("other_col"))))));
    }

    #[test]
    fn aliased_table_hides_its_name() {
        // SELECT v FROM t t2 WHERE t2.id = t.id
        let query: Query =
            select_from(table_as("t", "t2"), Some(eq(col("t2.id"), col("t.id")))).into();
        assert!(correlated(&query));
    }

    #[test]
    fn projection_alias_is_not_visible_to_where() {
        // SELECT v AS w FROM t WHERE id = w
        let mut s = select_from(table("t"), Some(eq(col("id"), col("w"))));
        s.projection = vec![item_as(col("v"), "w")];
        assert!(correlated(&s.into()));
    }

    #[test]
    fn order_by_sees_output_aliases() {
        let mut s = select_from(table("t"), None);
        s.projection = vec![item_as(col("v"), "w")];
        let mut query: Query = s.into();
        query.order_by = vec![asc(col("w")), asc(col("id"))];
        assert!(!correlated(&query));
    }

    #[test]
    fn nested_subquery_references_count() {
        let inner = select_from_t(Some(eq(col("v"), col("o.v"))));
        let outer = select_from_t(Some(exists(inner)));
        assert!(correlated(&outer));

        // The inner reference resolves against the enclosing SELECT.
        let inner = select_from(table_as("t", "i"), Some(eq(col("i.v"), col("o.v"))));
        let outer: Query = select_from(table_as("t", "o"), Some(exists(inner))).into();
        assert!(!correlated(&outer));
    }

    #[test]
    fn unresolvable_shape_counts_as_correlated() {
        let query: Query = select_from(table("missing"), None).into();
        assert!(correlated(&query));
    }

    #[test]
    fn relation_references() {
        let q = select_from_t(None);
        assert!(references_relation(&q.body, "t"));
        assert!(!references_relation(&q.body, "u"));
    }
}
