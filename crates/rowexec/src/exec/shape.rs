//! Static shapes: which aliases a FROM clause produces and which columns each
//! alias carries, computed without running anything.
//!
//! Outer joins need the shape of the side that produced no row to null-fill
//! it, NATURAL joins need both sides' columns up front, and wildcard
//! expansion and output naming need them even when no rows flow.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::ast::{
    Expr, FromItem, FunctionCall, JoinConstraint, ObjectName, OriginSchemas, Query, QueryBody,
    Select, SelectItem, TableAlias, TableFactor, TableSchema,
};
use crate::config::Dialect;
use crate::context::QueryContext;
use crate::errors::{Result, structural};
use crate::row::{CompositeRow, Record};

/// Column lists of CTEs declared by enclosing WITH clauses that have not
/// been materialized yet.
pub type CteColumns = HashMap<String, Vec<String>>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Shape {
    relations: IndexMap<String, Vec<String>>,
    /// Columns merged by USING or NATURAL joins, with the aliases providing
    /// them, leftmost first.
    merged: IndexMap<String, Vec<String>>,
}

impl Shape {
    pub fn single(alias: impl Into<String>, columns: Vec<String>) -> Self {
        let mut relations = IndexMap::new();
        relations.insert(alias.into(), columns);
        Shape {
            relations,
            merged: IndexMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.relations.keys().map(|s| s.as_str())
    }

    pub fn columns(&self, alias: &str) -> Option<&[String]> {
        self.relations.get(alias).map(|c| c.as_slice())
    }

    /// Append the relations of `other`. Aliases must stay unique.
    pub fn extend(&mut self, other: Shape) -> Result<()> {
        for (alias, columns) in other.relations {
            if self.relations.contains_key(&alias) {
                return Err(structural!("table name \"{alias}\" specified more than once"));
            }
            self.relations.insert(alias, columns);
        }
        for (name, aliases) in other.merged {
            self.merged.insert(name, aliases);
        }
        Ok(())
    }

    /// Distinct column names across all aliases, in order.
    pub fn all_columns(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for columns in self.relations.values() {
            for col in columns {
                if !out.contains(col) {
                    out.push(col.clone());
                }
            }
        }
        out
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.relations.values().any(|cols| cols.iter().any(|c| c == name))
    }

    /// Aliases providing `name`. Merged columns list their merge sources,
    /// anything else the first alias carrying the column.
    pub fn column_sources(&self, name: &str) -> Vec<String> {
        if let Some(aliases) = self.merged.get(name) {
            return aliases.clone();
        }
        self.relations
            .iter()
            .find(|(_, cols)| cols.iter().any(|c| c == name))
            .map(|(alias, _)| vec![alias.clone()])
            .unwrap_or_default()
    }

    /// Record `name` as merged from `left` and `right` sources.
    pub fn merge_column(&mut self, name: &str, left: Vec<String>, right: Vec<String>) {
        let entry = self.merged.entry(name.to_string()).or_default();
        for alias in left.into_iter().chain(right) {
            if !entry.contains(&alias) {
                entry.push(alias);
            }
        }
    }

    /// Append the right side of a join, merging the columns matched by
    /// USING or NATURAL.
    pub fn join(&mut self, right: Shape, constraint: &JoinConstraint) -> Result<Vec<UsingColumn>> {
        let using: Vec<UsingColumn> = using_columns(constraint, self, &right)
            .into_iter()
            .map(|name| UsingColumn {
                left: self.column_sources(&name),
                right: right.column_sources(&name),
                name,
            })
            .collect();
        for col in &using {
            let missing = if col.left.is_empty() {
                "left"
            } else if col.right.is_empty() {
                "right"
            } else {
                continue;
            };
            return Err(structural!(
                "column \"{}\" specified in USING clause does not exist in {missing} table",
                col.name
            ));
        }

        self.extend(right)?;
        for col in &using {
            self.merge_column(&col.name, col.left.clone(), col.right.clone());
        }
        Ok(using)
    }

    /// A composite row with every alias present and every column NULL.
    pub fn null_row(&self) -> CompositeRow {
        let mut row = CompositeRow::new();
        for (alias, columns) in &self.relations {
            row.insert(alias.clone(), null_record(columns));
        }
        row
    }

    /// Expansion of `*`: merged columns first, then every other column in
    /// relation order.
    pub fn wildcard(&self) -> Vec<(String, Expr)> {
        let mut out = Vec::new();
        for (name, aliases) in &self.merged {
            out.push((name.clone(), merged_column_expr(name, aliases)));
        }
        for (alias, columns) in &self.relations {
            for col in columns {
                let merged = self
                    .merged
                    .get(col)
                    .is_some_and(|aliases| aliases.contains(alias));
                if !merged {
                    out.push((col.clone(), qualified(alias, col)));
                }
            }
        }
        out
    }

    /// Expansion of `alias.*`.
    pub fn qualified_wildcard(&self, alias: &str) -> Result<Vec<(String, Expr)>> {
        let columns = self
            .relations
            .get(alias)
            .ok_or_else(|| structural!("missing FROM-clause entry for table \"{alias}\""))?;
        Ok(columns
            .iter()
            .map(|col| (col.clone(), qualified(alias, col)))
            .collect())
    }
}

fn qualified(alias: &str, col: &str) -> Expr {
    Expr::Column(crate::ast::ColumnRef {
        relation: Some(alias.to_string()),
        name: col.to_string(),
    })
}

fn merged_column_expr(name: &str, aliases: &[String]) -> Expr {
    match aliases {
        [single] => qualified(single, name),
        many => Expr::Function(FunctionCall::new(
            "coalesce",
            many.iter().map(|alias| qualified(alias, name)).collect(),
        )),
    }
}

pub fn null_record(columns: &[String]) -> Record {
    columns
        .iter()
        .map(|c| (c.clone(), Default::default()))
        .collect()
}

/// Default column name of the n-th (0-based) column of a VALUES list.
pub fn values_column_name(idx: usize, dialect: Dialect) -> String {
    match dialect {
        Dialect::Postgres => format!("column{}", idx + 1),
        Dialect::MySql => format!("column_{idx}"),
    }
}

/// Apply an alias column list to a relation's own column names. Fewer alias
/// columns than relation columns renames a prefix.
pub fn rename_columns(
    relation: &str,
    columns: Vec<String>,
    alias: Option<&TableAlias>,
) -> Result<Vec<String>> {
    let Some(alias) = alias.filter(|a| !a.columns.is_empty()) else {
        return Ok(columns);
    };
    if alias.columns.len() > columns.len() {
        return Err(structural!(
            "table \"{relation}\" has {} columns available but {} columns specified",
            columns.len(),
            alias.columns.len()
        ));
    }
    Ok(alias
        .columns
        .iter()
        .cloned()
        .chain(columns.into_iter().skip(alias.columns.len()))
        .collect())
}

/// One output column of a projection.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedColumn {
    pub name: String,
    pub expr: Expr,
}

/// Default output name of an unaliased projection expression.
pub fn default_column_name(expr: &Expr, dialect: Dialect) -> String {
    match expr {
        Expr::Column(col) => col.name.clone(),
        Expr::Function(call) => call.name.clone(),
        Expr::Cast { expr, .. } if matches!(**expr, Expr::Column(_) | Expr::Function(_)) => {
            default_column_name(expr, dialect)
        }
        other => match dialect {
            Dialect::Postgres => "?column?".to_string(),
            Dialect::MySql => other.to_string(),
        },
    }
}

/// Make output names unique. Later duplicates get their 1-based position as
/// a suffix.
pub fn dedupe_names(names: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for (idx, name) in names.into_iter().enumerate() {
        if out.contains(&name) {
            let mut candidate = format!("{name}_{}", idx + 1);
            while out.contains(&candidate) {
                candidate.push('_');
            }
            out.push(candidate);
        } else {
            out.push(name);
        }
    }
    out
}

/// Expand wildcards and name every output column.
pub fn expand_projection(
    items: &[SelectItem],
    shape: &Shape,
    dialect: Dialect,
) -> Result<Vec<ProjectedColumn>> {
    let mut cols = Vec::with_capacity(items.len());
    for item in items {
        match item {
            SelectItem::Expr { expr, alias } => cols.push(ProjectedColumn {
                name: alias
                    .clone()
                    .unwrap_or_else(|| default_column_name(expr, dialect)),
                expr: expr.clone(),
            }),
            SelectItem::Wildcard => {
                if shape.is_empty() {
                    return Err(structural!("SELECT * with no tables specified is not valid"));
                }
                cols.extend(
                    shape
                        .wildcard()
                        .into_iter()
                        .map(|(name, expr)| ProjectedColumn { name, expr }),
                );
            }
            SelectItem::QualifiedWildcard(alias) => cols.extend(
                shape
                    .qualified_wildcard(alias)?
                    .into_iter()
                    .map(|(name, expr)| ProjectedColumn { name, expr }),
            ),
        }
    }

    let names = dedupe_names(cols.iter().map(|c| c.name.clone()).collect());
    for (col, name) in cols.iter_mut().zip(names) {
        col.name = name;
    }
    Ok(cols)
}

/// Resolves relation names and column lists for shape computation.
pub struct ShapeResolver<'s> {
    ctx: &'s QueryContext,
    ctes: CteColumns,
}

/// Where a named relation reads from.
#[derive(Debug, Clone, Copy)]
pub enum NamedRelation<'s> {
    Cte,
    Table(&'s TableSchema),
}

impl<'s> ShapeResolver<'s> {
    pub fn new(ctx: &'s QueryContext) -> Self {
        ShapeResolver {
            ctx,
            ctes: CteColumns::new(),
        }
    }

    fn with_ctes(&self, ctes: CteColumns) -> Self {
        let mut merged = self.ctes.clone();
        merged.extend(ctes);
        ShapeResolver {
            ctx: self.ctx,
            ctes: merged,
        }
    }

    fn cte_columns(&self, name: &ObjectName) -> Option<Vec<String>> {
        if name.schema.is_some() {
            return None;
        }
        self.ctes
            .get(&name.name)
            .cloned()
            .or_else(|| self.ctx.cte(&name.name).map(|entry| entry.columns.clone()))
    }

    /// Columns of a named relation: a CTE if one is in scope, a base table
    /// from the statement's resolved schemas otherwise.
    pub fn relation_columns<'o>(
        &self,
        name: &ObjectName,
        origins: &'o [TableSchema],
    ) -> Result<(NamedRelation<'o>, Vec<String>)> {
        if let Some(columns) = self.cte_columns(name) {
            return Ok((NamedRelation::Cte, columns));
        }
        let schema = find_origin(origins, name)?;
        Ok((NamedRelation::Table(schema), schema.column_names()))
    }

    pub fn query_columns(&self, query: &Query) -> Result<Vec<String>> {
        self.with_query_ctes(query)?.body_columns(&query.body)
    }

    /// Resolver that also sees the CTEs declared by `query`'s WITH clause.
    pub fn with_query_ctes(&self, query: &Query) -> Result<ShapeResolver<'s>> {
        match &query.with {
            Some(with) => {
                let mut scope = self.with_ctes(CteColumns::new());
                for cte in &with.ctes {
                    let columns = match &*cte.query {
                        // The anchor term decides the columns of a recursive
                        // CTE.
                        Query {
                            body: QueryBody::SetOperation { left, .. },
                            with: None,
                            ..
                        } if with.recursive => scope.body_columns(left)?,
                        q => scope.query_columns(q)?,
                    };
                    let alias = TableAlias {
                        name: cte.name.clone(),
                        columns: cte.columns.clone(),
                    };
                    let columns = rename_columns(&cte.name, columns, Some(&alias))?;
                    scope.ctes.insert(cte.name.clone(), columns);
                }
                Ok(scope)
            }
            None => Ok(self.with_ctes(CteColumns::new())),
        }
    }

    pub fn body_columns(&self, body: &QueryBody) -> Result<Vec<String>> {
        match body {
            QueryBody::Select(select) => Ok(self
                .select_projection(select)?
                .into_iter()
                .map(|c| c.name)
                .collect()),
            QueryBody::SetOperation { left, .. } => self.body_columns(left),
            QueryBody::Values(rows) => {
                let width = rows.first().map(|r| r.len()).unwrap_or(0);
                Ok((0..width)
                    .map(|idx| values_column_name(idx, self.ctx.dialect))
                    .collect())
            }
            QueryBody::Table {
                name,
                origin_schemas,
            } => Ok(self.relation_columns(name, origin_schemas)?.1),
            QueryBody::Nested(query) => self.query_columns(query),
        }
    }

    pub fn select_projection(&self, select: &Select) -> Result<Vec<ProjectedColumn>> {
        let shape = self.from_shape(&select.from, select.origin_schemas())?;
        expand_projection(&select.projection, &shape, self.ctx.dialect)
    }

    pub fn from_shape(&self, items: &[FromItem], origins: &[TableSchema]) -> Result<Shape> {
        let mut shape = Shape::default();
        for item in items {
            shape.extend(self.item_shape(item, origins)?)?;
        }
        Ok(shape)
    }

    pub fn item_shape(&self, item: &FromItem, origins: &[TableSchema]) -> Result<Shape> {
        let mut shape = self.factor_shape(&item.relation, origins)?;
        for join in &item.joins {
            let right = self.factor_shape(&join.relation, origins)?;
            shape.join(right, &join.constraint)?;
        }
        Ok(shape)
    }

    pub fn factor_shape(&self, factor: &TableFactor, origins: &[TableSchema]) -> Result<Shape> {
        match factor {
            TableFactor::Table { name, alias } => {
                let (_, columns) = self.relation_columns(name, origins)?;
                let alias_name = alias.as_ref().map(|a| a.name.as_str()).unwrap_or(&name.name);
                let columns = rename_columns(alias_name, columns, alias.as_ref())?;
                Ok(Shape::single(alias_name, columns))
            }
            TableFactor::Derived {
                subquery, alias, ..
            } => {
                let alias_name = derived_alias(alias.as_ref());
                let columns = self.query_columns(subquery)?;
                let columns = rename_columns(alias_name, columns, alias.as_ref())?;
                Ok(Shape::single(alias_name, columns))
            }
            TableFactor::Values { rows, alias } => {
                let alias_name = alias.as_ref().map(|a| a.name.as_str()).unwrap_or("values");
                let width = rows.first().map(|r| r.len()).unwrap_or(0);
                let columns = (0..width)
                    .map(|idx| values_column_name(idx, self.ctx.dialect))
                    .collect();
                let columns = rename_columns(alias_name, columns, alias.as_ref())?;
                Ok(Shape::single(alias_name, columns))
            }
            TableFactor::Function {
                functions,
                with_ordinality,
                alias,
                ..
            } => {
                let alias_name = function_alias(functions, alias.as_ref());
                Ok(Shape::single(
                    alias_name,
                    function_columns(functions, *with_ordinality, alias.as_ref())?,
                ))
            }
            TableFactor::NestedJoin(item) => self.item_shape(item, origins),
        }
    }
}

pub fn find_origin<'o>(origins: &'o [TableSchema], name: &ObjectName) -> Result<&'o TableSchema> {
    origins
        .iter()
        .find(|s| s.matches(name))
        .ok_or_else(|| structural!("relation \"{name}\" does not exist"))
}

pub fn derived_alias(alias: Option<&TableAlias>) -> &str {
    alias.map(|a| a.name.as_str()).unwrap_or("subquery")
}

pub fn function_alias<'f>(functions: &'f [FunctionCall], alias: Option<&'f TableAlias>) -> &'f str {
    alias
        .map(|a| a.name.as_str())
        .or_else(|| functions.first().map(|f| f.name.as_str()))
        .unwrap_or("function")
}

/// Output columns of a set-returning function source. A single function
/// aliased without a column list is named after the alias.
pub fn function_columns(
    functions: &[FunctionCall],
    with_ordinality: bool,
    alias: Option<&TableAlias>,
) -> Result<Vec<String>> {
    let mut columns: Vec<String> = match (functions, alias) {
        ([_], Some(alias)) if alias.columns.is_empty() => vec![alias.name.clone()],
        _ => functions.iter().map(|f| f.name.clone()).collect(),
    };
    if with_ordinality {
        columns.push("ordinality".to_string());
    }
    let relation = function_alias(functions, alias).to_string();
    rename_columns(&relation, dedupe_names(columns), alias)
}

/// A column matched by USING or NATURAL, with the aliases providing it on
/// each side of the join.
#[derive(Debug, Clone, PartialEq)]
pub struct UsingColumn {
    pub name: String,
    pub left: Vec<String>,
    pub right: Vec<String>,
}

/// Column names a join condition matches on: the USING list, or the
/// columns common to both sides for NATURAL.
pub fn using_columns(constraint: &JoinConstraint, left: &Shape, right: &Shape) -> Vec<String> {
    match constraint {
        JoinConstraint::Using(cols) => cols.clone(),
        JoinConstraint::Natural => left
            .all_columns()
            .into_iter()
            .filter(|c| right.has_column(c))
            .collect(),
        JoinConstraint::On(_) | JoinConstraint::None => Vec::new(),
    }
}
