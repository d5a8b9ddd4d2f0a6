use std::fmt;

use super::expr::{ColumnRef, Expr, FunctionCall, OrderByExpr, WindowSpec};
use super::schema::{ObjectName, TableSchema};

/// Statements that reference relations expose the resolved schema of each
/// relation, in FROM order. The resolver upstream fills these in.
pub trait OriginSchemas {
    fn origin_schemas(&self) -> &[TableSchema];

    fn find_origin_schema(&self, name: &ObjectName) -> Option<&TableSchema> {
        self.origin_schemas().iter().find(|s| s.matches(name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Statement {
    Query(Query),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    CreateTable(CreateTable),
    DropTable(DropTable),
    CreateSchema(CreateSchema),
    DropSchema(DropSchema),
    AlterTable(ObjectName),
}

impl Statement {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Query(_) => "SELECT",
            Self::Insert(_) => "INSERT",
            Self::Update(_) => "UPDATE",
            Self::Delete(_) => "DELETE",
            Self::CreateTable(_) => "CREATE TABLE",
            Self::DropTable(_) => "DROP TABLE",
            Self::CreateSchema(_) => "CREATE SCHEMA",
            Self::DropSchema(_) => "DROP SCHEMA",
            Self::AlterTable(_) => "ALTER TABLE",
        }
    }
}

/// A full query: optional WITH, a body, and the trailing ORDER BY / LIMIT /
/// OFFSET.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query {
    pub with: Option<With>,
    pub body: QueryBody,
    pub order_by: Vec<OrderByExpr>,
    pub limit: Option<Expr>,
    pub offset: Option<Expr>,
}

impl Query {
    pub fn new(body: QueryBody) -> Self {
        Query {
            with: None,
            body,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }
}

impl From<Select> for Query {
    fn from(value: Select) -> Self {
        Query::new(QueryBody::Select(Box::new(value)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetOperator {
    Union,
    Intersect,
    Except,
}

impl fmt::Display for SetOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Union => write!(f, "UNION"),
            Self::Intersect => write!(f, "INTERSECT"),
            Self::Except => write!(f, "EXCEPT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryBody {
    Select(Box<Select>),
    SetOperation {
        op: SetOperator,
        /// `ALL` if true, `DISTINCT` otherwise.
        all: bool,
        left: Box<QueryBody>,
        right: Box<QueryBody>,
    },
    /// Top-level `VALUES (..), (..)`.
    Values(Vec<Vec<Expr>>),
    /// `TABLE name`
    Table {
        name: ObjectName,
        origin_schemas: Vec<TableSchema>,
    },
    /// Parenthesized query with its own ORDER BY/LIMIT.
    Nested(Box<Query>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct With {
    pub recursive: bool,
    pub ctes: Vec<Cte>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cte {
    pub name: String,
    /// Optional column list, `name(a, b) AS (...)`.
    pub columns: Vec<String>,
    pub query: Box<Query>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Distinct {
    Distinct,
    /// Postgres `DISTINCT ON (...)`.
    On(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Select {
    pub distinct: Option<Distinct>,
    pub projection: Vec<SelectItem>,
    pub from: Vec<FromItem>,
    pub selection: Option<Expr>,
    pub group_by: Vec<GroupByExpr>,
    pub having: Option<Expr>,
    pub windows: Vec<NamedWindow>,
    pub origin_schemas: Vec<TableSchema>,
}

impl OriginSchemas for Select {
    fn origin_schemas(&self) -> &[TableSchema] {
        &self.origin_schemas
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SelectItem {
    Expr { expr: Expr, alias: Option<String> },
    Wildcard,
    QualifiedWildcard(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamedWindow {
    pub name: String,
    pub spec: WindowSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupByExpr {
    Expr(Expr),
    GroupingSets(Vec<Vec<Expr>>),
    Rollup(Vec<Expr>),
    Cube(Vec<Expr>),
}

/// One comma-separated entry in FROM: a relation followed by its joins.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FromItem {
    pub relation: TableFactor,
    pub joins: Vec<Join>,
}

impl From<TableFactor> for FromItem {
    fn from(value: TableFactor) -> Self {
        FromItem {
            relation: value,
            joins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Join {
    pub relation: TableFactor,
    pub kind: JoinKind,
    pub constraint: JoinConstraint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inner => write!(f, "INNER"),
            Self::Left => write!(f, "LEFT"),
            Self::Right => write!(f, "RIGHT"),
            Self::Full => write!(f, "FULL"),
            Self::Cross => write!(f, "CROSS"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JoinConstraint {
    On(Expr),
    Using(Vec<String>),
    Natural,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableAlias {
    pub name: String,
    pub columns: Vec<String>,
}

impl TableAlias {
    pub fn new(name: impl Into<String>) -> Self {
        TableAlias {
            name: name.into(),
            columns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TableFactor {
    /// Base table or CTE reference.
    Table {
        name: ObjectName,
        alias: Option<TableAlias>,
    },
    Derived {
        lateral: bool,
        subquery: Box<Query>,
        alias: Option<TableAlias>,
    },
    Values {
        rows: Vec<Vec<Expr>>,
        alias: Option<TableAlias>,
    },
    /// Set-returning functions. More than one function is `ROWS FROM (...)`,
    /// zipped row by row.
    Function {
        lateral: bool,
        functions: Vec<FunctionCall>,
        with_ordinality: bool,
        alias: Option<TableAlias>,
    },
    /// Parenthesized join tree.
    NestedJoin(Box<FromItem>),
}

impl TableFactor {
    pub fn is_lateral(&self) -> bool {
        matches!(
            self,
            TableFactor::Derived { lateral: true, .. } | TableFactor::Function { lateral: true, .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueOrDefault {
    Expr(Expr),
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Assignment {
    pub target: ColumnRef,
    pub value: ValueOrDefault,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InsertSource {
    Values(Vec<Vec<ValueOrDefault>>),
    Query(Box<Query>),
    DefaultValues,
    /// MySQL `INSERT INTO t SET a = 1, b = 2`.
    Set(Vec<Assignment>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConflictAction {
    DoNothing,
    DoUpdate {
        assignments: Vec<Assignment>,
        selection: Option<Expr>,
    },
}

/// `ON CONFLICT (target) DO ...`, or MySQL `ON DUPLICATE KEY UPDATE` with an
/// empty target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OnConflict {
    pub target: Vec<String>,
    pub action: ConflictAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Insert {
    pub table: ObjectName,
    pub alias: Option<String>,
    /// Explicit column list. Empty means every column in schema order.
    pub columns: Vec<String>,
    pub source: InsertSource,
    pub on_conflict: Option<OnConflict>,
    pub returning: Vec<SelectItem>,
    pub origin_schemas: Vec<TableSchema>,
}

impl OriginSchemas for Insert {
    fn origin_schemas(&self) -> &[TableSchema] {
        &self.origin_schemas
    }
}

/// `UPDATE`. Postgres style puts extra relations in `from`, MySQL style
/// joins them onto `table`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Update {
    pub table: FromItem,
    pub assignments: Vec<Assignment>,
    pub from: Vec<FromItem>,
    pub selection: Option<Expr>,
    pub returning: Vec<SelectItem>,
    pub origin_schemas: Vec<TableSchema>,
}

impl OriginSchemas for Update {
    fn origin_schemas(&self) -> &[TableSchema] {
        &self.origin_schemas
    }
}

/// `DELETE`. Postgres style is `DELETE FROM t USING ...`, MySQL multi-table
/// style names the `targets` explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Delete {
    /// Aliases to delete from. Empty means the first relation in `from`.
    pub targets: Vec<String>,
    pub from: Vec<FromItem>,
    pub using: Vec<FromItem>,
    pub selection: Option<Expr>,
    pub returning: Vec<SelectItem>,
    pub origin_schemas: Vec<TableSchema>,
}

impl OriginSchemas for Delete {
    fn origin_schemas(&self) -> &[TableSchema] {
        &self.origin_schemas
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CreateTable {
    pub schema: TableSchema,
    pub if_not_exists: bool,
    pub temporary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DropTable {
    pub names: Vec<ObjectName>,
    pub if_exists: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CreateSchema {
    pub name: String,
    pub if_not_exists: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DropSchema {
    pub name: String,
    pub if_exists: bool,
    pub cascade: bool,
}
