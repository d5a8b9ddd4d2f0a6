//! Shorthand constructors for building statement trees by hand.

use super::expr::{
    BinaryOperator, ColumnRef, Expr, FunctionCall, OrderByExpr, Quantifier, UnaryOperator,
    WindowSpec,
};
use super::schema::{DataType, ObjectName};
use super::statement::{
    FromItem, Join, JoinConstraint, JoinKind, Query, Select, SelectItem, TableAlias, TableFactor,
};
use crate::value::ScalarValue;

pub fn lit(value: impl Into<ScalarValue>) -> Expr {
    Expr::Literal(value.into())
}

pub fn null() -> Expr {
    Expr::Literal(ScalarValue::Null)
}

pub fn col(name: &str) -> Expr {
    match name.split_once('.') {
        Some((rel, name)) => qcol(rel, name),
        None => Expr::Column(ColumnRef {
            relation: None,
            name: name.to_string(),
        }),
    }
}

pub fn qcol(relation: &str, name: &str) -> Expr {
    Expr::Column(ColumnRef {
        relation: Some(relation.to_string()),
        name: name.to_string(),
    })
}

pub fn param(idx: usize) -> Expr {
    Expr::Parameter(idx)
}

pub fn binary(op: BinaryOperator, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

pub fn eq(left: Expr, right: Expr) -> Expr {
    binary(BinaryOperator::Eq, left, right)
}

pub fn gt(left: Expr, right: Expr) -> Expr {
    binary(BinaryOperator::Gt, left, right)
}

pub fn lt(left: Expr, right: Expr) -> Expr {
    binary(BinaryOperator::Lt, left, right)
}

pub fn and(left: Expr, right: Expr) -> Expr {
    binary(BinaryOperator::And, left, right)
}

pub fn or(left: Expr, right: Expr) -> Expr {
    binary(BinaryOperator::Or, left, right)
}

pub fn add(left: Expr, right: Expr) -> Expr {
    binary(BinaryOperator::Plus, left, right)
}

pub fn not(expr: Expr) -> Expr {
    Expr::Unary {
        op: UnaryOperator::Not,
        expr: Box::new(expr),
    }
}

pub fn is_null(expr: Expr) -> Expr {
    binary(BinaryOperator::Is, expr, null())
}

pub fn cast(expr: Expr, datatype: DataType) -> Expr {
    Expr::Cast {
        expr: Box::new(expr),
        datatype,
    }
}

pub fn quantified(op: BinaryOperator, quantifier: Quantifier, left: Expr, right: Expr) -> Expr {
    Expr::Quantified {
        op,
        quantifier,
        left: Box::new(left),
        right: Box::new(right),
    }
}

pub fn subquery(query: impl Into<Query>) -> Expr {
    Expr::Subquery(Box::new(query.into()))
}

pub fn exists(query: impl Into<Query>) -> Expr {
    Expr::Exists {
        subquery: Box::new(query.into()),
        negated: false,
    }
}

pub fn func(name: &str, args: Vec<Expr>) -> Expr {
    Expr::Function(FunctionCall::new(name, args))
}

pub fn count_star() -> Expr {
    func("count", vec![Expr::Wildcard])
}

/// Attach an OVER clause to a function call expression.
pub fn over(expr: Expr, spec: WindowSpec) -> Expr {
    match expr {
        Expr::Function(mut call) => {
            call.over = Some(spec);
            Expr::Function(call)
        }
        other => other,
    }
}

pub fn window(partition_by: Vec<Expr>, order_by: Vec<OrderByExpr>) -> WindowSpec {
    WindowSpec {
        base: None,
        partition_by,
        order_by,
        frame: None,
    }
}

pub fn asc(expr: Expr) -> OrderByExpr {
    OrderByExpr {
        expr,
        asc: Some(true),
        nulls_first: None,
    }
}

pub fn desc(expr: Expr) -> OrderByExpr {
    OrderByExpr {
        expr,
        asc: Some(false),
        nulls_first: None,
    }
}

pub fn item(expr: Expr) -> SelectItem {
    SelectItem::Expr { expr, alias: None }
}

pub fn item_as(expr: Expr, alias: &str) -> SelectItem {
    SelectItem::Expr {
        expr,
        alias: Some(alias.to_string()),
    }
}

pub fn table(name: &str) -> TableFactor {
    TableFactor::Table {
        name: ObjectName::from(name),
        alias: None,
    }
}

pub fn table_as(name: &str, alias: &str) -> TableFactor {
    TableFactor::Table {
        name: ObjectName::from(name),
        alias: Some(TableAlias::new(alias)),
    }
}

pub fn join(relation: TableFactor, kind: JoinKind, constraint: JoinConstraint) -> Join {
    Join {
        relation,
        kind,
        constraint,
    }
}

pub fn from(relation: TableFactor) -> FromItem {
    FromItem::from(relation)
}

/// A SELECT with the given projection over the given FROM items.
pub fn select(projection: Vec<SelectItem>, from: Vec<FromItem>) -> Select {
    Select {
        projection,
        from,
        ..Default::default()
    }
}
