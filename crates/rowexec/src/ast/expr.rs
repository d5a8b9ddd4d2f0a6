use std::fmt;

use super::schema::DataType;
use super::statement::Query;
use crate::value::ScalarValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    Not,
    Minus,
    Plus,
}

impl fmt::Display for UnaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Not => write!(f, "NOT "),
            Self::Minus => write!(f, "-"),
            Self::Plus => write!(f, "+"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    /// `||`
    StringConcat,
    And,
    Or,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Like,
    NotLike,
    Is,
    IsNot,
    IsDistinctFrom,
    IsNotDistinctFrom,
    /// `->`
    Arrow,
    /// `->>`
    LongArrow,
    /// `#>`
    HashArrow,
    /// `#>>`
    HashLongArrow,
    /// `@>`
    AtArrow,
    /// `<@`
    ArrowAt,
    /// `?`
    Question,
    /// `?|`
    QuestionPipe,
    /// `?&`
    QuestionAnd,
}

impl BinaryOperator {
    pub const fn is_comparison(&self) -> bool {
        matches!(
            self,
            Self::Eq | Self::NotEq | Self::Lt | Self::LtEq | Self::Gt | Self::GtEq
        )
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
            Self::StringConcat => "||",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
            Self::Is => "IS",
            Self::IsNot => "IS NOT",
            Self::IsDistinctFrom => "IS DISTINCT FROM",
            Self::IsNotDistinctFrom => "IS NOT DISTINCT FROM",
            Self::Arrow => "->",
            Self::LongArrow => "->>",
            Self::HashArrow => "#>",
            Self::HashLongArrow => "#>>",
            Self::AtArrow => "@>",
            Self::ArrowAt => "<@",
            Self::Question => "?",
            Self::QuestionPipe => "?|",
            Self::QuestionAnd => "?&",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantifier {
    Any,
    All,
}

/// Reference to a column, optionally qualified by a relation alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub relation: Option<String>,
    pub name: String,
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.relation {
            Some(rel) => write!(f, "{rel}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WhenThen {
    pub when: Expr,
    pub then: Expr,
}

/// A function call. Names are expected to be lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionCall {
    pub name: String,
    pub args: Vec<Expr>,
    /// `COUNT(DISTINCT x)`
    pub distinct: bool,
    /// `FILTER (WHERE ...)`
    pub filter: Option<Box<Expr>>,
    /// In-aggregate ordering, `STRING_AGG(x, ',' ORDER BY y)`.
    pub order_by: Vec<OrderByExpr>,
    pub over: Option<WindowSpec>,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, args: Vec<Expr>) -> Self {
        FunctionCall {
            name: name.into().to_ascii_lowercase(),
            args,
            distinct: false,
            filter: None,
            order_by: Vec::new(),
            over: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderByExpr {
    pub expr: Expr,
    /// `None` means ascending.
    pub asc: Option<bool>,
    /// `None` means the dialect default.
    pub nulls_first: Option<bool>,
}

impl OrderByExpr {
    pub fn is_asc(&self) -> bool {
        self.asc.unwrap_or(true)
    }
}

impl fmt::Display for OrderByExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        if !self.is_asc() {
            write!(f, " DESC")?;
        }
        match self.nulls_first {
            Some(true) => write!(f, " NULLS FIRST"),
            Some(false) => write!(f, " NULLS LAST"),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct WindowSpec {
    /// Name of a window defined in the SELECT's WINDOW clause this spec
    /// builds on.
    pub base: Option<String>,
    pub partition_by: Vec<Expr>,
    pub order_by: Vec<OrderByExpr>,
    pub frame: Option<WindowFrame>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameUnits {
    Rows,
    Range,
    Groups,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameBound {
    UnboundedPreceding,
    Preceding(Box<Expr>),
    CurrentRow,
    Following(Box<Expr>),
    UnboundedFollowing,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowFrame {
    pub units: FrameUnits,
    pub start: FrameBound,
    pub end: FrameBound,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Literal(ScalarValue),
    Column(ColumnRef),
    /// Positional parameter, 1-based (`$1`, or the n-th `?`).
    Parameter(usize),
    /// `*`, only valid as the argument of `COUNT(*)`.
    Wildcard,
    Unary {
        op: UnaryOperator,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `left op ANY(right)` / `left op ALL(right)`
    Quantified {
        op: BinaryOperator,
        quantifier: Quantifier,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    InSubquery {
        expr: Box<Expr>,
        subquery: Box<Query>,
        negated: bool,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    Case {
        /// Subject of a simple CASE. `None` for a searched CASE.
        operand: Option<Box<Expr>>,
        branches: Vec<WhenThen>,
        else_result: Option<Box<Expr>>,
    },
    Cast {
        expr: Box<Expr>,
        datatype: DataType,
    },
    Exists {
        subquery: Box<Query>,
        negated: bool,
    },
    Subquery(Box<Query>),
    /// Row constructor, `(a, b)`.
    Row(Vec<Expr>),
    /// Array literal, `ARRAY[a, b]`.
    Array(Vec<Expr>),
    Function(FunctionCall),
}

impl Expr {
    /// Walk this expression tree, calling `f` on every node. Subqueries are
    /// not descended into.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        match self {
            Expr::Literal(_)
            | Expr::Column(_)
            | Expr::Parameter(_)
            | Expr::Wildcard
            | Expr::Exists { .. }
            | Expr::Subquery(_) => (),
            Expr::Unary { expr, .. } | Expr::Cast { expr, .. } => expr.walk(f),
            Expr::Binary { left, right, .. } | Expr::Quantified { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            Expr::InList { expr, list, .. } => {
                expr.walk(f);
                list.iter().for_each(|e| e.walk(f));
            }
            Expr::InSubquery { expr, .. } => expr.walk(f),
            Expr::Between {
                expr, low, high, ..
            } => {
                expr.walk(f);
                low.walk(f);
                high.walk(f);
            }
            Expr::Case {
                operand,
                branches,
                else_result,
            } => {
                if let Some(operand) = operand {
                    operand.walk(f);
                }
                for branch in branches {
                    branch.when.walk(f);
                    branch.then.walk(f);
                }
                if let Some(else_result) = else_result {
                    else_result.walk(f);
                }
            }
            Expr::Row(exprs) | Expr::Array(exprs) => exprs.iter().for_each(|e| e.walk(f)),
            Expr::Function(call) => {
                call.args.iter().for_each(|e| e.walk(f));
                if let Some(filter) = &call.filter {
                    filter.walk(f);
                }
                call.order_by.iter().for_each(|o| o.expr.walk(f));
                if let Some(over) = &call.over {
                    over.partition_by.iter().for_each(|e| e.walk(f));
                    over.order_by.iter().for_each(|o| o.expr.walk(f));
                }
            }
        }
    }

    pub fn as_column(&self) -> Option<&ColumnRef> {
        match self {
            Expr::Column(col) => Some(col),
            _ => None,
        }
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(ScalarValue::Utf8(s)) => write!(f, "'{}'", s.replace('\'', "''")),
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::Column(col) => write!(f, "{col}"),
            Expr::Parameter(idx) => write!(f, "${idx}"),
            Expr::Wildcard => write!(f, "*"),
            Expr::Unary { op, expr } => write!(f, "{op}{expr}"),
            Expr::Binary { op, left, right } => write!(f, "{left} {op} {right}"),
            Expr::Quantified {
                op,
                quantifier,
                left,
                right,
            } => {
                let q = match quantifier {
                    Quantifier::Any => "ANY",
                    Quantifier::All => "ALL",
                };
                write!(f, "{left} {op} {q}({right})")
            }
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                write!(f, "{expr} {}IN (", if *negated { "NOT " } else { "" })?;
                write_list(f, list)?;
                write!(f, ")")
            }
            Expr::InSubquery { expr, negated, .. } => {
                write!(f, "{expr} {}IN (<subquery>)", if *negated { "NOT " } else { "" })
            }
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => write!(
                f,
                "{expr} {}BETWEEN {low} AND {high}",
                if *negated { "NOT " } else { "" }
            ),
            Expr::Case {
                operand,
                branches,
                else_result,
            } => {
                write!(f, "CASE")?;
                if let Some(operand) = operand {
                    write!(f, " {operand}")?;
                }
                for branch in branches {
                    write!(f, " WHEN {} THEN {}", branch.when, branch.then)?;
                }
                if let Some(else_result) = else_result {
                    write!(f, " ELSE {else_result}")?;
                }
                write!(f, " END")
            }
            Expr::Cast { expr, datatype } => write!(f, "CAST({expr} AS {datatype})"),
            Expr::Exists { negated, .. } => {
                write!(f, "{}EXISTS(<subquery>)", if *negated { "NOT " } else { "" })
            }
            Expr::Subquery(_) => write!(f, "(<subquery>)"),
            Expr::Row(exprs) => {
                write!(f, "(")?;
                write_list(f, exprs)?;
                write!(f, ")")
            }
            Expr::Array(exprs) => {
                write!(f, "ARRAY[")?;
                write_list(f, exprs)?;
                write!(f, "]")
            }
            Expr::Function(call) => {
                write!(f, "{}(", call.name.to_ascii_uppercase())?;
                if call.distinct {
                    write!(f, "DISTINCT ")?;
                }
                write_list(f, &call.args)?;
                if !call.order_by.is_empty() {
                    write!(f, " ORDER BY ")?;
                    write_list(f, &call.order_by)?;
                }
                write!(f, ")")?;
                if let Some(filter) = &call.filter {
                    write!(f, " FILTER (WHERE {filter})")?;
                }
                if call.over.is_some() {
                    write!(f, " OVER (...)")?;
                }
                Ok(())
            }
        }
    }
}
