use std::cmp::Ordering;

use serde_json::Value as JsonValue;

use super::json;
use crate::ast::{BinaryOperator, UnaryOperator};
use crate::config::Dialect;
use crate::context::QueryContext;
use crate::errors::{Result, evaluation};
use crate::value::ScalarValue;

/// Numeric operand after coercion.
#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(v) => v as f64,
            Num::Float(v) => v,
        }
    }
}

fn to_num(value: &ScalarValue, op: BinaryOperator) -> Result<Num> {
    match value {
        ScalarValue::Int64(v) => Ok(Num::Int(*v)),
        ScalarValue::Float64(v) => Ok(Num::Float(*v)),
        ScalarValue::Boolean(b) => Ok(Num::Int(*b as i64)),
        ScalarValue::Utf8(s) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(v) => Ok(Num::Int(v)),
                Err(_) => s.parse::<f64>().map(Num::Float).map_err(|_| {
                    evaluation!("invalid input syntax for numeric operand of '{op}': \"{s}\"")
                }),
            }
        }
        ScalarValue::Json(JsonValue::Number(n)) => match n.as_i64() {
            Some(v) => Ok(Num::Int(v)),
            None => Ok(Num::Float(n.as_f64().unwrap_or(f64::NAN))),
        },
        other => Err(evaluation!(
            "operator '{op}' is not defined for {}",
            other.kind()
        )),
    }
}

fn from_f64(v: f64) -> Result<ScalarValue> {
    if v.is_finite() {
        Ok(ScalarValue::Float64(v))
    } else {
        Err(evaluation!("value out of range: {v}"))
    }
}

fn overflow() -> crate::errors::ExecError {
    evaluation!("integer out of range")
}

/// Evaluate a unary operator.
pub fn unary(op: UnaryOperator, value: ScalarValue) -> Result<ScalarValue> {
    match op {
        UnaryOperator::Not => match value {
            ScalarValue::Null => Ok(ScalarValue::Null),
            other => Ok(ScalarValue::Boolean(!other.is_truthy())),
        },
        UnaryOperator::Plus => match value {
            ScalarValue::Null => Ok(ScalarValue::Null),
            other => match to_num(&other, BinaryOperator::Plus)? {
                Num::Int(v) => Ok(ScalarValue::Int64(v)),
                Num::Float(v) => Ok(ScalarValue::Float64(v)),
            },
        },
        UnaryOperator::Minus => match value {
            ScalarValue::Null => Ok(ScalarValue::Null),
            other => match to_num(&other, BinaryOperator::Minus)? {
                Num::Int(v) => v.checked_neg().map(ScalarValue::Int64).ok_or_else(overflow),
                Num::Float(v) => Ok(ScalarValue::Float64(-v)),
            },
        },
    }
}

/// Evaluate a binary operator on already evaluated operands.
///
/// `AND`/`OR` are short-circuited by the evaluator before getting here, but
/// are handled for completeness.
pub fn binary(
    op: BinaryOperator,
    left: &ScalarValue,
    right: &ScalarValue,
    ctx: &QueryContext,
) -> Result<ScalarValue> {
    use BinaryOperator::*;

    match op {
        Plus | Minus | Multiply | Divide | Modulo => arithmetic(op, left, right, ctx.dialect),
        StringConcat => concat(left, right),
        And => Ok(ScalarValue::Boolean(left.is_truthy() && right.is_truthy())),
        Or => Ok(ScalarValue::Boolean(left.is_truthy() || right.is_truthy())),
        Eq | NotEq | Lt | LtEq | Gt | GtEq => Ok(ScalarValue::Boolean(compare(op, left, right))),
        Like | NotLike => {
            let (Some(value), Some(pattern)) = (left.to_text(), right.to_text()) else {
                return Ok(ScalarValue::Boolean(false));
            };
            let matched = ctx.like_regex(&pattern)?.is_match(&value);
            Ok(ScalarValue::Boolean(matched == (op == Like)))
        }
        Is | IsNot => {
            let matched = match right {
                ScalarValue::Null => left.is_null(),
                ScalarValue::Boolean(b) => !left.is_null() && left.is_truthy() == *b,
                other => left.not_distinct(other),
            };
            Ok(ScalarValue::Boolean(matched == (op == Is)))
        }
        IsDistinctFrom => Ok(ScalarValue::Boolean(!left.not_distinct(right))),
        IsNotDistinctFrom => Ok(ScalarValue::Boolean(left.not_distinct(right))),
        Arrow | LongArrow | HashArrow | HashLongArrow | AtArrow | ArrowAt | Question
        | QuestionPipe | QuestionAnd => json::json_binary(op, left, right),
    }
}

/// Two-valued comparison. Anything compared with NULL, or values that
/// can't be compared, is false.
pub fn compare(op: BinaryOperator, left: &ScalarValue, right: &ScalarValue) -> bool {
    let Some(ord) = left.sql_cmp(right) else {
        return false;
    };
    match op {
        BinaryOperator::Eq => ord == Ordering::Equal,
        BinaryOperator::NotEq => ord != Ordering::Equal,
        BinaryOperator::Lt => ord == Ordering::Less,
        BinaryOperator::LtEq => ord != Ordering::Greater,
        BinaryOperator::Gt => ord == Ordering::Greater,
        BinaryOperator::GtEq => ord != Ordering::Less,
        _ => false,
    }
}

fn arithmetic(
    op: BinaryOperator,
    left: &ScalarValue,
    right: &ScalarValue,
    dialect: Dialect,
) -> Result<ScalarValue> {
    if left.is_null() || right.is_null() {
        return Ok(ScalarValue::Null);
    }
    let l = to_num(left, op)?;
    let r = to_num(right, op)?;

    match (op, l, r) {
        (BinaryOperator::Plus, Num::Int(a), Num::Int(b)) => {
            a.checked_add(b).map(ScalarValue::Int64).ok_or_else(overflow)
        }
        (BinaryOperator::Minus, Num::Int(a), Num::Int(b)) => {
            a.checked_sub(b).map(ScalarValue::Int64).ok_or_else(overflow)
        }
        (BinaryOperator::Multiply, Num::Int(a), Num::Int(b)) => {
            a.checked_mul(b).map(ScalarValue::Int64).ok_or_else(overflow)
        }
        (BinaryOperator::Plus, a, b) => from_f64(a.as_f64() + b.as_f64()),
        (BinaryOperator::Minus, a, b) => from_f64(a.as_f64() - b.as_f64()),
        (BinaryOperator::Multiply, a, b) => from_f64(a.as_f64() * b.as_f64()),
        (BinaryOperator::Divide | BinaryOperator::Modulo, _, r) if r.as_f64() == 0.0 => {
            match dialect {
                Dialect::Postgres => Err(evaluation!("division by zero")),
                Dialect::MySql => Ok(ScalarValue::Null),
            }
        }
        (BinaryOperator::Divide, Num::Int(a), Num::Int(b)) => match dialect {
            Dialect::Postgres => a.checked_div(b).map(ScalarValue::Int64).ok_or_else(overflow),
            Dialect::MySql => from_f64(a as f64 / b as f64),
        },
        (BinaryOperator::Divide, a, b) => from_f64(a.as_f64() / b.as_f64()),
        (BinaryOperator::Modulo, Num::Int(a), Num::Int(b)) => {
            a.checked_rem(b).map(ScalarValue::Int64).ok_or_else(overflow)
        }
        (BinaryOperator::Modulo, a, b) => from_f64(a.as_f64() % b.as_f64()),
        (op, _, _) => Err(evaluation!("'{op}' is not an arithmetic operator")),
    }
}

/// `||`. NULL operands are treated as empty, two NULLs give NULL. Lists and
/// JSON containers concatenate/merge instead of stringifying.
fn concat(left: &ScalarValue, right: &ScalarValue) -> Result<ScalarValue> {
    match (left, right) {
        (ScalarValue::Null, ScalarValue::Null) => Ok(ScalarValue::Null),
        (ScalarValue::List(a), ScalarValue::List(b)) => {
            Ok(ScalarValue::List(a.iter().chain(b.iter()).cloned().collect()))
        }
        (ScalarValue::List(a), ScalarValue::Null) | (ScalarValue::Null, ScalarValue::List(a)) => {
            Ok(ScalarValue::List(a.clone()))
        }
        (ScalarValue::List(a), b) => {
            let mut out = a.clone();
            out.push(b.clone());
            Ok(ScalarValue::List(out))
        }
        (ScalarValue::Json(a), ScalarValue::Json(b)) => Ok(ScalarValue::Json(json::concat(a, b))),
        (a, b) => {
            let mut s = a.to_text().unwrap_or_default();
            s.push_str(&b.to_text().unwrap_or_default());
            Ok(ScalarValue::Utf8(s))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pg() -> QueryContext {
        QueryContext::with_dialect(Dialect::Postgres)
    }

    fn mysql() -> QueryContext {
        QueryContext::with_dialect(Dialect::MySql)
    }

    #[test]
    fn integer_division_by_dialect() {
        let seven = ScalarValue::Int64(7);
        let two = ScalarValue::Int64(2);
        assert_eq!(
            ScalarValue::Int64(3),
            binary(BinaryOperator::Divide, &seven, &two, &pg()).unwrap()
        );
        assert_eq!(
            ScalarValue::Float64(3.5),
            binary(BinaryOperator::Divide, &seven, &two, &mysql()).unwrap()
        );
    }

    #[test]
    fn division_by_zero_by_dialect() {
        let one = ScalarValue::Int64(1);
        let zero = ScalarValue::Int64(0);
        assert!(binary(BinaryOperator::Divide, &one, &zero, &pg()).is_err());
        assert_eq!(
            ScalarValue::Null,
            binary(BinaryOperator::Modulo, &one, &zero, &mysql()).unwrap()
        );
    }

    #[test]
    fn overflow_is_an_error() {
        let max = ScalarValue::Int64(i64::MAX);
        assert!(binary(BinaryOperator::Plus, &max, &ScalarValue::Int64(1), &pg()).is_err());
        assert!(unary(UnaryOperator::Minus, ScalarValue::Int64(i64::MIN)).is_err());
    }

    #[test]
    fn null_safe_concat() {
        let ctx = pg();
        assert_eq!(
            ScalarValue::from("a"),
            binary(
                BinaryOperator::StringConcat,
                &ScalarValue::from("a"),
                &ScalarValue::Null,
                &ctx
            )
            .unwrap()
        );
        assert_eq!(
            ScalarValue::from("a1"),
            binary(
                BinaryOperator::StringConcat,
                &ScalarValue::from("a"),
                &ScalarValue::Int64(1),
                &ctx
            )
            .unwrap()
        );
    }

    #[test]
    fn like_and_is() {
        let ctx = pg();
        assert_eq!(
            ScalarValue::Boolean(true),
            binary(
                BinaryOperator::Like,
                &ScalarValue::from("Hello"),
                &ScalarValue::from("h%"),
                &ctx
            )
            .unwrap()
        );
        assert_eq!(
            ScalarValue::Boolean(false),
            binary(
                BinaryOperator::NotLike,
                &ScalarValue::Null,
                &ScalarValue::from("h%"),
                &ctx
            )
            .unwrap()
        );
        assert_eq!(
            ScalarValue::Boolean(true),
            binary(
                BinaryOperator::IsNot,
                &ScalarValue::Int64(1),
                &ScalarValue::Null,
                &ctx
            )
            .unwrap()
        );
        assert_eq!(
            ScalarValue::Boolean(false),
            binary(
                BinaryOperator::Is,
                &ScalarValue::Null,
                &ScalarValue::Boolean(false),
                &ctx
            )
            .unwrap()
        );
    }

    #[test]
    fn comparisons_with_null_are_false() {
        for op in [
            BinaryOperator::Eq,
            BinaryOperator::NotEq,
            BinaryOperator::Lt,
            BinaryOperator::GtEq,
        ] {
            assert!(!compare(op, &ScalarValue::Null, &ScalarValue::Int64(1)));
        }
    }
}
