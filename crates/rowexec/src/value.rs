use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;

use crate::errors::{Result, evaluation};

/// A single scalar value.
#[derive(Debug, Clone, Default)]
pub enum ScalarValue {
    /// SQL NULL.
    #[default]
    Null,

    /// True or false value.
    Boolean(bool),

    /// Signed 64bit int. All integer column types are widened to this.
    Int64(i64),

    /// 64bit float. Used for REAL, DOUBLE and NUMERIC columns.
    Float64(f64),

    /// Utf-8 encoded string.
    Utf8(String),

    /// A JSON document (objects, arrays, and JSON scalars).
    Json(JsonValue),

    /// A list of values (arrays, row constructors).
    List(Vec<ScalarValue>),
}

/// Coarse type classification, used for set-operation coercion and type
/// errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Boolean,
    Integer,
    Float,
    Text,
    Json,
    List,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Float => "double",
            Self::Text => "text",
            Self::Json => "json",
            Self::List => "array",
        };
        write!(f, "{s}")
    }
}

impl ScalarValue {
    pub const fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Boolean(_) => ValueKind::Boolean,
            Self::Int64(_) => ValueKind::Integer,
            Self::Float64(_) => ValueKind::Float,
            Self::Utf8(_) => ValueKind::Text,
            Self::Json(_) => ValueKind::Json,
            Self::List(_) => ValueKind::List,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int64(_) | Self::Float64(_))
    }

    /// Interpret the value as a boolean condition.
    ///
    /// NULL is false. This is the two-valued simplification used everywhere a
    /// predicate is checked (WHERE, HAVING, ON, CASE WHEN).
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Boolean(b) => *b,
            Self::Int64(v) => *v != 0,
            Self::Float64(v) => *v != 0.0,
            Self::Utf8(s) => match parse_bool(s) {
                Some(b) => b,
                None => s.trim().parse::<f64>().map(|v| v != 0.0).unwrap_or(false),
            },
            Self::Json(v) => !matches!(v, JsonValue::Null | JsonValue::Bool(false)),
            Self::List(v) => !v.is_empty(),
        }
    }

    pub fn try_as_i64(&self) -> Result<i64> {
        match self {
            Self::Int64(v) => Ok(*v),
            Self::Float64(v) if v.fract() == 0.0 => Ok(*v as i64),
            Self::Boolean(b) => Ok(*b as i64),
            Self::Utf8(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| evaluation!("invalid input syntax for type integer: \"{s}\"")),
            Self::Json(JsonValue::Number(n)) => n
                .as_i64()
                .ok_or_else(|| evaluation!("json number {n} is not an integer")),
            other => Err(evaluation!("expected integer, got {}", other.kind())),
        }
    }

    pub fn try_as_f64(&self) -> Result<f64> {
        match self {
            Self::Int64(v) => Ok(*v as f64),
            Self::Float64(v) => Ok(*v),
            Self::Boolean(b) => Ok(*b as i64 as f64),
            Self::Utf8(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| evaluation!("invalid input syntax for type double: \"{s}\"")),
            Self::Json(JsonValue::Number(n)) => n
                .as_f64()
                .ok_or_else(|| evaluation!("json number {n} is not representable")),
            other => Err(evaluation!("expected number, got {}", other.kind())),
        }
    }

    /// Returns the text representation used when a value is coerced to a
    /// string (CAST to TEXT, `||`, `->>`).
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Utf8(s) => Some(s.clone()),
            Self::Json(JsonValue::String(s)) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Convert to a JSON value. Text is kept as a JSON string.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Boolean(b) => JsonValue::Bool(*b),
            Self::Int64(v) => JsonValue::from(*v),
            Self::Float64(v) => serde_json::Number::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Self::Utf8(s) => JsonValue::String(s.clone()),
            Self::Json(v) => v.clone(),
            Self::List(vals) => JsonValue::Array(vals.iter().map(|v| v.to_json()).collect()),
        }
    }

    /// Interpret the value as a JSON document. Text is parsed.
    pub fn to_json_document(&self) -> Result<JsonValue> {
        match self {
            Self::Utf8(s) => Ok(serde_json::from_str(s)?),
            other => Ok(other.to_json()),
        }
    }

    /// Convert a JSON scalar into the closest SQL value. Objects and arrays
    /// stay JSON.
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Boolean(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(v) => Self::Int64(v),
                None => Self::Float64(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => Self::Utf8(s),
            other => Self::Json(other),
        }
    }

    /// SQL comparison.
    ///
    /// Returns `None` when either side is NULL or the values are not
    /// comparable. Integers and floats compare numerically, text compared
    /// with a number is parsed as a number when possible.
    pub fn sql_cmp(&self, other: &ScalarValue) -> Option<Ordering> {
        use ScalarValue::*;

        match (self, other) {
            (Null, _) | (_, Null) => None,
            (Int64(a), Int64(b)) => Some(a.cmp(b)),
            (Int64(_) | Float64(_), Int64(_) | Float64(_)) => {
                let a = self.try_as_f64().ok()?;
                let b = other.try_as_f64().ok()?;
                a.partial_cmp(&b)
            }
            (Boolean(a), Boolean(b)) => Some(a.cmp(b)),
            (Utf8(a), Utf8(b)) => Some(a.cmp(b)),
            (Utf8(s), Int64(_) | Float64(_)) => {
                let a = s.trim().parse::<f64>().ok()?;
                a.partial_cmp(&other.try_as_f64().ok()?)
            }
            (Int64(_) | Float64(_), Utf8(s)) => {
                let b = s.trim().parse::<f64>().ok()?;
                self.try_as_f64().ok()?.partial_cmp(&b)
            }
            (Boolean(a), Int64(b)) => Some((*a as i64).cmp(b)),
            (Int64(a), Boolean(b)) => Some(a.cmp(&(*b as i64))),
            (Json(a), Json(b)) => {
                if a == b {
                    Some(Ordering::Equal)
                } else {
                    Some(a.to_string().cmp(&b.to_string()))
                }
            }
            (Json(a), b) | (b, Json(a)) => {
                // Compare a JSON scalar against a SQL scalar by unwrapping.
                let unwrapped = ScalarValue::from_json(a.clone());
                if matches!(unwrapped, Json(_)) {
                    return None;
                }
                if std::ptr::eq(self, b) {
                    b.sql_cmp(&unwrapped)
                } else {
                    unwrapped.sql_cmp(b)
                }
            }
            (List(a), List(b)) => {
                for (a, b) in a.iter().zip(b.iter()) {
                    match a.sql_cmp(b)? {
                        Ordering::Equal => continue,
                        other => return Some(other),
                    }
                }
                Some(a.len().cmp(&b.len()))
            }
            _ => None,
        }
    }

    /// SQL equality, NULL never equals anything.
    pub fn sql_eq(&self, other: &ScalarValue) -> bool {
        matches!(self.sql_cmp(other), Some(Ordering::Equal))
    }

    /// Total ordering used for sorting. NULLs are ordered by the caller,
    /// values that are not comparable fall back to ordering by kind.
    pub fn total_cmp(&self, other: &ScalarValue) -> Ordering {
        match self.sql_cmp(other) {
            Some(ord) => ord,
            None => kind_rank(self.kind())
                .cmp(&kind_rank(other.kind()))
                .then_with(|| self.to_string().cmp(&other.to_string())),
        }
    }

    /// `IS NOT DISTINCT FROM` semantics: NULL equals NULL, everything else
    /// uses SQL equality.
    pub fn not_distinct(&self, other: &ScalarValue) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Null, _) | (_, Self::Null) => false,
            (a, b) => a.sql_eq(b),
        }
    }
}

fn kind_rank(kind: ValueKind) -> u8 {
    match kind {
        ValueKind::Null => 0,
        ValueKind::Boolean => 1,
        ValueKind::Integer | ValueKind::Float => 2,
        ValueKind::Text => 3,
        ValueKind::Json => 4,
        ValueKind::List => 5,
    }
}

pub(crate) fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "t" | "true" | "y" | "yes" | "on" | "1" => Some(true),
        "f" | "false" | "n" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Structural equality. Unlike `sql_eq`, NULL equals NULL and values of
/// different kinds are never equal. Used for grouping keys, partition keys,
/// and row hashing.
impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        use ScalarValue::*;
        match (self, other) {
            (Null, Null) => true,
            (Boolean(a), Boolean(b)) => a == b,
            (Int64(a), Int64(b)) => a == b,
            (Float64(a), Float64(b)) => a.to_bits() == b.to_bits(),
            (Utf8(a), Utf8(b)) => a == b,
            (Json(a), Json(b)) => a == b,
            (List(a), List(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ScalarValue {}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => (),
            Self::Boolean(v) => v.hash(state),
            Self::Int64(v) => v.hash(state),
            Self::Float64(v) => v.to_bits().hash(state),
            Self::Utf8(v) => v.hash(state),
            Self::Json(v) => v.to_string().hash(state),
            Self::List(v) => v.hash(state),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Utf8(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
            Self::List(vals) => {
                write!(f, "{{")?;
                for (idx, v) in vals.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl Serialize for ScalarValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Boolean(v) => serializer.serialize_bool(*v),
            Self::Int64(v) => serializer.serialize_i64(*v),
            Self::Float64(v) => serializer.serialize_f64(*v),
            Self::Utf8(v) => serializer.serialize_str(v),
            Self::Json(v) => v.serialize(serializer),
            Self::List(v) => v.serialize(serializer),
        }
    }
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        ScalarValue::Boolean(value)
    }
}

impl From<i32> for ScalarValue {
    fn from(value: i32) -> Self {
        ScalarValue::Int64(value as i64)
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        ScalarValue::Int64(value)
    }
}

impl From<f64> for ScalarValue {
    fn from(value: f64) -> Self {
        ScalarValue::Float64(value)
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::Utf8(value.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        ScalarValue::Utf8(value)
    }
}

impl From<JsonValue> for ScalarValue {
    fn from(value: JsonValue) -> Self {
        ScalarValue::Json(value)
    }
}

impl<T: Into<ScalarValue>> From<Option<T>> for ScalarValue {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => value.into(),
            None => ScalarValue::Null,
        }
    }
}
