//! Scalar and set-returning function registries.
//!
//! Aggregates and window functions live in their own modules since they are
//! evaluated over a window of rows rather than a single row.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::LazyLock;

use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::config::Dialect;
use crate::errors::{Result, evaluation};
use crate::value::ScalarValue;

/// Number of arguments a function accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Range(usize, usize),
    AtLeast(usize),
}

impl Arity {
    pub fn check(&self, name: &str, count: usize) -> Result<()> {
        let ok = match self {
            Arity::Exact(n) => count == *n,
            Arity::Range(min, max) => count >= *min && count <= *max,
            Arity::AtLeast(n) => count >= *n,
        };
        if ok {
            Ok(())
        } else {
            Err(evaluation!(
                "function {name}() does not accept {count} argument(s)"
            ))
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScalarFunctionSet {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    /// Only available under this dialect. `None` for both.
    pub dialect: Option<Dialect>,
    pub description: &'static str,
    pub arity: Arity,
    pub function: fn(&[ScalarValue], Dialect) -> Result<ScalarValue>,
}

impl ScalarFunctionSet {
    pub fn check_arity(&self, count: usize) -> Result<()> {
        self.arity.check(self.name, count)
    }
}

/// Lazy output of a set-returning function.
pub type ValueIter = Box<dyn Iterator<Item = ScalarValue> + Send>;

#[derive(Debug, Clone, Copy)]
pub struct TableFunctionSet {
    pub name: &'static str,
    pub description: &'static str,
    pub arity: Arity,
    pub function: fn(Vec<ScalarValue>) -> Result<ValueIter>,
}

impl TableFunctionSet {
    pub fn check_arity(&self, count: usize) -> Result<()> {
        self.arity.check(self.name, count)
    }
}

pub static BUILTIN_SCALAR_FUNCTION_SETS: &[ScalarFunctionSet] = &[
    FUNCTION_SET_LOWER,
    FUNCTION_SET_UPPER,
    FUNCTION_SET_LENGTH,
    FUNCTION_SET_CHAR_LENGTH,
    FUNCTION_SET_ABS,
    FUNCTION_SET_COALESCE,
    FUNCTION_SET_NULLIF,
    FUNCTION_SET_IFNULL,
    FUNCTION_SET_CONCAT,
    FUNCTION_SET_GREATEST,
    FUNCTION_SET_LEAST,
    FUNCTION_SET_TO_JSON,
    FUNCTION_SET_JSON_BUILD_OBJECT,
    FUNCTION_SET_JSON_BUILD_ARRAY,
    FUNCTION_SET_JSON_OBJECT,
    FUNCTION_SET_JSON_ARRAY,
];

pub static BUILTIN_TABLE_FUNCTION_SETS: &[TableFunctionSet] =
    &[FUNCTION_SET_GENERATE_SERIES, FUNCTION_SET_UNNEST];

static SCALAR_FUNCTIONS: LazyLock<HashMap<&'static str, &'static ScalarFunctionSet>> =
    LazyLock::new(|| {
        let mut map = HashMap::new();
        for set in BUILTIN_SCALAR_FUNCTION_SETS {
            for name in std::iter::once(&set.name).chain(set.aliases.iter()) {
                if map.insert(*name, set).is_some() {
                    panic!("Duplicate function name: {name}");
                }
            }
        }
        map
    });

/// Look up a scalar function available under `dialect`.
pub fn find_scalar_function(name: &str, dialect: Dialect) -> Option<&'static ScalarFunctionSet> {
    SCALAR_FUNCTIONS
        .get(name)
        .copied()
        .filter(|set| set.dialect.is_none_or(|d| d == dialect))
}

pub fn find_table_function(name: &str) -> Option<&'static TableFunctionSet> {
    BUILTIN_TABLE_FUNCTION_SETS.iter().find(|set| set.name == name)
}

pub const FUNCTION_SET_LOWER: ScalarFunctionSet = ScalarFunctionSet {
    name: "lower",
    aliases: &["lcase"],
    dialect: None,
    description: "Convert a string to lowercase.",
    arity: Arity::Exact(1),
    function: |args, _| Ok(map_text(&args[0], |s| s.to_lowercase())),
};

pub const FUNCTION_SET_UPPER: ScalarFunctionSet = ScalarFunctionSet {
    name: "upper",
    aliases: &["ucase"],
    dialect: None,
    description: "Convert a string to uppercase.",
    arity: Arity::Exact(1),
    function: |args, _| Ok(map_text(&args[0], |s| s.to_uppercase())),
};

pub const FUNCTION_SET_LENGTH: ScalarFunctionSet = ScalarFunctionSet {
    name: "length",
    aliases: &[],
    dialect: None,
    description: "Length of a string. Characters under Postgres, bytes under MySQL.",
    arity: Arity::Exact(1),
    function: |args, dialect| {
        Ok(match args[0].to_text() {
            None => ScalarValue::Null,
            Some(s) => match dialect {
                Dialect::Postgres => ScalarValue::Int64(s.chars().count() as i64),
                Dialect::MySql => ScalarValue::Int64(s.len() as i64),
            },
        })
    },
};

pub const FUNCTION_SET_CHAR_LENGTH: ScalarFunctionSet = ScalarFunctionSet {
    name: "char_length",
    aliases: &["character_length"],
    dialect: None,
    description: "Number of characters in a string.",
    arity: Arity::Exact(1),
    function: |args, _| {
        Ok(args[0]
            .to_text()
            .map(|s| ScalarValue::Int64(s.chars().count() as i64))
            .unwrap_or_default())
    },
};

pub const FUNCTION_SET_ABS: ScalarFunctionSet = ScalarFunctionSet {
    name: "abs",
    aliases: &[],
    dialect: None,
    description: "Absolute value of a number.",
    arity: Arity::Exact(1),
    function: |args, _| match &args[0] {
        ScalarValue::Null => Ok(ScalarValue::Null),
        ScalarValue::Int64(v) => v
            .checked_abs()
            .map(ScalarValue::Int64)
            .ok_or_else(|| evaluation!("integer out of range")),
        other => Ok(ScalarValue::Float64(other.try_as_f64()?.abs())),
    },
};

pub const FUNCTION_SET_COALESCE: ScalarFunctionSet = ScalarFunctionSet {
    name: "coalesce",
    aliases: &[],
    dialect: None,
    description: "First non-NULL argument.",
    arity: Arity::AtLeast(1),
    function: |args, _| Ok(first_non_null(args)),
};

pub const FUNCTION_SET_NULLIF: ScalarFunctionSet = ScalarFunctionSet {
    name: "nullif",
    aliases: &[],
    dialect: None,
    description: "NULL if both arguments are equal, otherwise the first argument.",
    arity: Arity::Exact(2),
    function: |args, _| {
        if args[0].sql_eq(&args[1]) {
            Ok(ScalarValue::Null)
        } else {
            Ok(args[0].clone())
        }
    },
};

pub const FUNCTION_SET_IFNULL: ScalarFunctionSet = ScalarFunctionSet {
    name: "ifnull",
    aliases: &[],
    dialect: Some(Dialect::MySql),
    description: "Second argument if the first is NULL.",
    arity: Arity::Exact(2),
    function: |args, _| Ok(first_non_null(args)),
};

pub const FUNCTION_SET_CONCAT: ScalarFunctionSet = ScalarFunctionSet {
    name: "concat",
    aliases: &[],
    dialect: None,
    description: "Concatenate arguments as text. NULLs are skipped under Postgres, and make the result NULL under MySQL.",
    arity: Arity::AtLeast(1),
    function: |args, dialect| {
        let mut out = String::new();
        for arg in args {
            match arg.to_text() {
                Some(s) => out.push_str(&s),
                None if dialect == Dialect::MySql => return Ok(ScalarValue::Null),
                None => (),
            }
        }
        Ok(ScalarValue::Utf8(out))
    },
};

pub const FUNCTION_SET_GREATEST: ScalarFunctionSet = ScalarFunctionSet {
    name: "greatest",
    aliases: &[],
    dialect: None,
    description: "Largest argument.",
    arity: Arity::AtLeast(1),
    function: |args, dialect| Ok(extreme(args, dialect, Ordering::Greater)),
};

pub const FUNCTION_SET_LEAST: ScalarFunctionSet = ScalarFunctionSet {
    name: "least",
    aliases: &[],
    dialect: None,
    description: "Smallest argument.",
    arity: Arity::AtLeast(1),
    function: |args, dialect| Ok(extreme(args, dialect, Ordering::Less)),
};

pub const FUNCTION_SET_TO_JSON: ScalarFunctionSet = ScalarFunctionSet {
    name: "to_json",
    aliases: &["to_jsonb"],
    dialect: Some(Dialect::Postgres),
    description: "Convert a value to JSON.",
    arity: Arity::Exact(1),
    function: |args, _| match &args[0] {
        ScalarValue::Null => Ok(ScalarValue::Null),
        other => Ok(ScalarValue::Json(other.to_json())),
    },
};

pub const FUNCTION_SET_JSON_BUILD_OBJECT: ScalarFunctionSet = ScalarFunctionSet {
    name: "json_build_object",
    aliases: &["jsonb_build_object"],
    dialect: Some(Dialect::Postgres),
    description: "Build a JSON object from alternating keys and values.",
    arity: Arity::AtLeast(0),
    function: |args, _| build_object(args),
};

pub const FUNCTION_SET_JSON_BUILD_ARRAY: ScalarFunctionSet = ScalarFunctionSet {
    name: "json_build_array",
    aliases: &["jsonb_build_array"],
    dialect: Some(Dialect::Postgres),
    description: "Build a JSON array from the arguments.",
    arity: Arity::AtLeast(0),
    function: |args, _| Ok(build_array(args)),
};

pub const FUNCTION_SET_JSON_OBJECT: ScalarFunctionSet = ScalarFunctionSet {
    name: "json_object",
    aliases: &[],
    dialect: Some(Dialect::MySql),
    description: "Build a JSON object from alternating keys and values.",
    arity: Arity::AtLeast(0),
    function: |args, _| build_object(args),
};

pub const FUNCTION_SET_JSON_ARRAY: ScalarFunctionSet = ScalarFunctionSet {
    name: "json_array",
    aliases: &[],
    dialect: Some(Dialect::MySql),
    description: "Build a JSON array from the arguments.",
    arity: Arity::AtLeast(0),
    function: |args, _| Ok(build_array(args)),
};

pub const FUNCTION_SET_GENERATE_SERIES: TableFunctionSet = TableFunctionSet {
    name: "generate_series",
    description: "Series of numbers from start to stop (inclusive) with an optional step.",
    arity: Arity::Range(2, 3),
    function: generate_series,
};

pub const FUNCTION_SET_UNNEST: TableFunctionSet = TableFunctionSet {
    name: "unnest",
    description: "One row per element of an array.",
    arity: Arity::Exact(1),
    function: unnest,
};

fn map_text(value: &ScalarValue, f: impl FnOnce(&str) -> String) -> ScalarValue {
    match value.to_text() {
        Some(s) => ScalarValue::Utf8(f(&s)),
        None => ScalarValue::Null,
    }
}

fn first_non_null(args: &[ScalarValue]) -> ScalarValue {
    args.iter()
        .find(|v| !v.is_null())
        .cloned()
        .unwrap_or_default()
}

/// GREATEST/LEAST. Postgres ignores NULLs, MySQL returns NULL if any
/// argument is NULL.
fn extreme(args: &[ScalarValue], dialect: Dialect, want: Ordering) -> ScalarValue {
    if dialect == Dialect::MySql && args.iter().any(|v| v.is_null()) {
        return ScalarValue::Null;
    }
    args.iter()
        .filter(|v| !v.is_null())
        .fold(None::<&ScalarValue>, |best, v| match best {
            Some(best) if best.total_cmp(v) != want.reverse() => Some(best),
            _ => Some(v),
        })
        .cloned()
        .unwrap_or_default()
}

fn build_object(args: &[ScalarValue]) -> Result<ScalarValue> {
    if args.len() % 2 != 0 {
        return Err(evaluation!(
            "argument list must have even number of elements"
        ));
    }
    let mut obj = JsonMap::new();
    for pair in args.chunks(2) {
        let key = pair[0]
            .to_text()
            .ok_or_else(|| evaluation!("JSON object keys cannot be NULL"))?;
        obj.insert(key, pair[1].to_json());
    }
    Ok(ScalarValue::Json(JsonValue::Object(obj)))
}

fn build_array(args: &[ScalarValue]) -> ScalarValue {
    ScalarValue::Json(JsonValue::Array(args.iter().map(|v| v.to_json()).collect()))
}

fn generate_series(args: Vec<ScalarValue>) -> Result<ValueIter> {
    if args.iter().any(|v| v.is_null()) {
        return Ok(Box::new(std::iter::empty()));
    }

    let all_ints = args.iter().all(|v| matches!(v, ScalarValue::Int64(_)));
    if all_ints {
        let start = args[0].try_as_i64()?;
        let stop = args[1].try_as_i64()?;
        let step = match args.get(2) {
            Some(step) => step.try_as_i64()?,
            None => 1,
        };
        if step == 0 {
            return Err(evaluation!("step size cannot equal zero"));
        }
        let iter = std::iter::successors(Some(start), move |v| v.checked_add(step))
            .take_while(move |v| if step > 0 { *v <= stop } else { *v >= stop })
            .map(ScalarValue::Int64);
        return Ok(Box::new(iter));
    }

    let start = args[0].try_as_f64()?;
    let stop = args[1].try_as_f64()?;
    let step = match args.get(2) {
        Some(step) => step.try_as_f64()?,
        None => 1.0,
    };
    if step == 0.0 || !step.is_finite() {
        return Err(evaluation!("step size cannot equal zero"));
    }
    let iter = (0u64..)
        .map(move |i| start + (i as f64) * step)
        .take_while(move |v| if step > 0.0 { *v <= stop } else { *v >= stop })
        .map(ScalarValue::Float64);
    Ok(Box::new(iter))
}

fn unnest(mut args: Vec<ScalarValue>) -> Result<ValueIter> {
    match args.swap_remove(0) {
        ScalarValue::Null => Ok(Box::new(std::iter::empty())),
        ScalarValue::List(values) => Ok(Box::new(values.into_iter())),
        ScalarValue::Json(JsonValue::Array(values)) => {
            Ok(Box::new(values.into_iter().map(ScalarValue::from_json)))
        }
        other => Err(evaluation!(
            "function unnest expects an array, got {}",
            other.kind()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[ScalarValue], dialect: Dialect) -> Result<ScalarValue> {
        let func = find_scalar_function(name, dialect)
            .ok_or_else(|| evaluation!("missing {name}"))?;
        func.check_arity(args.len())?;
        (func.function)(args, dialect)
    }

    #[test]
    fn dialect_gated_lookup() {
        assert!(find_scalar_function("ifnull", Dialect::MySql).is_some());
        assert!(find_scalar_function("ifnull", Dialect::Postgres).is_none());
        assert!(find_scalar_function("jsonb_build_object", Dialect::Postgres).is_some());
        assert!(find_scalar_function("json_object", Dialect::Postgres).is_none());
    }

    #[test]
    fn length_by_dialect() {
        let s = ScalarValue::from("héllo");
        assert_eq!(
            ScalarValue::Int64(5),
            call("length", &[s.clone()], Dialect::Postgres).unwrap()
        );
        assert_eq!(
            ScalarValue::Int64(6),
            call("length", &[s.clone()], Dialect::MySql).unwrap()
        );
        assert_eq!(
            ScalarValue::Int64(5),
            call("char_length", &[s], Dialect::MySql).unwrap()
        );
    }

    #[test]
    fn concat_nulls_by_dialect() {
        let args = [ScalarValue::from("a"), ScalarValue::Null, ScalarValue::Int64(1)];
        assert_eq!(
            ScalarValue::from("a1"),
            call("concat", &args, Dialect::Postgres).unwrap()
        );
        assert_eq!(
            ScalarValue::Null,
            call("concat", &args, Dialect::MySql).unwrap()
        );
    }

    #[test]
    fn greatest_and_least() {
        let args = [ScalarValue::Int64(3), ScalarValue::Null, ScalarValue::Float64(7.5)];
        assert_eq!(
            ScalarValue::Float64(7.5),
            call("greatest", &args, Dialect::Postgres).unwrap()
        );
        assert_eq!(
            ScalarValue::Int64(3),
            call("least", &args, Dialect::Postgres).unwrap()
        );
        assert_eq!(
            ScalarValue::Null,
            call("least", &args, Dialect::MySql).unwrap()
        );
    }

    #[test]
    fn nullif_and_coalesce() {
        assert_eq!(
            ScalarValue::Null,
            call("nullif", &[1.into(), 1.into()], Dialect::Postgres).unwrap()
        );
        assert_eq!(
            ScalarValue::Int64(2),
            call(
                "coalesce",
                &[ScalarValue::Null, 2.into(), 3.into()],
                Dialect::Postgres
            )
            .unwrap()
        );
    }

    #[test]
    fn json_builders() {
        let obj = call(
            "json_build_object",
            &["a".into(), 1.into(), "b".into(), ScalarValue::Null],
            Dialect::Postgres,
        )
        .unwrap();
        assert_eq!(ScalarValue::Json(serde_json::json!({"a": 1, "b": null})), obj);
        assert!(call("json_build_object", &["a".into()], Dialect::Postgres).is_err());
    }

    #[test]
    fn series() {
        let values: Vec<_> = generate_series(vec![1.into(), 7.into(), 3.into()])
            .unwrap()
            .collect();
        assert_eq!(
            vec![ScalarValue::Int64(1), ScalarValue::Int64(4), ScalarValue::Int64(7)],
            values
        );

        let values: Vec<_> = generate_series(vec![3.into(), 1.into(), (-1).into()])
            .unwrap()
            .collect();
        assert_eq!(3, values.len());

        assert_eq!(
            0,
            generate_series(vec![3.into(), 1.into()]).unwrap().count()
        );
        assert!(generate_series(vec![1.into(), 2.into(), 0.into()]).is_err());
    }

    #[test]
    fn unnest_values() {
        let values: Vec<_> = unnest(vec![ScalarValue::List(vec![1.into(), 2.into()])])
            .unwrap()
            .collect();
        assert_eq!(2, values.len());
        assert!(unnest(vec![ScalarValue::Int64(1)]).is_err());
    }
}
