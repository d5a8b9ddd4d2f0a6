use serde_json::Value as JsonValue;

use crate::ast::DataType;
use crate::errors::{Result, evaluation};
use crate::value::{ScalarValue, parse_bool};

/// Cast a value to a declared type.
///
/// NULL casts to NULL. Types without a coercion (`DataType::Other`) pass
/// the value through unchanged.
pub fn cast(value: ScalarValue, datatype: &DataType) -> Result<ScalarValue> {
    if value.is_null() {
        return Ok(ScalarValue::Null);
    }

    match datatype {
        DataType::Int => cast_to_int(value),
        DataType::Float => Ok(ScalarValue::Float64(value.try_as_f64()?)),
        DataType::Text => Ok(value.to_text().map(ScalarValue::Utf8).unwrap_or_default()),
        DataType::Boolean => cast_to_bool(value),
        DataType::Json => Ok(ScalarValue::Json(value.to_json_document()?)),
        DataType::Other(_) => Ok(value),
    }
}

fn cast_to_int(value: ScalarValue) -> Result<ScalarValue> {
    match value {
        ScalarValue::Int64(v) => Ok(ScalarValue::Int64(v)),
        ScalarValue::Float64(v) => float_to_int(v),
        ScalarValue::Boolean(b) => Ok(ScalarValue::Int64(b as i64)),
        ScalarValue::Utf8(s) => {
            let trimmed = s.trim();
            match trimmed.parse::<i64>() {
                Ok(v) => Ok(ScalarValue::Int64(v)),
                Err(_) => Err(evaluation!("invalid input syntax for type integer: \"{s}\"")),
            }
        }
        ScalarValue::Json(JsonValue::Number(n)) => match n.as_i64() {
            Some(v) => Ok(ScalarValue::Int64(v)),
            None => float_to_int(n.as_f64().unwrap_or(f64::NAN)),
        },
        ScalarValue::Json(JsonValue::String(s)) => cast_to_int(ScalarValue::Utf8(s)),
        other => Err(evaluation!("cannot cast {} to integer", other.kind())),
    }
}

fn float_to_int(v: f64) -> Result<ScalarValue> {
    let rounded = v.round();
    if rounded.is_finite() && rounded >= i64::MIN as f64 && rounded <= i64::MAX as f64 {
        Ok(ScalarValue::Int64(rounded as i64))
    } else {
        Err(evaluation!("integer out of range: {v}"))
    }
}

fn cast_to_bool(value: ScalarValue) -> Result<ScalarValue> {
    match value {
        ScalarValue::Boolean(b) => Ok(ScalarValue::Boolean(b)),
        ScalarValue::Int64(v) => Ok(ScalarValue::Boolean(v != 0)),
        ScalarValue::Float64(v) => Ok(ScalarValue::Boolean(v != 0.0)),
        ScalarValue::Utf8(s) => parse_bool(&s)
            .map(ScalarValue::Boolean)
            .ok_or_else(|| evaluation!("invalid input syntax for type boolean: \"{s}\"")),
        ScalarValue::Json(JsonValue::Bool(b)) => Ok(ScalarValue::Boolean(b)),
        other => Err(evaluation!("cannot cast {} to boolean", other.kind())),
    }
}
