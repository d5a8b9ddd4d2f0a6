//! Postgres JSON operators over plain JSON values.

use serde_json::Value as JsonValue;

use crate::ast::BinaryOperator;
use crate::errors::{Result, evaluation};
use crate::value::ScalarValue;

pub fn json_binary(
    op: BinaryOperator,
    left: &ScalarValue,
    right: &ScalarValue,
) -> Result<ScalarValue> {
    if left.is_null() || right.is_null() {
        return Ok(ScalarValue::Null);
    }
    let doc = left.to_json_document()?;

    match op {
        BinaryOperator::Arrow => Ok(field(&doc, right)?
            .map(|v| ScalarValue::Json(v.clone()))
            .unwrap_or_default()),
        BinaryOperator::LongArrow => Ok(field(&doc, right)?.map(as_text).unwrap_or_default()),
        BinaryOperator::HashArrow => Ok(path(&doc, &path_elements(right)?)
            .map(|v| ScalarValue::Json(v.clone()))
            .unwrap_or_default()),
        BinaryOperator::HashLongArrow => {
            Ok(path(&doc, &path_elements(right)?).map(as_text).unwrap_or_default())
        }
        BinaryOperator::AtArrow => {
            let other = right.to_json_document()?;
            Ok(ScalarValue::Boolean(contains(&doc, &other)))
        }
        BinaryOperator::ArrowAt => {
            let other = right.to_json_document()?;
            Ok(ScalarValue::Boolean(contains(&other, &doc)))
        }
        BinaryOperator::Question => {
            let key = right
                .to_text()
                .ok_or_else(|| evaluation!("key for '?' cannot be NULL"))?;
            Ok(ScalarValue::Boolean(has_key(&doc, &key)))
        }
        BinaryOperator::QuestionPipe => {
            let keys = path_elements(right)?;
            Ok(ScalarValue::Boolean(keys.iter().any(|k| has_key(&doc, k))))
        }
        BinaryOperator::QuestionAnd => {
            let keys = path_elements(right)?;
            Ok(ScalarValue::Boolean(keys.iter().all(|k| has_key(&doc, k))))
        }
        other => Err(evaluation!("'{other}' is not a JSON operator")),
    }
}

/// `->` lookup: integer keys index arrays (negative from the end), text
/// keys look up object fields.
fn field<'a>(doc: &'a JsonValue, key: &ScalarValue) -> Result<Option<&'a JsonValue>> {
    let key = match key {
        ScalarValue::Json(v) => ScalarValue::from_json(v.clone()),
        other => other.clone(),
    };
    match key {
        ScalarValue::Int64(idx) => Ok(array_index(doc, idx)),
        ScalarValue::Utf8(name) => Ok(doc.as_object().and_then(|obj| obj.get(&name))),
        other => Err(evaluation!(
            "operator -> expects an integer or text key, got {}",
            other.kind()
        )),
    }
}

fn array_index(doc: &JsonValue, idx: i64) -> Option<&JsonValue> {
    let arr = doc.as_array()?;
    let idx = if idx < 0 {
        arr.len().checked_sub(idx.unsigned_abs() as usize)?
    } else {
        idx as usize
    };
    arr.get(idx)
}

fn path<'a>(doc: &'a JsonValue, elements: &[String]) -> Option<&'a JsonValue> {
    elements.iter().try_fold(doc, |curr, elem| match curr {
        JsonValue::Object(obj) => obj.get(elem),
        JsonValue::Array(_) => array_index(curr, elem.trim().parse().ok()?),
        _ => None,
    })
}

/// Path or key list from a text array literal (`'{a,b}'`), a list, or a
/// JSON array.
fn path_elements(value: &ScalarValue) -> Result<Vec<String>> {
    match value {
        ScalarValue::List(items) => Ok(items.iter().filter_map(|v| v.to_text()).collect()),
        ScalarValue::Json(JsonValue::Array(items)) => Ok(items
            .iter()
            .map(|v| match v {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect()),
        ScalarValue::Utf8(s) => {
            let inner = s
                .trim()
                .strip_prefix('{')
                .and_then(|s| s.strip_suffix('}'))
                .ok_or_else(|| evaluation!("malformed array literal: \"{s}\""))?;
            if inner.trim().is_empty() {
                return Ok(Vec::new());
            }
            Ok(inner
                .split(',')
                .map(|elem| elem.trim().trim_matches('"').to_string())
                .collect())
        }
        other => Err(evaluation!(
            "expected a text array for JSON path, got {}",
            other.kind()
        )),
    }
}

fn as_text(value: &JsonValue) -> ScalarValue {
    match value {
        JsonValue::Null => ScalarValue::Null,
        JsonValue::String(s) => ScalarValue::Utf8(s.clone()),
        other => ScalarValue::Utf8(other.to_string()),
    }
}

fn has_key(doc: &JsonValue, key: &str) -> bool {
    match doc {
        JsonValue::Object(obj) => obj.contains_key(key),
        JsonValue::Array(items) => items.iter().any(|v| v.as_str() == Some(key)),
        JsonValue::String(s) => s == key,
        _ => false,
    }
}

/// Postgres `@>` containment.
pub fn contains(container: &JsonValue, contained: &JsonValue) -> bool {
    match (container, contained) {
        (JsonValue::Object(a), JsonValue::Object(b)) => b
            .iter()
            .all(|(k, bv)| a.get(k).is_some_and(|av| contains(av, bv))),
        (JsonValue::Array(a), JsonValue::Array(b)) => {
            b.iter().all(|bv| a.iter().any(|av| contains(av, bv)))
        }
        // A top level array contains a bare scalar if any element equals it.
        (JsonValue::Array(a), b) if !b.is_object() => a.iter().any(|av| av == b),
        (a, b) => a == b,
    }
}

/// `||` on JSON values: objects merge (right wins), arrays concatenate,
/// anything else is wrapped into an array.
pub fn concat(left: &JsonValue, right: &JsonValue) -> JsonValue {
    match (left, right) {
        (JsonValue::Object(a), JsonValue::Object(b)) => {
            let mut out = a.clone();
            for (k, v) in b {
                out.insert(k.clone(), v.clone());
            }
            JsonValue::Object(out)
        }
        (JsonValue::Array(a), JsonValue::Array(b)) => {
            JsonValue::Array(a.iter().chain(b.iter()).cloned().collect())
        }
        (JsonValue::Array(a), b) => {
            let mut out = a.clone();
            out.push(b.clone());
            JsonValue::Array(out)
        }
        (a, JsonValue::Array(b)) => {
            let mut out = Vec::with_capacity(b.len() + 1);
            out.push(a.clone());
            out.extend(b.iter().cloned());
            JsonValue::Array(out)
        }
        (a, b) => JsonValue::Array(vec![a.clone(), b.clone()]),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc() -> ScalarValue {
        ScalarValue::Json(json!({"a": {"b": [10, 20, "x"]}, "c": null, "d": "text"}))
    }

    #[test]
    fn arrow_and_long_arrow() {
        let d = doc();
        assert_eq!(
            ScalarValue::Json(json!({"b": [10, 20, "x"]})),
            json_binary(BinaryOperator::Arrow, &d, &"a".into()).unwrap()
        );
        assert_eq!(
            ScalarValue::from("text"),
            json_binary(BinaryOperator::LongArrow, &d, &"d".into()).unwrap()
        );
        assert_eq!(
            ScalarValue::Null,
            json_binary(BinaryOperator::LongArrow, &d, &"c".into()).unwrap()
        );
        assert_eq!(
            ScalarValue::Null,
            json_binary(BinaryOperator::Arrow, &d, &"missing".into()).unwrap()
        );
    }

    #[test]
    fn text_documents_are_parsed() {
        let text = ScalarValue::from(r#"[1, 2, 3]"#);
        assert_eq!(
            ScalarValue::Json(json!(3)),
            json_binary(BinaryOperator::Arrow, &text, &ScalarValue::Int64(-1)).unwrap()
        );
    }

    #[test]
    fn path_extraction() {
        let d = doc();
        assert_eq!(
            ScalarValue::Json(json!(20)),
            json_binary(BinaryOperator::HashArrow, &d, &"{a,b,1}".into()).unwrap()
        );
        assert_eq!(
            ScalarValue::from("x"),
            json_binary(BinaryOperator::HashLongArrow, &d, &"{a,b,2}".into()).unwrap()
        );
    }

    #[test]
    fn containment() {
        assert!(contains(&json!({"a": 1, "b": [1, 2]}), &json!({"b": [2]})));
        assert!(!contains(&json!({"a": 1}), &json!({"a": 2})));
        assert!(contains(&json!([1, 2, 3]), &json!(2)));
        assert!(contains(&json!([[1, 2], 3]), &json!([[1]])));
    }

    #[test]
    fn key_existence() {
        let d = doc();
        assert_eq!(
            ScalarValue::Boolean(true),
            json_binary(BinaryOperator::Question, &d, &"c".into()).unwrap()
        );
        assert_eq!(
            ScalarValue::Boolean(true),
            json_binary(BinaryOperator::QuestionPipe, &d, &"{zz,d}".into()).unwrap()
        );
        assert_eq!(
            ScalarValue::Boolean(false),
            json_binary(BinaryOperator::QuestionAnd, &d, &"{zz,d}".into()).unwrap()
        );
    }

    #[test]
    fn concat_merges() {
        assert_eq!(json!({"a": 1, "b": 3}), concat(&json!({"a": 1, "b": 2}), &json!({"b": 3})));
        assert_eq!(json!([1, 2]), concat(&json!([1]), &json!(2)));
    }
}
