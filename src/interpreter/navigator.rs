//! Nested value navigation and literal handling.
//!
//! Resolved values are plain `serde_json::Value` trees; access paths walk
//! them without ever failing — a miss at any step yields `null`.

use serde_json::{Number, Value as JsonValue};

use super::tokenizer::quoted_content;
use super::ExpressionError;

/// Apply a dotted/bracketed access path to a resolved root value.
///
/// `.name` steps are case-insensitive property lookups; `[n]` steps index
/// arrays positionally and walk keyed maps to their n-th entry. Missing
/// properties, out-of-range indices, and steps into scalars or `null`
/// navigate to `null` instead of failing. Only an unterminated `[` is an
/// error.
pub(crate) fn apply_access_path(root: JsonValue, path: &str) -> Result<JsonValue, ExpressionError> {
    let mut current = root;
    let bytes = path.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if current.is_null() {
            return Ok(JsonValue::Null);
        }
        match bytes[i] {
            b'.' => {
                i += 1;
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                if start == i {
                    return Ok(JsonValue::Null);
                }
                current = get_property(&current, &path[start..i]);
            }
            b'[' => {
                let close = match path[i..].find(']') {
                    Some(off) => i + off,
                    None => {
                        return Err(ExpressionError::UnbalancedDelimiters {
                            expression: path.to_string(),
                        })
                    }
                };
                let index_text = path[i + 1..close].trim();
                i = close + 1;
                match index_text.parse::<usize>() {
                    Ok(index) => current = get_index(&current, index),
                    Err(_) => return Ok(JsonValue::Null),
                }
            }
            b' ' | b'\t' => i += 1,
            _ => return Ok(JsonValue::Null),
        }
    }
    Ok(current)
}

fn get_property(value: &JsonValue, name: &str) -> JsonValue {
    let JsonValue::Object(map) = value else {
        return JsonValue::Null;
    };
    if let Some(found) = map.get(name) {
        return found.clone();
    }
    map.iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, found)| found.clone())
        .unwrap_or(JsonValue::Null)
}

fn get_index(value: &JsonValue, index: usize) -> JsonValue {
    match value {
        JsonValue::Array(items) => items.get(index).cloned().unwrap_or(JsonValue::Null),
        JsonValue::Object(map) => map.values().nth(index).cloned().unwrap_or(JsonValue::Null),
        _ => JsonValue::Null,
    }
}

/// Interpret a bare token as a literal value.
///
/// Quoted text becomes a string, numbers become doubles, `true`/`false`/
/// `null` (case-insensitive) their respective values. Anything else is the
/// raw token, unchanged.
pub(crate) fn parse_literal(text: &str) -> JsonValue {
    let text = text.trim();
    if let Some(inner) = quoted_content(text) {
        return JsonValue::String(inner.to_string());
    }
    let numeric_start = text
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || c == '-' || c == '+' || c == '.');
    if numeric_start {
        if let Ok(number) = text.parse::<f64>() {
            return number_value(number);
        }
    }
    if text.eq_ignore_ascii_case("true") {
        return JsonValue::Bool(true);
    }
    if text.eq_ignore_ascii_case("false") {
        return JsonValue::Bool(false);
    }
    if text.eq_ignore_ascii_case("null") {
        return JsonValue::Null;
    }
    JsonValue::String(text.to_string())
}

/// Wrap an `f64` result; non-finite values have no JSON representation and
/// collapse to `null`.
pub(crate) fn number_value(value: f64) -> JsonValue {
    Number::from_f64(value)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}

/// Render a resolved value for splicing back into a string.
///
/// `null` renders empty, whole-valued doubles render without a decimal
/// point, and structured values render as compact JSON.
pub(crate) fn value_to_string(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => number_to_string(n),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn number_to_string(number: &Number) -> String {
    if let Some(i) = number.as_i64() {
        return i.to_string();
    }
    if let Some(u) = number.as_u64() {
        return u.to_string();
    }
    match number.as_f64() {
        // 2^53 bounds the integers a double can represent exactly
        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 => {
            (f as i64).to_string()
        }
        Some(f) => f.to_string(),
        None => number.to_string(),
    }
}

/// Numeric coercion: numbers pass through, numeric strings parse.
pub(crate) fn value_to_f64(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> JsonValue {
        json!({
            "items": [ { "value": 5.0 }, { "value": 7.5 } ],
            "name": "first",
            "meta": { "owner": "ops", "retries": 3.0 }
        })
    }

    #[test]
    fn test_dotted_path() {
        let result = apply_access_path(sample(), ".name").unwrap();
        assert_eq!(result, json!("first"));
    }

    #[test]
    fn test_indexed_path() {
        let result = apply_access_path(sample(), ".items[1].value").unwrap();
        assert_eq!(result, json!(7.5));
    }

    #[test]
    fn test_case_insensitive_properties() {
        let result = apply_access_path(sample(), ".ITEMS[0].VALUE").unwrap();
        assert_eq!(result, json!(5.0));
    }

    #[test]
    fn test_missing_property_is_null() {
        assert_eq!(apply_access_path(sample(), ".nope").unwrap(), JsonValue::Null);
    }

    #[test]
    fn test_out_of_range_index_is_null() {
        assert_eq!(
            apply_access_path(sample(), ".items[5].value").unwrap(),
            JsonValue::Null
        );
    }

    #[test]
    fn test_step_into_scalar_is_null() {
        assert_eq!(
            apply_access_path(sample(), ".name.deeper").unwrap(),
            JsonValue::Null
        );
    }

    #[test]
    fn test_null_root_stays_null() {
        assert_eq!(
            apply_access_path(JsonValue::Null, ".a[0].b").unwrap(),
            JsonValue::Null
        );
    }

    #[test]
    fn test_index_walks_keyed_map() {
        // key order: items, meta, name
        let result = apply_access_path(sample(), "[2]").unwrap();
        assert_eq!(result, json!("first"));
    }

    #[test]
    fn test_unterminated_index_errors() {
        assert!(apply_access_path(sample(), ".items[0").is_err());
    }

    #[test]
    fn test_literals() {
        assert_eq!(parse_literal("'hello'"), json!("hello"));
        assert_eq!(parse_literal("\"hi\""), json!("hi"));
        assert_eq!(parse_literal("42"), json!(42.0));
        assert_eq!(parse_literal("-1.5"), json!(-1.5));
        assert_eq!(parse_literal("TRUE"), json!(true));
        assert_eq!(parse_literal("false"), json!(false));
        assert_eq!(parse_literal("NULL"), JsonValue::Null);
        assert_eq!(parse_literal("bare-token"), json!("bare-token"));
        // words that would parse as floats stay raw tokens
        assert_eq!(parse_literal("inf"), json!("inf"));
        assert_eq!(parse_literal("nan"), json!("nan"));
    }

    #[test]
    fn test_value_to_string() {
        assert_eq!(value_to_string(&JsonValue::Null), "");
        assert_eq!(value_to_string(&json!(true)), "true");
        assert_eq!(value_to_string(&json!(5.0)), "5");
        assert_eq!(value_to_string(&json!(2.5)), "2.5");
        assert_eq!(value_to_string(&json!("text")), "text");
        assert_eq!(value_to_string(&json!([1, 2])), "[1,2]");
    }

    #[test]
    fn test_value_to_f64() {
        assert_eq!(value_to_f64(&json!(3.5)), Some(3.5));
        assert_eq!(value_to_f64(&json!("4")), Some(4.0));
        assert_eq!(value_to_f64(&json!(" 4.5 ")), Some(4.5));
        assert_eq!(value_to_f64(&json!(true)), None);
        assert_eq!(value_to_f64(&json!("abc")), None);
        assert_eq!(value_to_f64(&JsonValue::Null), None);
    }
}
