//! Conversions of raw JSON values shared by the matcher and the typed coercions.
use std::borrow::Cow;

use serde_json::Value;

/// Render a JSON value the way flag documents compare and display it.
///
/// Numbers go through `f64` so that `5`, `5.0` and an `f64` attribute of `5.0` all render as
/// `"5"`. Arrays and objects render as compact JSON.
pub(crate) fn to_display_string(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s),
        Value::Number(n) => Cow::Owned(match n.as_i64() {
            Some(i) => i.to_string(),
            None => n.as_f64().map_or_else(|| n.to_string(), format_number),
        }),
        Value::Bool(b) => Cow::Borrowed(if *b { "true" } else { "false" }),
        Value::Null => Cow::Borrowed("null"),
        Value::Array(_) | Value::Object(_) => Cow::Owned(value.to_string()),
    }
}

pub(crate) fn format_number(n: f64) -> String {
    n.to_string()
}

/// Truthiness of a flag value: `false`, `0`, `NaN`, empty strings, empty arrays, empty objects
/// and `null` are falsy; everything else is truthy.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Null => false,
    }
}

/// Numeric reading of a flag value. Returns `None` for anything that is not a number or a string
/// holding one.
pub(crate) fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| !f.is_nan()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn integers_and_whole_floats_render_alike() {
        assert_eq!(to_display_string(&json!(5)), "5");
        assert_eq!(to_display_string(&json!(5.0)), "5");
        assert_eq!(format_number(5.0), "5");
        assert_eq!(to_display_string(&json!(5.5)), "5.5");
    }

    #[test]
    fn strings_render_without_quotes() {
        assert_eq!(to_display_string(&json!("pradyun")), "pradyun");
        assert_eq!(to_display_string(&json!({"a": 1})), r#"{"a":1}"#);
    }

    #[test]
    fn truthiness() {
        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!("false")));
        assert!(is_truthy(&json!([0])));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!({})));
        assert!(!is_truthy(&json!(null)));
    }

    #[test]
    fn numbers_from_strings() {
        assert_eq!(as_number(&json!(" 42 ")), Some(42.0));
        assert_eq!(as_number(&json!(1.5)), Some(1.5));
        assert_eq!(as_number(&json!("blue")), None);
        assert_eq!(as_number(&json!("")), None);
        assert_eq!(as_number(&json!(true)), None);
    }
}
