use serde_json::Value;

/// Coerce a raw field value to a number.
///
/// Judges submit free-form JSON: numbers, strings typed into form inputs,
/// booleans from checkboxes. Null and empty/whitespace strings mean "not
/// filled in" and yield `None`; booleans count as 1/0 so checkbox fields can
/// feed numeric rules. Anything that does not coerce contributes nothing
/// instead of failing the submission.
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() { None } else { s.parse().ok() }
        }
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Canonical lookup key for mapping rules.
///
/// Scalars map to their plain string form ("5", "5.5", "true"); strings are
/// used verbatim. Null and composite values have no key.
pub fn mapping_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Array(_) | Value::Object(_) => None,
    }
}
