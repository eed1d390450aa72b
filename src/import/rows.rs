use chrono::DateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static NON_SLUG: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid slug regex"));

/// Trimmed, non-empty string field.
pub(crate) fn str_field<'a>(row: &'a Value, key: &str) -> Option<&'a str> {
    row.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// String or numeric field rendered as a reference key.
pub(crate) fn reference_field(row: &Value, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// The id the exporting system used for this row, if any.
pub(crate) fn legacy_id(row: &Value) -> Option<String> {
    reference_field(row, "id")
}

/// References held in an array field. Entries may be plain strings/numbers or
/// objects carrying one of `keys`.
pub(crate) fn reference_list(row: &Value, field: &str, keys: &[&str]) -> Vec<String> {
    let Some(Value::Array(items)) = row.get(field) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
            Value::Number(n) => Some(n.to_string()),
            Value::Object(_) => keys.iter().find_map(|key| reference_field(item, key)),
            _ => None,
        })
        .collect()
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn slugify(input: &str) -> String {
    let lowered = input.trim().to_lowercase();
    NON_SLUG
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_string()
}

/// Epoch milliseconds from an integer field or an RFC 3339 string.
pub(crate) fn timestamp_ms(row: &Value, key: &str) -> Option<i64> {
    match row.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.timestamp_millis()),
        _ => None,
    }
}

/// Setting values are stored as text; structured values keep their json form.
pub(crate) fn value_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

pub(crate) fn object_mut(row: &mut Value) -> Option<&mut Map<String, Value>> {
    row.as_object_mut()
}

/// Copy of `row` carrying its newly persisted id.
pub(crate) fn with_id(row: &Value, id: &str) -> Value {
    let mut out = row.clone();
    if let Some(obj) = out.as_object_mut() {
        obj.insert("id".into(), Value::String(id.to_string()));
    }
    out
}

/// Short label for a row in problem and error messages.
pub(crate) fn describe(row: &Value, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|key| reference_field(row, key))
        .or_else(|| legacy_id(row))
        .unwrap_or_else(|| "<unidentified>".to_string())
}
