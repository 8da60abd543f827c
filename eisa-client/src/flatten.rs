use serde_json::{Map, Value};

/// A survey response as returned by the API, or after flattening.
pub type Record = Map<String, Value>;

pub const DEFAULT_SEPARATOR: &str = "__";

/// Field whose answer decides whether the follow-up gets merged.
pub const PRIMARY_QUESTION: &str = "environment_peaceful";
/// Follow-up answers, collapsed into one string when the primary answer is "No".
pub const FOLLOW_UP_QUESTION: &str = "response_if_no";

const FOLLOW_UP_JOIN: &str = "\\";

/// Flatten a record with the default `__` separator and apply the follow-up
/// merge rule.
pub fn flatten_record(record: Record) -> Record {
    flatten_record_with(record, DEFAULT_SEPARATOR)
}

pub fn flatten_record_with(mut record: Record, separator: &str) -> Record {
    let follow_up = if record.get(PRIMARY_QUESTION).and_then(Value::as_str) == Some("No") {
        let answer = record
            .shift_remove(FOLLOW_UP_QUESTION)
            .unwrap_or_else(|| Value::Object(Map::new()));
        Some(merge_follow_up(answer))
    } else {
        None
    };

    let mut flat = Map::new();
    flatten_into(&mut flat, record, None, separator);

    if let Some(merged) = follow_up {
        flat.insert(FOLLOW_UP_QUESTION.to_string(), merged);
    }
    flat
}

fn flatten_into(out: &mut Record, object: Record, parent: Option<&str>, separator: &str) {
    for (key, value) in object {
        let key = match parent {
            Some(parent) => format!("{parent}{separator}{key}"),
            None => key,
        };
        match value {
            Value::Object(child) => flatten_into(out, child, Some(&key), separator),
            other => {
                out.insert(key, other);
            }
        }
    }
}

/// Collapse a follow-up mapping into `key: value` pairs joined by a backslash.
/// Non-mapping answers pass through untouched.
fn merge_follow_up(answer: Value) -> Value {
    match answer {
        Value::Object(fields) => {
            let parts: Vec<String> = fields
                .iter()
                .filter(|(_, v)| !is_blank(v))
                .map(|(k, v)| format!("{}: {}", k, render(v)))
                .collect();
            Value::String(parts.join(FOLLOW_UP_JOIN))
        }
        other => other,
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
