//! Field lookup over provider payloads whose shapes are not uniform.
//!
//! Each list below is tried in order and the first non-empty value wins. Add
//! a path to the relevant list when a provider grows a new shape.

use serde_json::Value;

/// Where the creation response carries the task id.
pub const TASK_ID_FIELDS: &[&str] = &["result", "data.taskId", "taskId"];

/// Where push notifications carry the task id.
pub const PUSH_TASK_ID_FIELDS: &[&str] = &[
    "data.task_id",
    "data.taskId",
    "taskId",
    "task_id",
    "id",
];

/// Resolve a dotted path. Numeric segments index into arrays.
pub fn lookup<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(payload, |value, segment| match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Non-empty strings and numbers, coerced to a string.
pub fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn field(payload: &Value, path: &str) -> Option<String> {
    lookup(payload, path).and_then(scalar_string)
}

pub fn first_field(paths: &[&str], payload: &Value) -> Option<String> {
    paths.iter().find_map(|path| field(payload, path))
}

pub fn task_id(payload: &Value) -> Option<String> {
    first_field(TASK_ID_FIELDS, payload)
}

pub fn push_task_id(payload: &Value) -> Option<String> {
    first_field(PUSH_TASK_ID_FIELDS, payload)
}
