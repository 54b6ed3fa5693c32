//! Dot-path lookups into arbitrary JSON responses.
//!
//! Paths like `data.items` or `payload.results.0.rows` walk objects by key
//! and arrays by index. Lookups never fail loudly; a missing segment is `None`.

use serde_json::Value;

/// Resolve a dot-separated path. An empty path is the value itself.
pub fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Resolve a path that must point at an array of rows.
pub fn resolve_rows(value: &Value, path: &str) -> Option<Vec<Value>> {
    resolve_path(value, path)?.as_array().cloned()
}

/// Resolve a path that must point at a non-negative count.
///
/// Accepts integers, integral floats and numeric strings.
pub fn resolve_count(value: &Value, path: &str) -> Option<usize> {
    match resolve_path(value, path)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                    .map(|f| f as u64)
            })
            .and_then(|n| usize::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
