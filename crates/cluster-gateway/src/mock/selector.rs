//! Label and field selector matching for the in-memory store

use serde_json::Value;

/// Whether `object` satisfies an equality/existence label selector
pub(crate) fn matches_labels(object: &Value, selector: &str) -> bool {
    let labels = &object["metadata"]["labels"];
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            if let Some((key, value)) = term.split_once("!=") {
                labels.get(key.trim()).and_then(Value::as_str) != Some(value.trim())
            } else if let Some((key, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
                labels.get(key.trim()).and_then(Value::as_str) == Some(value.trim())
            } else if let Some(key) = term.strip_prefix('!') {
                labels.get(key.trim()).is_none()
            } else {
                labels.get(term).is_some()
            }
        })
}

/// Whether `object` satisfies a field selector such as `metadata.name=x`
pub(crate) fn matches_fields(object: &Value, selector: &str) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            let (path, expected, negate) = match term.split_once("!=") {
                Some((path, value)) => (path, value, true),
                None => match term.split_once("==").or_else(|| term.split_once('=')) {
                    Some((path, value)) => (path, value, false),
                    None => return false,
                },
            };
            let found = path
                .trim()
                .split('.')
                .try_fold(object, |current, segment| current.get(segment))
                .and_then(Value::as_str);
            (found == Some(expected.trim())) != negate
        })
}
