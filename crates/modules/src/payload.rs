// Payload field accessors shared by the built-in modules

use scanq_core::domain::JobPayload;
use scanq_core::port::ModuleFailure;

pub(crate) fn required_str<'a>(payload: &'a JobPayload, key: &str) -> Result<&'a str, ModuleFailure> {
    payload
        .get_str(key)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ModuleFailure::new(format!("Missing '{}' in payload", key)))
}

pub(crate) fn optional_u64(payload: &JobPayload, key: &str) -> Result<Option<u64>, ModuleFailure> {
    match payload.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| ModuleFailure::new(format!("'{}' must be a non-negative integer", key))),
    }
}

pub(crate) fn optional_f64(payload: &JobPayload, key: &str) -> Result<Option<f64>, ModuleFailure> {
    match payload.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .filter(|n| n.is_finite() && *n >= 0.0)
            .map(Some)
            .ok_or_else(|| ModuleFailure::new(format!("'{}' must be a non-negative number", key))),
    }
}

pub(crate) fn string_list(payload: &JobPayload, key: &str) -> Vec<String> {
    payload
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}
