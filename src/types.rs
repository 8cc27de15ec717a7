//! Submission data helpers.

use serde_json::Value;

/// Extract a component's value from submission data.
///
/// Component keys may be dotted paths into nested resources; a nested
/// resource (an object carrying an `_id`) is traversed through its
/// `data` field. When the component is marked `multiple`, a legacy
/// single value is normalized to a one-element array.
pub fn field_data(data: &Value, component: &Value) -> Option<Value> {
  let key = component.get("key")?.as_str()?;
  let multiple = component
    .get("multiple")
    .and_then(Value::as_bool)
    .unwrap_or(false);

  let mut value = data;
  for part in key.split('.') {
    // Step into nested resource data.
    if value.get("_id").is_some() {
      value = value.get("data")?;
    }
    value = value.get(part)?;
  }

  if multiple && !value.is_array() {
    return Some(Value::Array(vec![value.clone()]));
  }
  Some(value.clone())
}
