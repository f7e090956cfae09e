//! Lenient accessors over loosely-structured upstream JSON.
//!
//! Upstream records have no fixed shape: fields go missing, move, or change
//! type. These helpers answer "give me this field, or nothing" without ever
//! failing, so one odd record cannot sink a whole batch.

use serde_json::Value;

/// Read-only lookups on a JSON document.
pub trait Document {
  /// Field `name`, treating an explicit `null` as absent.
  fn field(&self, name: &str) -> Option<&Value>;

  /// The first of `names` that is present and not `null`.
  fn first_field(&self, names: &[&str]) -> Option<&Value>;

  /// Nested lookup through objects, e.g. `["details", "suffix"]`.
  fn at(&self, path: &[&str]) -> Option<&Value>;

  /// Field `name` if it holds a string.
  fn str_field(&self, name: &str) -> Option<&str>;
}

impl Document for Value {
  fn field(&self, name: &str) -> Option<&Value> {
    self.as_object()?.get(name).filter(|v| !v.is_null())
  }

  fn first_field(&self, names: &[&str]) -> Option<&Value> {
    names.iter().find_map(|name| self.field(name))
  }

  fn at(&self, path: &[&str]) -> Option<&Value> {
    path
      .iter()
      .try_fold(self, |current, segment| current.field(segment))
  }

  fn str_field(&self, name: &str) -> Option<&str> {
    self.field(name)?.as_str()
  }
}

/// Render a scalar as text. Containers and `null` render as empty.
pub fn coerce_string(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Number(n) => n.to_string(),
    Value::Bool(true) => "1".to_string(),
    Value::Bool(false) | Value::Null | Value::Array(_) | Value::Object(_) => String::new(),
  }
}

/// Like [`coerce_string`] on an optional field, defaulting to empty.
pub fn text_or_empty(value: Option<&Value>) -> String {
  value.map(coerce_string).unwrap_or_default()
}

/// Loose truthiness: `null`, `false`, `0`, `""`, `"0"` and empty
/// containers are false.
pub fn is_truthy(value: &Value) -> bool {
  match value {
    Value::Null => false,
    Value::Bool(b) => *b,
    Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
    Value::String(s) => !s.is_empty() && s != "0",
    Value::Array(items) => !items.is_empty(),
    Value::Object(map) => !map.is_empty(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_null_fields_are_absent() {
    let doc = json!({"observation_id": null, "observationId": "OBS9"});
    assert!(doc.field("observation_id").is_none());
    assert_eq!(
      doc.first_field(&["observation_id", "observationId"]),
      Some(&json!("OBS9"))
    );
  }

  #[test]
  fn test_nested_lookup_tolerates_wrong_types() {
    let doc = json!({"details": {"suffix": "_cal"}, "broken": "text"});
    assert_eq!(doc.at(&["details", "suffix"]), Some(&json!("_cal")));
    assert!(doc.at(&["broken", "suffix"]).is_none());
    assert!(json!([1, 2]).at(&["details"]).is_none());
  }

  #[test]
  fn test_coerce_string() {
    assert_eq!(coerce_string(&json!(7)), "7");
    assert_eq!(coerce_string(&json!("2736")), "2736");
    assert_eq!(coerce_string(&json!(true)), "1");
    assert_eq!(coerce_string(&json!({"a": 1})), "");
    assert_eq!(text_or_empty(None), "");
  }

  #[test]
  fn test_truthiness() {
    assert!(!is_truthy(&json!("")));
    assert!(!is_truthy(&json!("0")));
    assert!(!is_truthy(&json!(0)));
    assert!(is_truthy(&json!("OBS1")));
    assert!(is_truthy(&json!(12)));
  }
}
