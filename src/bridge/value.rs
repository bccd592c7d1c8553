//! Host-side mirror of script values
//!
//! Results leave the script through the invocation shim, which encodes them
//! as `{"type": ..., "value": ...}` trees. Arrays become tables with number
//! keys starting at 1, plain objects become tables with string keys, and
//! handle wrappers keep their kind. Functions survive as a bare type tag so
//! the contract validator can name them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::fmt;

/// A value returned by a provider script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ScriptValue {
    Nil,
    Boolean(bool),
    Number(f64),
    String(String),
    /// Key/value pairs in script iteration order
    Table(Vec<(ScriptValue, ScriptValue)>),
    Function,
    /// Opaque native handle, carrying only its kind name
    Handle(String),
}

/// Type of a script value, as named in contract errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Nil,
    Boolean,
    Number,
    String,
    Table,
    Function,
    Handle,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Nil => "nil",
            ValueKind::Boolean => "boolean",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Table => "table",
            ValueKind::Function => "function",
            ValueKind::Handle => "handle",
        };
        f.write_str(name)
    }
}

impl ScriptValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            ScriptValue::Nil => ValueKind::Nil,
            ScriptValue::Boolean(_) => ValueKind::Boolean,
            ScriptValue::Number(_) => ValueKind::Number,
            ScriptValue::String(_) => ValueKind::String,
            ScriptValue::Table(_) => ValueKind::Table,
            ScriptValue::Function => ValueKind::Function,
            ScriptValue::Handle(_) => ValueKind::Handle,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Consume a table into its entries
    pub fn into_table(self) -> Result<Vec<(ScriptValue, ScriptValue)>, ValueKind> {
        match self {
            ScriptValue::Table(entries) => Ok(entries),
            other => Err(other.kind()),
        }
    }

    /// Look up a string key in a table
    pub fn get(&self, key: &str) -> Option<&ScriptValue> {
        match self {
            ScriptValue::Table(entries) => entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Convert to JSON for serde-based record decoding
    ///
    /// Tables whose keys are all strings become objects, every other table
    /// becomes an array of its values. Functions and handles map to null.
    pub fn to_json(&self) -> Value {
        match self {
            ScriptValue::Nil | ScriptValue::Function | ScriptValue::Handle(_) => Value::Null,
            ScriptValue::Boolean(b) => Value::Bool(*b),
            ScriptValue::Number(n) => number_to_json(*n),
            ScriptValue::String(s) => Value::String(s.clone()),
            ScriptValue::Table(entries) => {
                if !entries.is_empty() && entries.iter().all(|(k, _)| k.kind() == ValueKind::String) {
                    let object: Map<String, Value> = entries
                        .iter()
                        .filter_map(|(k, v)| k.as_str().map(|k| (k.to_string(), v.to_json())))
                        .collect();
                    Value::Object(object)
                } else {
                    Value::Array(entries.iter().map(|(_, v)| v.to_json()).collect())
                }
            }
        }
    }
}

fn number_to_json(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_shim_encoding() {
        let encoded = json!({
            "type": "table",
            "value": [
                [{"type": "number", "value": 1}, {"type": "table", "value": [
                    [{"type": "string", "value": "url"}, {"type": "string", "value": "https://a/1.png"}]
                ]}],
                [{"type": "number", "value": 2}, {"type": "function"}]
            ]
        });

        let value: ScriptValue = serde_json::from_value(encoded).unwrap();
        let entries = value.into_table().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, ScriptValue::Number(1.0));
        assert_eq!(
            entries[0].1.get("url"),
            Some(&ScriptValue::String("https://a/1.png".to_string()))
        );
        assert_eq!(entries[1].1.kind(), ValueKind::Function);
    }

    #[test]
    fn test_nil_and_handle_encoding() {
        let nil: ScriptValue = serde_json::from_value(json!({"type": "nil"})).unwrap();
        assert_eq!(nil, ScriptValue::Nil);

        let handle: ScriptValue =
            serde_json::from_value(json!({"type": "handle", "value": "document"})).unwrap();
        assert_eq!(handle.kind(), ValueKind::Handle);
        assert_eq!(handle.kind().to_string(), "handle");
    }

    #[test]
    fn test_into_table_reports_actual_kind() {
        assert_eq!(
            ScriptValue::String("x".into()).into_table().unwrap_err(),
            ValueKind::String
        );
        assert_eq!(ScriptValue::Nil.into_table().unwrap_err(), ValueKind::Nil);
    }

    #[test]
    fn test_to_json_object_and_array() {
        let record = ScriptValue::Table(vec![
            (ScriptValue::String("name".into()), ScriptValue::String("One".into())),
            (ScriptValue::String("index".into()), ScriptValue::Number(3.0)),
            (ScriptValue::String("ratio".into()), ScriptValue::Number(0.5)),
        ]);
        assert_eq!(record.to_json(), json!({"name": "One", "index": 3, "ratio": 0.5}));

        let list = ScriptValue::Table(vec![
            (ScriptValue::Number(1.0), ScriptValue::Boolean(true)),
            (ScriptValue::Number(2.0), ScriptValue::Nil),
        ]);
        assert_eq!(list.to_json(), json!([true, null]));

        assert_eq!(ScriptValue::Table(vec![]).to_json(), json!([]));
    }
}
