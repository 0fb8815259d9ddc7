//! Attribute data decoding.
//!
//! Collection data, template data and asset data reach the filler in one of
//! three shapes: an already decoded JSON object, an attribute map
//! (`[{"key": .., "value": [type, value]}]`, as carried by log actions) or
//! serialized bytes described by a [`Format`] list. Binary deserialization
//! is delegated to an [`AttributeDecoder`] supplied by the deployment.

use serde_json::{Map, Value};

use contractfill_core::FillerError;

use crate::types::Format;

pub trait AttributeDecoder: Send + Sync {
    /// Decode `data` into a JSON object according to `format`.
    fn decode(&self, format: &[Format], data: &Value) -> Result<Value, FillerError>;
}

/// Accepts decoded objects and attribute maps; rejects non-empty binary data.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonAttributeDecoder;

impl AttributeDecoder for JsonAttributeDecoder {
    fn decode(&self, _format: &[Format], data: &Value) -> Result<Value, FillerError> {
        match data {
            Value::Null => Ok(Value::Object(Map::new())),
            Value::Object(_) => Ok(data.clone()),
            Value::String(hex) if hex.is_empty() => Ok(Value::Object(Map::new())),
            Value::Array(items) if items.is_empty() => Ok(Value::Object(Map::new())),
            Value::Array(items) if items.iter().all(Value::is_object) => {
                Ok(Value::Object(convert_attribute_map(data)?))
            }
            _ => Err(FillerError::Other(
                "serialized attribute data needs a binary AttributeDecoder".into(),
            )),
        }
    }
}

/// Flatten an attribute map into an object. 64-bit integers become strings.
pub fn convert_attribute_map(data: &Value) -> Result<Map<String, Value>, FillerError> {
    let invalid = |entry: &Value| FillerError::Other(format!("invalid attribute map entry {entry}"));
    let mut result = Map::new();
    let Some(entries) = data.as_array() else {
        return match data {
            Value::Null => Ok(result),
            Value::Object(map) => Ok(map.clone()),
            other => Err(invalid(other)),
        };
    };
    for entry in entries {
        let key = entry
            .get("key")
            .or_else(|| entry.get("first"))
            .and_then(Value::as_str)
            .ok_or_else(|| invalid(entry))?;
        let variant = entry
            .get("value")
            .or_else(|| entry.get("second"))
            .and_then(Value::as_array)
            .filter(|v| v.len() == 2)
            .ok_or_else(|| invalid(entry))?;
        let kind = variant[0].as_str().unwrap_or_default();
        let value = match kind {
            "uint64" | "int64" => Value::String(scalar_string(&variant[1])),
            "INT64_VEC" | "UINT64_VEC" => Value::Array(
                variant[1]
                    .as_array()
                    .map(|items| items.iter().map(|v| Value::String(scalar_string(v))).collect())
                    .unwrap_or_default(),
            ),
            _ => variant[1].clone(),
        };
        result.insert(key.to_string(), value);
    }
    Ok(result)
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn attribute_maps_are_flattened() {
        let data = json!([
            { "key": "name", "value": ["string", "Sword"] },
            { "first": "power", "second": ["uint64", 9000] },
            { "key": "ids", "value": ["UINT64_VEC", [1, "2"]] },
            { "key": "level", "value": ["uint8", 3] },
        ]);
        let object = convert_attribute_map(&data).unwrap();
        assert_eq!(
            Value::Object(object),
            json!({ "name": "Sword", "power": "9000", "ids": ["1", "2"], "level": 3 })
        );
        assert!(convert_attribute_map(&json!([{ "key": "x" }])).is_err());
    }

    #[test]
    fn json_decoder_shapes() {
        let decoder = JsonAttributeDecoder;
        assert_eq!(decoder.decode(&[], &json!({ "a": 1 })).unwrap(), json!({ "a": 1 }));
        assert_eq!(decoder.decode(&[], &json!([])).unwrap(), json!({}));
        assert_eq!(decoder.decode(&[], &json!("")).unwrap(), json!({}));
        assert_eq!(
            decoder
                .decode(&[], &json!([{ "key": "img", "value": ["string", "Qm"] }]))
                .unwrap(),
            json!({ "img": "Qm" })
        );
        assert!(decoder.decode(&[], &json!([4, 110, 97])).is_err());
        assert!(decoder.decode(&[], &json!("046e61")).is_err());
    }
}
