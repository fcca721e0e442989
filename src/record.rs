//! Parsed metadata records

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Value of a format-specific field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Integer(v) => Some(*v as f64),
            FieldValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::Integer(i64::from(v))
    }
}

impl From<u16> for FieldValue {
    fn from(v: u16) -> Self {
        FieldValue::Integer(i64::from(v))
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<FieldValue> for serde_json::Value {
    fn from(v: FieldValue) -> Self {
        match v {
            FieldValue::Integer(i) => serde_json::Value::from(i),
            FieldValue::Float(f) => serde_json::Value::from(f),
            FieldValue::Text(s) => serde_json::Value::from(s),
        }
    }
}

/// Result of a successful header parse
///
/// Image formats always fill `width` and `height`; audio formats usually
/// leave them empty and carry tag fields instead. The default value is the
/// empty record used for resources nothing could be extracted from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(flatten)]
    fields: BTreeMap<String, FieldValue>,
}

impl MetadataRecord {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record carrying only dimensions
    pub fn with_dimensions(width: u32, height: u32) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            fields: BTreeMap::new(),
        }
    }

    /// Set a format-specific field
    ///
    /// `width` and `height` are routed to the typed fields when the value is
    /// a non-negative integer that fits; other values for those keys are
    /// dropped so the bag never shadows them.
    pub fn set(&mut self, key: &str, value: impl Into<FieldValue>) {
        let value = value.into();
        match key {
            "width" | "height" => {
                let Some(v) = value.as_i64().and_then(|v| u32::try_from(v).ok()) else {
                    return;
                };
                if key == "width" {
                    self.width = Some(v);
                } else {
                    self.height = Some(v);
                }
            }
            _ => {
                self.fields.insert(key.to_string(), value);
            }
        }
    }

    /// Builder form of [`set`](Self::set)
    pub fn with(mut self, key: &str, value: impl Into<FieldValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Look up a format-specific field
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// Iterate over format-specific fields in key order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// True if nothing was extracted
    pub fn is_empty(&self) -> bool {
        self.width.is_none() && self.height.is_none() && self.fields.is_empty()
    }

    /// Merge this record into a caller-supplied property bag
    ///
    /// Keys present in the record overwrite keys in `base`.
    pub fn merge_into(&self, base: &mut serde_json::Map<String, serde_json::Value>) {
        if let Some(width) = self.width {
            base.insert("width".into(), width.into());
        }
        if let Some(height) = self.height {
            base.insert("height".into(), height.into());
        }
        for (key, value) in &self.fields {
            base.insert(key.clone(), value.clone().into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_keys_are_typed() {
        let mut record = MetadataRecord::new();
        record.set("width", 640u32);
        record.set("height", "tall");
        record.set("title", "Song");

        assert_eq!(record.width, Some(640));
        assert_eq!(record.height, None);
        assert!(record.get("height").is_none());
        assert_eq!(record.get("title").and_then(FieldValue::as_str), Some("Song"));
    }

    #[test]
    fn test_json_shape() {
        let record = MetadataRecord::with_dimensions(100, 50).with("duration", 1.5);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"width": 100, "height": 50, "duration": 1.5})
        );

        let back: MetadataRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);

        let empty = serde_json::to_string(&MetadataRecord::new()).unwrap();
        assert_eq!(empty, "{}");
    }

    #[test]
    fn test_merge_into_base() {
        let mut base = serde_json::Map::new();
        base.insert("name".into(), "a.png".into());
        base.insert("width".into(), 1.into());

        MetadataRecord::with_dimensions(3, 4).merge_into(&mut base);
        assert_eq!(base["name"], "a.png");
        assert_eq!(base["width"], 3);
        assert_eq!(base["height"], 4);
    }
}
