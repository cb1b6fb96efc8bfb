//! Request body tree.
//!
//! Unlike response data, which is plain JSON, a request body may carry binary
//! leaves (ad hoc blobs or named files) and dates. The engine inspects the tree
//! to decide between a JSON body and a multipart form.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use time::OffsetDateTime;

/// Nested request payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum RequestBody {
    Null,
    Bool(bool),
    Number(Number),
    Text(String),
    Date(#[serde(with = "time::serde::rfc3339")] OffsetDateTime),
    Blob(Blob),
    File(NamedFile),
    List(Vec<RequestBody>),
    Map(BTreeMap<String, RequestBody>),
}

impl RequestBody {
    /// Build a mapping node from key/value pairs.
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, RequestBody)>,
    {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl From<Value> for RequestBody {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::Text(s),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                Self::Map(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<&str> for RequestBody {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Anonymous binary content. Named after its enclosing key when encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
}

impl Blob {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            mime: None,
        }
    }
}

/// Binary content that keeps its own file name when encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedFile {
    pub name: String,
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
}

impl NamedFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
            mime: None,
        }
    }
}

mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;

    #[test]
    fn json_values_convert_into_body_tree() {
        let body = RequestBody::from(json!({"name": "ada", "tags": ["x", 1], "none": null}));
        let RequestBody::Map(map) = body else {
            panic!("expected map");
        };
        assert_eq!(map["name"], RequestBody::Text("ada".into()));
        assert!(matches!(&map["tags"], RequestBody::List(items) if items.len() == 2));
        assert_eq!(map["none"], RequestBody::Null);
    }

    #[test]
    fn binary_leaves_travel_as_base64() {
        let body = RequestBody::map([
            ("avatar", RequestBody::File(NamedFile::new("me.png", vec![1u8, 2, 3]))),
            ("taken", RequestBody::Date(datetime!(2024-01-02 03:04:05 UTC))),
        ]);

        let wire = serde_json::to_value(&body).expect("serialize body");
        assert_eq!(wire["value"]["avatar"]["value"]["bytes"], json!("AQID"));
        assert_eq!(wire["value"]["taken"]["value"], json!("2024-01-02T03:04:05Z"));

        let back: RequestBody = serde_json::from_value(wire).expect("deserialize body");
        assert_eq!(back, body);
    }
}
