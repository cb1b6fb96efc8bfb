//! Request body encoding: JSON by default, multipart when the body carries
//! binary content anywhere in its tree.

use relaycache_types::{Blob, NamedFile, RequestBody};
use serde_json::{Map, Value};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

const JSON_CONTENT_TYPE: &str = "application/json";
const OCTET_STREAM: &str = "application/octet-stream";
/// Field name for a non-container root in a multipart body.
const ROOT_FIELD: &str = "body";

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("binary content at `{0}` cannot be sent as JSON")]
    BinaryInJson(String),
    #[error("failed to format date at `{path}`: {reason}")]
    Date { path: String, reason: String },
    #[error("failed to serialize JSON body: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Json,
    /// The transport supplies the header, boundary included.
    Multipart,
}

impl ContentType {
    /// Explicit `Content-Type` header to send, if any.
    pub fn header_value(self) -> Option<&'static str> {
        match self {
            Self::Json => Some(JSON_CONTENT_TYPE),
            Self::Multipart => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Vec<u8>),
    Multipart(Vec<FormField>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodedBody {
    pub payload: Payload,
    pub content_type: ContentType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    pub name: String,
    pub value: FieldValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Binary {
        file_name: String,
        bytes: Vec<u8>,
        mime: String,
    },
}

/// True if any leaf of `body`, at any depth, is binary.
pub fn is_upload(body: &RequestBody) -> bool {
    match body {
        RequestBody::Blob(_) | RequestBody::File(_) => true,
        RequestBody::List(items) => items.iter().any(is_upload),
        RequestBody::Map(entries) => entries.values().any(is_upload),
        _ => false,
    }
}

/// Encode `body` as JSON, or as a multipart form when `upload` is set.
pub fn encode(body: &RequestBody, upload: bool) -> Result<EncodedBody, EncodeError> {
    if upload {
        let mut fields = Vec::new();
        match body {
            RequestBody::Map(entries) => {
                for (key, value) in entries {
                    push_fields(key.clone(), value, &mut fields)?;
                }
            }
            RequestBody::List(items) => {
                for (index, item) in items.iter().enumerate() {
                    push_fields(index.to_string(), item, &mut fields)?;
                }
            }
            other => push_fields(ROOT_FIELD.to_string(), other, &mut fields)?,
        }
        return Ok(EncodedBody {
            payload: Payload::Multipart(fields),
            content_type: ContentType::Multipart,
        });
    }

    let json = to_json(body, "$")?;
    Ok(EncodedBody {
        payload: Payload::Json(serde_json::to_vec(&json)?),
        content_type: ContentType::Json,
    })
}

fn to_json(body: &RequestBody, path: &str) -> Result<Value, EncodeError> {
    Ok(match body {
        RequestBody::Null => Value::Null,
        RequestBody::Bool(b) => Value::Bool(*b),
        RequestBody::Number(n) => Value::Number(n.clone()),
        RequestBody::Text(s) => Value::String(s.clone()),
        RequestBody::Date(date) => Value::String(timestamp(date, path)?),
        RequestBody::Blob(_) | RequestBody::File(_) => {
            return Err(EncodeError::BinaryInJson(path.to_string()));
        }
        RequestBody::List(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(index, item)| to_json(item, &format!("{path}[{index}]")))
                .collect::<Result<_, _>>()?,
        ),
        RequestBody::Map(entries) => {
            let mut map = Map::new();
            for (key, value) in entries {
                map.insert(key.clone(), to_json(value, &format!("{path}.{key}"))?);
            }
            Value::Object(map)
        }
    })
}

fn push_fields(
    name: String,
    body: &RequestBody,
    fields: &mut Vec<FormField>,
) -> Result<(), EncodeError> {
    let value = match body {
        RequestBody::Map(entries) => {
            for (key, value) in entries {
                push_fields(format!("{name}[{key}]"), value, fields)?;
            }
            return Ok(());
        }
        RequestBody::List(items) => {
            for (index, item) in items.iter().enumerate() {
                push_fields(format!("{name}[{index}]"), item, fields)?;
            }
            return Ok(());
        }
        RequestBody::File(file) => named_file(file),
        RequestBody::Blob(blob) => anonymous_blob(&name, blob),
        RequestBody::Date(date) => FieldValue::Text(timestamp(date, &name)?),
        RequestBody::Null => FieldValue::Text("null".to_string()),
        RequestBody::Bool(b) => FieldValue::Text(b.to_string()),
        RequestBody::Number(n) => FieldValue::Text(n.to_string()),
        RequestBody::Text(s) => FieldValue::Text(s.clone()),
    };
    fields.push(FormField { name, value });
    Ok(())
}

fn named_file(file: &NamedFile) -> FieldValue {
    let mime = file.mime.clone().unwrap_or_else(|| {
        mime_guess::from_path(&file.name)
            .first_raw()
            .unwrap_or(OCTET_STREAM)
            .to_string()
    });
    FieldValue::Binary {
        file_name: file.name.clone(),
        bytes: file.bytes.clone(),
        mime,
    }
}

fn anonymous_blob(name: &str, blob: &Blob) -> FieldValue {
    FieldValue::Binary {
        file_name: name.to_string(),
        bytes: blob.bytes.clone(),
        mime: blob.mime.clone().unwrap_or_else(|| OCTET_STREAM.to_string()),
    }
}

fn timestamp(date: &OffsetDateTime, path: &str) -> Result<String, EncodeError> {
    date.format(&Rfc3339).map_err(|err| EncodeError::Date {
        path: path.to_string(),
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;

    fn text(name: &str, value: &str) -> FormField {
        FormField {
            name: name.to_string(),
            value: FieldValue::Text(value.to_string()),
        }
    }

    fn multipart_fields(body: &RequestBody) -> Vec<FormField> {
        let encoded = encode(body, is_upload(body)).expect("encode");
        assert_eq!(encoded.content_type, ContentType::Multipart);
        assert_eq!(encoded.content_type.header_value(), None);
        match encoded.payload {
            Payload::Multipart(fields) => fields,
            Payload::Json(_) => panic!("expected multipart payload"),
        }
    }

    #[test]
    fn plain_bodies_encode_as_json() {
        let body = RequestBody::map([
            ("name", RequestBody::from("ada")),
            ("joined", RequestBody::Date(datetime!(2023-05-06 07:08:09 UTC))),
        ]);
        assert!(!is_upload(&body));

        let encoded = encode(&body, false).expect("encode");
        assert_eq!(encoded.content_type.header_value(), Some("application/json"));
        let Payload::Json(bytes) = encoded.payload else {
            panic!("expected json payload");
        };
        let parsed: Value = serde_json::from_slice(&bytes).expect("valid json");
        assert_eq!(parsed, json!({"name": "ada", "joined": "2023-05-06T07:08:09Z"}));
    }

    #[test]
    fn nested_binary_marks_whole_body_as_upload() {
        let body = RequestBody::map([(
            "profile",
            RequestBody::map([(
                "photos",
                RequestBody::List(vec![RequestBody::Blob(Blob::new(vec![0u8]))]),
            )]),
        )]);
        assert!(is_upload(&body));
    }

    #[test]
    fn multipart_flattens_keys_and_indexes_blobs() {
        let body = RequestBody::map([
            ("title", RequestBody::from("holiday")),
            ("count", RequestBody::from(json!(2))),
            (
                "meta",
                RequestBody::map([
                    ("public", RequestBody::Bool(true)),
                    ("taken", RequestBody::Date(datetime!(2024-02-03 04:05:06 UTC))),
                ]),
            ),
            (
                "photos",
                RequestBody::List(vec![
                    RequestBody::Blob(Blob::new(vec![1u8])),
                    RequestBody::Blob(Blob::new(vec![2u8])),
                ]),
            ),
        ]);

        let fields = multipart_fields(&body);
        let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "count",
                "meta[public]",
                "meta[taken]",
                "photos[0]",
                "photos[1]",
                "title"
            ]
        );
        assert!(fields.contains(&text("meta[taken]", "2024-02-03T04:05:06Z")));
        assert!(fields.contains(&text("meta[public]", "true")));
        assert_eq!(
            fields[4].value,
            FieldValue::Binary {
                file_name: "photos[1]".to_string(),
                bytes: vec![2],
                mime: "application/octet-stream".to_string(),
            }
        );
    }

    #[test]
    fn named_files_keep_their_name() {
        let body = RequestBody::map([(
            "avatar",
            RequestBody::File(NamedFile::new("me.png", vec![9u8, 9])),
        )]);

        let fields = multipart_fields(&body);
        assert_eq!(
            fields,
            vec![FormField {
                name: "avatar".to_string(),
                value: FieldValue::Binary {
                    file_name: "me.png".to_string(),
                    bytes: vec![9, 9],
                    mime: "image/png".to_string(),
                },
            }]
        );
    }

    #[test]
    fn binary_cannot_be_forced_into_json() {
        let body = RequestBody::map([("blob", RequestBody::Blob(Blob::new(vec![1u8])))]);
        let err = encode(&body, false).expect_err("binary in json");
        assert!(matches!(err, EncodeError::BinaryInJson(path) if path == "$.blob"));
    }
}
