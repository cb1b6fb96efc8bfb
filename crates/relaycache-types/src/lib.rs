//! Shared message types for the relaycache engine.
//!
//! Everything that crosses the boundary between a caller and the cache engine is
//! defined here as an owned, serializable value. Messages are moved through
//! channels and never shared by reference, so a caller mutating its copy can
//! never be observed by the engine (and vice versa).

mod body;
mod message;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use body::{Blob, NamedFile, RequestBody};
pub use message::{
    Credentials, FetchErrorKind, InboundMessage, OutboundMessage, QueryConfig, RequestConfig,
    RequestMode, ResetTarget,
};

/// Caller-supplied cache name. Either a string or an integer on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CacheName {
    Number(i64),
    Text(String),
}

impl fmt::Display for CacheName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for CacheName {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for CacheName {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for CacheName {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

/// Identifies one logical caller site.
///
/// Stable across re-invocations from the same site, so retriggered requests
/// resolve to the same pending task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Build the id for a caller instance: `<cache name>-<instance>`.
    pub fn new(cache_name: &CacheName, instance: Uuid) -> Self {
        Self(format!("{cache_name}-{instance}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
