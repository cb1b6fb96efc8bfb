use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CacheName, RequestBody, RequestId};

/// Network parameters of a request. An absent `method` means the request is
/// cache-only and never touches the network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<RequestBody>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<RequestMode>,
}

impl RequestConfig {
    /// A request with the given method and URL.
    pub fn new(method: &str, url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            method: Some(method.to_string()),
            ..Self::default()
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    /// Upper-cased method, or `None` when no network call should be made.
    pub fn normalized_method(&self) -> Option<String> {
        self.method
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_uppercase)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Credentials {
    Include,
    SameOrigin,
    Omit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    Cors,
    NoCors,
    SameOrigin,
}

/// Cache-level behaviour of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryConfig {
    pub cache_name: CacheName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default)]
    pub merge_existing: bool,
    /// `false` suppresses dispatch entirely.
    #[serde(default = "default_run")]
    pub run: bool,
    /// Freeze the subject once it resolves; later fetches replay the cached value.
    #[serde(default)]
    pub run_once: bool,
    /// Dispatch as soon as the call site is created.
    #[serde(default)]
    pub run_auto: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset: Option<ResetTarget>,
}

fn default_run() -> bool {
    true
}

impl QueryConfig {
    pub fn new(cache_name: impl Into<CacheName>) -> Self {
        Self {
            cache_name: cache_name.into(),
            data: None,
            merge_existing: false,
            run: true,
            run_once: false,
            run_auto: false,
            reset: None,
        }
    }
}

/// Subject to clear (or seed) before anything else happens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResetTarget {
    Seed {
        #[serde(rename = "cacheName")]
        cache_name: CacheName,
        placeholder: Value,
    },
    Key(CacheName),
}

impl ResetTarget {
    pub fn cache_name(&self) -> &CacheName {
        match self {
            Self::Seed { cache_name, .. } | Self::Key(cache_name) => cache_name,
        }
    }

    pub fn placeholder(&self) -> Option<&Value> {
        match self {
            Self::Seed { placeholder, .. } => Some(placeholder),
            Self::Key(_) => None,
        }
    }
}

/// Caller → engine: one "fetch or reuse" request.
///
/// On the wire this is the flattened union of [`QueryConfig`] and
/// [`RequestConfig`] plus the caller-minted id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: RequestId,
    #[serde(flatten)]
    pub query: QueryConfig,
    #[serde(flatten)]
    pub request: RequestConfig,
}

/// Engine → caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OutboundMessage {
    /// A subject this request subscribes to changed, or was replayed.
    Data {
        id: RequestId,
        cache_name: CacheName,
        data: Value,
    },
    /// The fetch for this request failed. Sent once; the subject is untouched.
    Error {
        id: RequestId,
        cache_name: CacheName,
        error: String,
        kind: FetchErrorKind,
    },
}

impl OutboundMessage {
    pub fn id(&self) -> &RequestId {
        match self {
            Self::Data { id, .. } | Self::Error { id, .. } => id,
        }
    }

    pub fn cache_name(&self) -> &CacheName {
        match self {
            Self::Data { cache_name, .. } | Self::Error { cache_name, .. } => cache_name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    Network,
    Http { status: u16 },
    Decode,
    Timeout,
    InvalidRequest,
}
