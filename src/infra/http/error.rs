use relaycache_types::FetchErrorKind;
use thiserror::Error;

use super::body::EncodeError;

/// Why a fetch produced no data. Reported once across the boundary; never
/// retried by the engine.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("server responded with status {status}")]
    Http { status: u16 },
    #[error("failed to decode response body: {0}")]
    Decode(String),
    #[error("request timed out")]
    Timeout,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            Self::Network(_) => FetchErrorKind::Network,
            Self::Http { status } => FetchErrorKind::Http { status: *status },
            Self::Decode(_) => FetchErrorKind::Decode,
            Self::Timeout => FetchErrorKind::Timeout,
            Self::InvalidRequest(_) => FetchErrorKind::InvalidRequest,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else if err.is_builder() {
            Self::InvalidRequest(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<EncodeError> for FetchError {
    fn from(err: EncodeError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}
