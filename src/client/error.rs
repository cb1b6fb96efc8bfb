use thiserror::Error;

use super::tasks::RemoteError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request suppressed: `run` is false")]
    Suppressed,
    #[error("a request for this call site is already pending")]
    Duplicate,
    #[error("engine is no longer accepting requests")]
    EngineClosed,
    #[error("no reply within the reply timeout")]
    Timeout,
    #[error("pending request was dropped before a reply arrived")]
    Abandoned,
    #[error("fetch failed: {0}")]
    Remote(#[from] RemoteError),
}
