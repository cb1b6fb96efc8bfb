//! Caller side of the cache: pending-task bookkeeping, dispatch through the
//! engine's mailbox, and per-site request handles.

mod call_site;
mod dispatch;
mod error;
pub mod tasks;

pub use call_site::CallSite;
pub use dispatch::{CacheClient, Dispatch};
pub use error::ClientError;
pub use tasks::{Callback, DEFAULT_MAX_AGE, RemoteError, Reply, TaskRegistry};
