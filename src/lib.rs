//! Actor-isolated request cache.
//!
//! Callers send keyed "fetch or reuse" requests through a [`client::CacheClient`];
//! the [`engine::Engine`] resolves each key to one subject, runs at most one
//! in-flight fetch per request id, commits under a per-subject write lock and
//! republishes changes to every subscribed request.

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod infra;
