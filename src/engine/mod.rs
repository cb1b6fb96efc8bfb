//! Engine side of the cache.
//!
//! Subjects hold one value per cache key and fan changes out to subscribers.
//! Each inbound request gets a coordinator that subscribes a relay to its
//! subject, then fetches, commits inline data, replays the cached value, or
//! rests. Commits to one subject are serialized by the subject's write lock.

pub mod coordinator;
#[allow(clippy::module_inception)]
mod engine;
pub mod equality;
mod keys;
pub(crate) mod lock;
pub mod merge;
pub mod registry;
pub mod subject;

pub use coordinator::{Coordinator, EngineContext, Outcome, Relay};
pub use engine::{Engine, EngineHandle};
pub use equality::{Shape, deep_equal, deep_equal_opt};
pub use keys::CacheKey;
pub use merge::merge;
pub use registry::{Admission, CoordinatorRegistry, Phase, Ticket};
pub use subject::{KeyedStore, Subject, Subscriber, Subscription, WriteGuard};
