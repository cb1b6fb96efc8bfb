//! Pending caller tasks keyed by request id.
//!
//! A task is registered when a request is dispatched and removed when its
//! reply arrives. Tasks whose reply never comes are swept once they outlive
//! the maximum age; sweeping piggybacks on reply handling and runs at most
//! once per maximum-age window.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::counter;
use relaycache_types::{FetchErrorKind, RequestId};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace};

use crate::engine::lock::lock_or_recover;

const SOURCE: &str = "client::tasks";
const METRIC_TASK_SWEPT: &str = "relaycache_task_swept_total";

pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(5 * 60);

/// A failed fetch as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RemoteError {
    pub message: String,
    pub kind: FetchErrorKind,
}

pub type Reply = Result<Value, RemoteError>;

pub type Callback = Box<dyn FnOnce(Reply) + Send + Sync>;

struct PendingTask {
    callback: Callback,
    registered_at: Instant,
}

pub struct TaskRegistry {
    tasks: DashMap<RequestId, PendingTask>,
    max_age: Duration,
    last_sweep: Mutex<Instant>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AGE)
    }
}

impl TaskRegistry {
    pub fn new(max_age: Duration) -> Self {
        Self {
            tasks: DashMap::new(),
            max_age,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Register `callback` under `id`. Returns false, dropping the callback,
    /// if a task for `id` is already pending.
    pub fn register<F>(&self, id: RequestId, callback: F) -> bool
    where
        F: FnOnce(Reply) + Send + Sync + 'static,
    {
        self.register_at(id, callback, Instant::now())
    }

    pub fn register_at<F>(&self, id: RequestId, callback: F, now: Instant) -> bool
    where
        F: FnOnce(Reply) + Send + Sync + 'static,
    {
        match self.tasks.entry(id) {
            Entry::Occupied(occupied) => {
                trace!(id = %occupied.key(), "Task already pending");
                false
            }
            Entry::Vacant(vacant) => {
                vacant.insert(PendingTask {
                    callback: Box::new(callback),
                    registered_at: now,
                });
                true
            }
        }
    }

    /// Remove the task for `id` and hand it `reply`. Returns false if no task
    /// was pending.
    pub fn resolve(&self, id: &RequestId, reply: Reply) -> bool {
        match self.tasks.remove(id) {
            Some((_, task)) => {
                (task.callback)(reply);
                true
            }
            None => false,
        }
    }

    /// Drop the task for `id` without invoking it.
    pub fn cancel(&self, id: &RequestId) -> bool {
        self.tasks.remove(id).is_some()
    }

    /// Remove every task older than the maximum age. Returns how many were
    /// removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.tasks.len();
        self.tasks
            .retain(|_, task| now.saturating_duration_since(task.registered_at) <= self.max_age);
        *lock_or_recover(&self.last_sweep, SOURCE, "sweep") = now;

        let swept = before.saturating_sub(self.tasks.len());
        if swept > 0 {
            counter!(METRIC_TASK_SWEPT).increment(swept as u64);
            debug!(swept, "Swept abandoned tasks");
        }
        swept
    }

    /// Sweep only if a full maximum-age window has passed since the last one.
    pub fn maybe_sweep(&self, now: Instant) -> usize {
        let due = {
            let last = lock_or_recover(&self.last_sweep, SOURCE, "maybe_sweep");
            now.saturating_duration_since(*last) >= self.max_age
        };
        if due { self.sweep(now) } else { 0 }
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    fn id(raw: &str) -> RequestId {
        RequestId::from(raw)
    }

    #[test]
    fn second_registration_is_a_duplicate() {
        let registry = TaskRegistry::default();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = Arc::clone(&calls);
        assert!(registry.register(id("users-1"), move |_| {
            first.fetch_add(1, Ordering::SeqCst);
        }));
        let second = Arc::clone(&calls);
        assert!(!registry.register(id("users-1"), move |_| {
            second.fetch_add(10, Ordering::SeqCst);
        }));

        assert!(registry.resolve(&id("users-1"), Ok(json!(1))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
        assert!(!registry.resolve(&id("users-1"), Ok(json!(2))));
    }

    #[test]
    fn resolve_passes_the_reply_through() {
        let registry = TaskRegistry::default();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        registry.register(id("a-1"), move |reply| {
            *sink.lock().expect("seen lock") = Some(reply);
        });

        let error = RemoteError {
            message: "server responded with status 502".into(),
            kind: FetchErrorKind::Http { status: 502 },
        };
        registry.resolve(&id("a-1"), Err(error.clone()));

        assert_eq!(*seen.lock().expect("seen lock"), Some(Err(error)));
    }

    #[test]
    fn sweep_removes_only_expired_tasks() {
        let registry = TaskRegistry::default();
        let start = Instant::now();
        registry.register_at(id("old"), |_| {}, start);
        registry.register_at(id("young"), |_| {}, start + Duration::from_secs(200));

        let swept = registry.sweep(start + DEFAULT_MAX_AGE + Duration::from_secs(1));

        assert_eq!(swept, 1);
        assert!(!registry.contains(&id("old")));
        assert!(registry.contains(&id("young")));
    }

    #[test]
    fn opportunistic_sweep_is_throttled() {
        let registry = TaskRegistry::new(Duration::from_secs(60));
        let start = Instant::now();
        registry.sweep(start);
        registry.register_at(id("stale"), |_| {}, start);

        assert_eq!(registry.maybe_sweep(start + Duration::from_secs(30)), 0);
        assert_eq!(registry.maybe_sweep(start + Duration::from_secs(61)), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn cancel_drops_without_invoking() {
        let registry = TaskRegistry::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        registry.register(id("gone"), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(registry.cancel(&id("gone")));
        assert!(!registry.resolve(&id("gone"), Ok(json!(null))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
