//! Observable cache cell and the keyed store that owns them.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use metrics::counter;
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tracing::{debug, trace};

use super::equality::deep_equal_opt;
use super::keys::CacheKey;
use super::lock::lock_or_recover;

const SOURCE: &str = "engine::subject";
const METRIC_NOTIFY_SUPPRESSED: &str = "relaycache_notify_suppressed_total";
const METRIC_COMMIT: &str = "relaycache_commit_total";

/// Callback invoked with every new value of a subject. `None` means the value
/// was cleared.
pub type Subscriber = Arc<dyn Fn(Option<&Value>) + Send + Sync>;

type SubscriberId = u64;

struct SubjectState {
    value: Option<Value>,
    subscribers: Vec<(SubscriberId, Subscriber)>,
}

/// One observable cache cell: current value, subscribers, a single-writer
/// commit lock and the resolve-once flag.
pub struct Subject {
    key: CacheKey,
    state: Mutex<SubjectState>,
    writer: AsyncMutex<()>,
    locked: AtomicBool,
    resolve_once: AtomicBool,
    next_subscriber: AtomicU64,
}

impl Subject {
    fn new(key: CacheKey) -> Self {
        Self {
            key,
            state: Mutex::new(SubjectState {
                value: None,
                subscribers: Vec::new(),
            }),
            writer: AsyncMutex::new(()),
            locked: AtomicBool::new(false),
            resolve_once: AtomicBool::new(false),
            next_subscriber: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Snapshot of the current value.
    pub fn value(&self) -> Option<Value> {
        lock_or_recover(&self.state, SOURCE, "value").value.clone()
    }

    pub fn has_value(&self) -> bool {
        lock_or_recover(&self.state, SOURCE, "has_value")
            .value
            .is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        lock_or_recover(&self.state, SOURCE, "subscriber_count")
            .subscribers
            .len()
    }

    /// Register `callback`. Dropping (or calling `unsubscribe` on) the returned
    /// handle removes exactly this registration, even if the same closure was
    /// subscribed more than once.
    pub fn subscribe<F>(self: &Arc<Self>, callback: F) -> Subscription
    where
        F: Fn(Option<&Value>) + Send + Sync + 'static,
    {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        lock_or_recover(&self.state, SOURCE, "subscribe")
            .subscribers
            .push((id, Arc::new(callback)));
        trace!(key = %self.key, subscriber = id, "Subscribed");
        Subscription {
            id,
            subject: Arc::clone(self),
        }
    }

    fn unsubscribe(&self, id: SubscriberId) {
        lock_or_recover(&self.state, SOURCE, "unsubscribe")
            .subscribers
            .retain(|(existing, _)| *existing != id);
        trace!(key = %self.key, subscriber = id, "Unsubscribed");
    }

    /// Publish `value` to every subscriber, in subscription order.
    ///
    /// A value structurally equal to the current one is dropped without
    /// notifying anyone. Returns whether subscribers were notified.
    pub fn next(&self, value: Option<Value>) -> bool {
        let subscribers: Vec<Subscriber> = {
            let mut state = lock_or_recover(&self.state, SOURCE, "next");
            if deep_equal_opt(state.value.as_ref(), value.as_ref()) {
                counter!(METRIC_NOTIFY_SUPPRESSED).increment(1);
                debug!(key = %self.key, "Unchanged value; notification suppressed");
                return false;
            }
            state.value.clone_from(&value);
            state
                .subscribers
                .iter()
                .map(|(_, subscriber)| Arc::clone(subscriber))
                .collect()
        };

        for subscriber in &subscribers {
            subscriber(value.as_ref());
        }
        true
    }

    /// Wait for exclusive write access. Writers queue on an async mutex; the
    /// order in which waiting writers are admitted is not part of the contract.
    pub async fn lock_writes(&self) -> WriteGuard<'_> {
        let permit = self.writer.lock().await;
        let was_locked = self.locked.swap(true, Ordering::AcqRel);
        debug_assert!(!was_locked, "two writers inside one subject");
        WriteGuard {
            subject: self,
            _permit: permit,
        }
    }

    /// `next` under the single-writer lock.
    pub async fn commit(&self, value: Option<Value>) -> bool {
        let guard = self.lock_writes().await;
        self.commit_locked(&guard, value)
    }

    /// `next` for a writer that already holds this subject's write lock.
    pub fn commit_locked(&self, guard: &WriteGuard<'_>, value: Option<Value>) -> bool {
        debug_assert!(std::ptr::eq(guard.subject, self), "guard for another subject");
        counter!(METRIC_COMMIT).increment(1);
        self.next(value)
    }

    /// Clear the value, or replace it with `placeholder`, if one is held.
    pub async fn reset(&self, placeholder: Option<Value>) -> bool {
        let _guard = self.lock_writes().await;
        if !self.has_value() {
            return false;
        }
        debug!(key = %self.key, seeded = placeholder.is_some(), "Resetting subject");
        self.next(placeholder)
    }

    /// True while a writer holds the commit lock.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    pub fn mark_resolve_once(&self) {
        self.resolve_once.store(true, Ordering::Release);
    }

    pub fn resolves_once(&self) -> bool {
        self.resolve_once.load(Ordering::Acquire)
    }
}

/// Exclusive write access to a subject.
pub struct WriteGuard<'a> {
    subject: &'a Subject,
    _permit: AsyncMutexGuard<'a, ()>,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.subject.locked.store(false, Ordering::Release);
    }
}

/// Handle to one subscriber registration.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    id: SubscriberId,
    subject: Arc<Subject>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.subject.unsubscribe(self.id);
    }
}

/// Registry of subjects by key. Subjects are created lazily and live as long
/// as the store; only their subscribers come and go.
#[derive(Default)]
pub struct KeyedStore {
    subjects: DashMap<CacheKey, Arc<Subject>>,
}

impl KeyedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, key: &CacheKey) -> Arc<Subject> {
        if let Some(subject) = self.subjects.get(key) {
            return Arc::clone(subject.value());
        }
        let subject = self
            .subjects
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(key = %key, "Creating subject");
                Arc::new(Subject::new(key.clone()))
            });
        Arc::clone(subject.value())
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<Subject>> {
        self.subjects.get(key).map(|subject| Arc::clone(subject.value()))
    }

    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    fn recorder(subject: &Arc<Subject>) -> (Subscription, Arc<Mutex<Vec<Option<Value>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscription = subject.subscribe(move |value| {
            sink.lock().expect("seen lock").push(value.cloned());
        });
        (subscription, seen)
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let store = KeyedStore::new();
        let key = CacheKey::from("users");
        let first = store.get_or_create(&key);
        let second = store.get_or_create(&key);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.len(), 1);
        assert!(first.value().is_none());
        assert!(!first.is_locked());
        assert!(!first.resolves_once());
        assert_eq!(first.subscriber_count(), 0);
    }

    #[test]
    fn next_notifies_once_per_distinct_value() {
        let store = KeyedStore::new();
        let subject = store.get_or_create(&CacheKey::from("users"));
        let (_subscription, seen) = recorder(&subject);

        assert!(subject.next(Some(json!({"id": 1}))));
        assert!(!subject.next(Some(json!({"id": 1}))));
        assert!(subject.next(Some(json!({"id": 2}))));

        let seen = seen.lock().expect("seen lock");
        assert_eq!(*seen, vec![Some(json!({"id": 1})), Some(json!({"id": 2}))]);
    }

    #[test]
    fn subscribers_run_in_subscription_order() {
        let store = KeyedStore::new();
        let subject = store.get_or_create(&CacheKey::from("order"));
        let log = Arc::new(Mutex::new(Vec::new()));

        let subscriptions: Vec<Subscription> = (0..3)
            .map(|n| {
                let log = Arc::clone(&log);
                subject.subscribe(move |_| log.lock().expect("log lock").push(n))
            })
            .collect();

        subject.next(Some(json!(1)));
        assert_eq!(*log.lock().expect("log lock"), vec![0, 1, 2]);
        drop(subscriptions);
    }

    #[test]
    fn unsubscribe_removes_only_that_registration() {
        let store = KeyedStore::new();
        let subject = store.get_or_create(&CacheKey::from("dup"));
        let hits = Arc::new(AtomicUsize::new(0));
        let callback = {
            let hits = Arc::clone(&hits);
            move |_: Option<&Value>| {
                hits.fetch_add(1, Ordering::SeqCst);
            }
        };

        let first = subject.subscribe(callback.clone());
        let _second = subject.subscribe(callback);
        assert_eq!(subject.subscriber_count(), 2);

        first.unsubscribe();
        assert_eq!(subject.subscriber_count(), 1);

        subject.next(Some(json!(true)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscriber_may_unsubscribe_during_fan_out() {
        let store = KeyedStore::new();
        let subject = store.get_or_create(&CacheKey::from("reentrant"));
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let handle = {
            let slot = Arc::clone(&slot);
            subject.subscribe(move |_| {
                slot.lock().expect("slot lock").take();
            })
        };
        *slot.lock().expect("slot lock") = Some(handle);
        let (_other, seen) = recorder(&subject);

        subject.next(Some(json!(1)));
        assert_eq!(subject.subscriber_count(), 1);
        assert_eq!(seen.lock().expect("seen lock").len(), 1);
    }

    #[tokio::test]
    async fn reset_clears_or_seeds_held_values() {
        let store = KeyedStore::new();
        let subject = store.get_or_create(&CacheKey::from("reset"));

        assert!(!subject.reset(None).await, "nothing to reset yet");

        subject.next(Some(json!([1, 2])));
        assert!(subject.reset(Some(json!([]))).await);
        assert_eq!(subject.value(), Some(json!([])));

        assert!(subject.reset(None).await);
        assert!(subject.value().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn commits_are_mutually_exclusive() {
        let store = Arc::new(KeyedStore::new());
        let subject = store.get_or_create(&CacheKey::from("contended"));
        let inside = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let _subscription = {
            let subject_ref = Arc::clone(&subject);
            let inside = Arc::clone(&inside);
            let overlaps = Arc::clone(&overlaps);
            subject.subscribe(move |_| {
                assert!(subject_ref.is_locked());
                if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                std::thread::sleep(Duration::from_millis(2));
                inside.fetch_sub(1, Ordering::SeqCst);
            })
        };

        let writers: Vec<_> = (0..16)
            .map(|n| {
                let subject = Arc::clone(&subject);
                tokio::spawn(async move { subject.commit(Some(json!(n))).await })
            })
            .collect();

        for writer in writers {
            writer.await.expect("writer task");
        }

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert!(!subject.is_locked());
        assert!(subject.value().is_some());
    }
}
