//! Coordinator registry keyed by request id.
//!
//! Each admitted coordinator owns a [`Ticket`]. Destroying a coordinator
//! consumes its ticket, so the same coordinator can never be destroyed twice,
//! and a stale ticket can never remove a newer coordinator registered under the
//! same id.
//!
//! Resting coordinators are destroyed when their id is reused or released.
//! Releasing an in-flight id marks it so the coordinator is destroyed instead
//! of resting once its work is done.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use relaycache_types::RequestId;
use tracing::debug;

use super::keys::CacheKey;
use super::subject::Subscription;

/// Lifecycle phase of a registered coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Registered and subscribed, deciding what to do.
    Subscribed,
    /// Waiting on the network.
    Fetching,
    /// Waiting on, or holding, the subject's write lock.
    Committing,
    /// Finished its work but kept its subscription (replay, inline commit,
    /// or nothing to do). Replaced by the next request reusing the id, or
    /// destroyed when the id is released.
    Resting,
}

impl Phase {
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Subscribed | Self::Fetching | Self::Committing)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Subscribed => "subscribed",
            Self::Fetching => "fetching",
            Self::Committing => "committing",
            Self::Resting => "resting",
        };
        f.write_str(name)
    }
}

struct Slot {
    generation: u64,
    key: CacheKey,
    phase: Phase,
    released: bool,
    subscription: Option<Subscription>,
}

/// Proof of registration held by exactly one coordinator.
#[derive(Debug)]
pub struct Ticket {
    id: RequestId,
    generation: u64,
}

impl Ticket {
    pub fn id(&self) -> &RequestId {
        &self.id
    }
}

/// Outcome of asking the registry to admit a coordinator.
#[derive(Debug)]
pub enum Admission {
    Admitted(Ticket),
    /// A coordinator with this id is still working; the request is dropped.
    Rejected { phase: Phase },
}

#[derive(Default)]
pub struct CoordinatorRegistry {
    entries: DashMap<RequestId, Slot>,
    generations: AtomicU64,
}

impl CoordinatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `id`.
    ///
    /// An in-flight coordinator keeps its slot and the newcomer is rejected.
    /// A resting coordinator is destroyed (its subscription dropped) and
    /// replaced.
    pub fn admit(&self, id: &RequestId, key: &CacheKey) -> Admission {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let fresh = Slot {
            generation,
            key: key.clone(),
            phase: Phase::Subscribed,
            released: false,
            subscription: None,
        };

        let replaced = match self.entries.entry(id.clone()) {
            Entry::Occupied(mut occupied) => {
                let phase = occupied.get().phase;
                if phase.is_in_flight() {
                    return Admission::Rejected { phase };
                }
                Some(std::mem::replace(occupied.get_mut(), fresh))
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                None
            }
        };

        if let Some(old) = replaced {
            debug!(
                id = %id,
                key = %old.key,
                "Replacing resting coordinator"
            );
            drop(old);
        }

        Admission::Admitted(Ticket {
            id: id.clone(),
            generation,
        })
    }

    /// Hand the coordinator's subscription to the registry. It is dropped, and
    /// thereby unsubscribed, when the coordinator is destroyed or replaced.
    pub fn attach(&self, ticket: &Ticket, subscription: Subscription) {
        let leftover = match self.entries.get_mut(&ticket.id) {
            Some(mut entry) if entry.generation == ticket.generation => {
                entry.subscription.replace(subscription)
            }
            _ => Some(subscription),
        };
        drop(leftover);
    }

    pub fn set_phase(&self, ticket: &Ticket, phase: Phase) {
        if let Some(mut entry) = self.entries.get_mut(&ticket.id)
            && entry.generation == ticket.generation
        {
            entry.phase = phase;
        }
    }

    /// Move a finished coordinator to [`Phase::Resting`]. Returns false if its
    /// id was released meanwhile, in which case the caller must destroy it.
    pub fn rest(&self, ticket: &Ticket) -> bool {
        match self.entries.get_mut(&ticket.id) {
            Some(mut entry) if entry.generation == ticket.generation => {
                if entry.released {
                    return false;
                }
                entry.phase = Phase::Resting;
                true
            }
            _ => false,
        }
    }

    /// The caller no longer listens on `id`. A resting coordinator is
    /// destroyed now; an in-flight one is destroyed when it finishes.
    /// Returns true if a coordinator was destroyed immediately.
    pub fn release(&self, id: &RequestId) -> bool {
        let removed = self
            .entries
            .remove_if(id, |_, entry| entry.phase == Phase::Resting);
        if let Some((id, entry)) = removed {
            debug!(id = %id, key = %entry.key, "Released resting coordinator");
            return true;
        }

        if let Some(mut entry) = self.entries.get_mut(id) {
            debug!(id = %id, phase = %entry.phase, "Release deferred until coordinator finishes");
            entry.released = true;
        }
        false
    }

    /// Unsubscribe and deregister the coordinator holding `ticket`.
    pub fn destroy(&self, ticket: Ticket) -> bool {
        let removed = self
            .entries
            .remove_if(&ticket.id, |_, entry| entry.generation == ticket.generation);
        match removed {
            Some((id, entry)) => {
                debug!(id = %id, key = %entry.key, "Coordinator destroyed");
                drop(entry);
                true
            }
            None => false,
        }
    }

    pub fn phase(&self, id: &RequestId) -> Option<Phase> {
        self.entries.get(id).map(|entry| entry.phase)
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
