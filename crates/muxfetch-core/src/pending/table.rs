//! Keyed table of pending entries: coalescing, cancellation and completion
//! bookkeeping.
//!
//! The table is plain data. The multiplexer wraps it in a single mutex and
//! every method here is one critical section: a hash lookup plus a vector
//! append or removal. Callbacks leave the table by value so that they are
//! invoked (or dropped) only after the lock is released.

use std::collections::{HashMap, HashSet};

use crate::resource::ResourceKey;
use crate::transport::TransportHandle;

use super::entry::{Callback, Generation, PendingEntry, Subscriber, SubscriberId};

/// Outcome of [`PendingTable::coalesce_or_start`].
pub enum Admission {
    /// Attached to an existing entry; no transport must be started.
    Joined { subscriber: SubscriberId },
    /// A new entry was inserted; the caller must start the transport for it
    /// and report the handle through [`PendingTable::attach_transport`].
    Start {
        subscriber: SubscriberId,
        generation: Generation,
    },
    /// The table was shut down. The callback is handed back to be dropped.
    Closed {
        subscriber: SubscriberId,
        callback: Callback,
    },
}

/// Outcome of [`PendingTable::attach_transport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attach {
    /// Handle stored on the live entry.
    Attached,
    /// The entry lost its last subscriber (or the table shut down) while the
    /// transport was starting. The caller must abort the handle.
    Orphaned,
    /// The operation already completed and fanned out.
    Finished,
}

/// Outcome of [`PendingTable::cancel`].
pub enum Cancel {
    /// Unknown, completed or already cancelled subscriber.
    NotRegistered,
    /// Removed; other subscribers remain on the entry.
    Detached { callback: Callback },
    /// Removed the last subscriber and with it the entry. Abort `transport`
    /// if set; if `None` the starter will see [`Attach::Orphaned`].
    Emptied {
        callback: Callback,
        transport: Option<TransportHandle>,
    },
}

#[derive(Debug, Default)]
pub struct PendingTable {
    entries: HashMap<ResourceKey, PendingEntry>,
    /// Generations removed by cancellation or shutdown before their handle
    /// was attached.
    orphaned: HashSet<Generation>,
    next_generation: u64,
    next_subscriber: u64,
    closed: bool,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn issue_subscriber(&mut self) -> SubscriberId {
        self.next_subscriber += 1;
        SubscriberId(self.next_subscriber)
    }

    fn issue_generation(&mut self) -> Generation {
        self.next_generation += 1;
        Generation(self.next_generation)
    }

    /// Join the entry for `key`, or create one and ask the caller to start a
    /// transport. Two callers can never both receive `Start` for a live key.
    pub fn coalesce_or_start(&mut self, key: &ResourceKey, callback: Callback) -> Admission {
        let subscriber = self.issue_subscriber();
        if self.closed {
            return Admission::Closed {
                subscriber,
                callback,
            };
        }

        if let Some(entry) = self.entries.get_mut(key) {
            entry.subscribers.push(Subscriber {
                id: subscriber,
                callback,
            });
            return Admission::Joined { subscriber };
        }

        let generation = self.issue_generation();
        let first = Subscriber {
            id: subscriber,
            callback,
        };
        self.entries
            .insert(key.clone(), PendingEntry::new(generation, first));
        Admission::Start {
            subscriber,
            generation,
        }
    }

    /// Record the handle returned by `Transport::start` for `generation`.
    pub fn attach_transport(
        &mut self,
        key: &ResourceKey,
        generation: Generation,
        handle: TransportHandle,
    ) -> Attach {
        if let Some(entry) = self.entries.get_mut(key) {
            if entry.generation == generation {
                entry.transport = Some(handle);
                return Attach::Attached;
            }
        }
        if self.orphaned.remove(&generation) {
            Attach::Orphaned
        } else {
            Attach::Finished
        }
    }

    /// Unregister one subscriber. Removes the entry when it was the last one.
    pub fn cancel(&mut self, key: &ResourceKey, subscriber: SubscriberId) -> Cancel {
        let Some(entry) = self.entries.get_mut(key) else {
            return Cancel::NotRegistered;
        };
        let Some(pos) = entry.subscribers.iter().position(|s| s.id == subscriber) else {
            return Cancel::NotRegistered;
        };
        let removed = entry.subscribers.remove(pos);
        if !entry.subscribers.is_empty() {
            return Cancel::Detached {
                callback: removed.callback,
            };
        }

        let transport = entry.transport;
        let generation = entry.generation;
        self.entries.remove(key);
        if transport.is_none() {
            self.orphaned.insert(generation);
        }
        Cancel::Emptied {
            callback: removed.callback,
            transport,
        }
    }

    /// Remove and return the entry for `key` if it belongs to `generation`.
    /// A mismatch or a missing entry means the completion is stale.
    pub fn take_for_completion(
        &mut self,
        key: &ResourceKey,
        generation: Generation,
    ) -> Option<PendingEntry> {
        let live = self
            .entries
            .get(key)
            .is_some_and(|e| e.generation == generation);
        if live {
            return self.entries.remove(key);
        }
        // Completed while still starting after its last cancel: the starter
        // no longer needs to abort it.
        self.orphaned.remove(&generation);
        None
    }

    /// Remove every entry and refuse further admissions.
    pub fn drain(&mut self) -> Vec<PendingEntry> {
        self.closed = true;
        let drained: Vec<PendingEntry> = self.entries.drain().map(|(_, e)| e).collect();
        for entry in &drained {
            if entry.transport.is_none() {
                self.orphaned.insert(entry.generation);
            }
        }
        drained
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of keys with an operation in flight.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Subscribers currently waiting on `key` (0 if none).
    pub fn subscriber_count(&self, key: &ResourceKey) -> usize {
        self.entries
            .get(key)
            .map(|e| e.subscribers.len())
            .unwrap_or(0)
    }

    #[cfg(test)]
    pub(crate) fn get(&self, key: &ResourceKey) -> Option<&PendingEntry> {
        self.entries.get(key)
    }
}
