//! Per-key record of one in-flight transport operation.

use std::fmt;

use crate::response::FetchResult;
use crate::transport::TransportHandle;

/// Completion callback of one subscriber.
pub type Callback = Box<dyn FnOnce(FetchResult) + Send + 'static>;

/// Token issued when an entry is created. Never reused, so a completion that
/// carries an old generation cannot be attributed to a newer entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(pub(super) u64);

impl Generation {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen#{}", self.0)
    }
}

/// Identity of one logical request inside the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub(super) u64);

/// One subscriber waiting on an entry.
pub struct Subscriber {
    pub id: SubscriberId,
    pub callback: Callback,
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber").field("id", &self.id).finish()
    }
}

/// The unique owner of one transport operation and its subscribers.
///
/// `transport` is `None` only between the insert that created the entry and
/// the return of `Transport::start`. While the entry is in the table,
/// `subscribers` is never empty.
#[derive(Debug)]
pub struct PendingEntry {
    pub generation: Generation,
    pub transport: Option<TransportHandle>,
    /// In registration order.
    pub subscribers: Vec<Subscriber>,
}

impl PendingEntry {
    pub(super) fn new(generation: Generation, first: Subscriber) -> Self {
        Self {
            generation,
            transport: None,
            subscribers: vec![first],
        }
    }
}
