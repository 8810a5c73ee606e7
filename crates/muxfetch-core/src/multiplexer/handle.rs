//! Caller-facing token for one logical request.

use std::sync::Weak;

use crate::pending::SubscriberId;
use crate::resource::ResourceKey;

use super::Shared;

/// One logical request registered with a [`RequestMultiplexer`](super::RequestMultiplexer).
///
/// Dropping the handle cancels the request. Use [`RequestHandle::detach`] to
/// let it run to completion without keeping the handle around.
#[derive(Debug)]
pub struct RequestHandle {
    key: ResourceKey,
    subscriber: SubscriberId,
    engine: Weak<Shared>,
    detached: bool,
}

impl RequestHandle {
    pub(super) fn new(key: ResourceKey, subscriber: SubscriberId, engine: Weak<Shared>) -> Self {
        Self {
            key,
            subscriber,
            engine,
            detached: false,
        }
    }

    /// Key the request is registered under.
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Withdraw interest. A no-op if the request already completed, was
    /// already cancelled, or the engine is gone. Once this returns the
    /// callback will not be invoked, unless fan-out had already taken it.
    pub fn cancel(&self) {
        if let Some(engine) = self.engine.upgrade() {
            engine.cancel(&self.key, self.subscriber);
        }
    }

    /// Give up the handle without cancelling.
    pub fn detach(mut self) {
        self.detached = true;
    }
}

impl Drop for RequestHandle {
    fn drop(&mut self) {
        if !self.detached {
            self.cancel();
        }
    }
}
