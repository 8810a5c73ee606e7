//! Request multiplexer: coalesces requests for the same resource onto one
//! transport operation and fans the result out to every subscriber.
//!
//! All shared state lives in one [`PendingTable`] behind one mutex. The lock is
//! never held across a transport call or a subscriber callback, so callbacks
//! may re-enter `request`/`cancel` and transports may complete synchronously
//! from inside `start`.

mod handle;
mod stats;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::config::MuxConfig;
use crate::pending::{Admission, Attach, Callback, Cancel, Generation, PendingTable, SubscriberId};
use crate::resource::{Resource, ResourceKey};
use crate::response::FetchResult;
use crate::transport::{Completer, CurlTransport, Transport};

pub use handle::RequestHandle;
pub use stats::MuxStats;

use stats::Counters;

pub(crate) struct Shared {
    table: Mutex<PendingTable>,
    transport: Arc<dyn Transport>,
    counters: Counters,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared").finish_non_exhaustive()
    }
}

impl Shared {
    fn table(&self) -> MutexGuard<'_, PendingTable> {
        // Every table method leaves the table consistent, so a panic elsewhere
        // while holding the lock cannot leave it half-updated.
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn request(this: &Arc<Self>, resource: &Resource, callback: Callback) -> RequestHandle {
        let key = resource.key();
        Counters::bump(&this.counters.requests);

        let admission = this.table().coalesce_or_start(&key, callback);
        let subscriber = match admission {
            Admission::Joined { subscriber } => {
                Counters::bump(&this.counters.coalesced);
                debug!(key = %key, "joined in-flight request");
                subscriber
            }
            Admission::Closed {
                subscriber,
                callback,
            } => {
                debug!(key = %key, "request after shutdown; it will never complete");
                drop(callback);
                subscriber
            }
            Admission::Start {
                subscriber,
                generation,
            } => {
                Self::start_transport(this, resource, &key, generation);
                subscriber
            }
        };

        RequestHandle::new(key, subscriber, Arc::downgrade(this))
    }

    fn start_transport(this: &Arc<Self>, resource: &Resource, key: &ResourceKey, generation: Generation) {
        Counters::bump(&this.counters.transports_started);

        let engine = Arc::downgrade(this);
        let completer = Completer::new(key.clone(), generation, move |key, generation, result| {
            match engine.upgrade() {
                Some(engine) => engine.on_transport_completion(&key, generation, result),
                None => trace!(key = %key, %generation, "completion after engine dropped"),
            }
        });

        let handle = this.transport.start(resource, completer);
        debug!(key = %key, %generation, op = %handle, kind = ?resource.kind, "started transport");

        let attach = this.table().attach_transport(key, generation, handle);
        if attach == Attach::Orphaned {
            debug!(key = %key, op = %handle, "cancelled while starting; aborting");
            Counters::bump(&this.counters.aborts);
            this.transport.abort(handle);
        }
    }

    fn cancel(&self, key: &ResourceKey, subscriber: SubscriberId) {
        let outcome = self.table().cancel(key, subscriber);
        match outcome {
            Cancel::NotRegistered => {
                trace!(key = %key, "cancel of unregistered request ignored");
            }
            Cancel::Detached { callback } => {
                Counters::bump(&self.counters.cancellations);
                drop(callback);
            }
            Cancel::Emptied {
                callback,
                transport,
            } => {
                Counters::bump(&self.counters.cancellations);
                drop(callback);
                if let Some(handle) = transport {
                    debug!(key = %key, op = %handle, "last subscriber cancelled; aborting");
                    Counters::bump(&self.counters.aborts);
                    self.transport.abort(handle);
                }
            }
        }
    }

    fn on_transport_completion(&self, key: &ResourceKey, generation: Generation, result: FetchResult) {
        let entry = self.table().take_for_completion(key, generation);
        let Some(entry) = entry else {
            Counters::bump(&self.counters.stale_completions);
            trace!(key = %key, %generation, "discarding stale completion");
            return;
        };

        Counters::bump(&self.counters.completions);
        debug!(
            key = %key,
            %generation,
            subscribers = entry.subscribers.len(),
            ok = result.is_ok(),
            "fan-out"
        );
        for subscriber in entry.subscribers {
            (subscriber.callback)(result.clone());
        }
    }

    fn shutdown(&self) {
        let drained = self.table().drain();
        if !drained.is_empty() {
            debug!(entries = drained.len(), "shutting down with requests in flight");
        }
        for entry in drained {
            if let Some(handle) = entry.transport {
                Counters::bump(&self.counters.aborts);
                self.transport.abort(handle);
            }
        }
    }
}

/// Coalescing front end over a [`Transport`].
///
/// Share it behind an `Arc` when several threads issue requests. Dropping the
/// multiplexer shuts it down.
#[derive(Debug)]
pub struct RequestMultiplexer {
    shared: Arc<Shared>,
}

impl RequestMultiplexer {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            shared: Arc::new(Shared {
                table: Mutex::new(PendingTable::new()),
                transport,
                counters: Counters::default(),
            }),
        }
    }

    /// Multiplexer over a [`CurlTransport`] built from `config`.
    pub fn with_curl(config: &MuxConfig) -> Result<Self> {
        let transport = CurlTransport::spawn(config.max_concurrent_requests, &config.transport)?;
        Ok(Self::new(Arc::new(transport)))
    }

    /// Register interest in `resource`. Never fails. `callback` runs exactly
    /// once on the transport's delivery thread, unless the returned handle is
    /// cancelled (or dropped) first or the multiplexer shuts down.
    pub fn request<F>(&self, resource: &Resource, callback: F) -> RequestHandle
    where
        F: FnOnce(FetchResult) + Send + 'static,
    {
        Shared::request(&self.shared, resource, Box::new(callback))
    }

    /// Like [`request`](Self::request), delivering through a oneshot channel.
    /// The receiver errors if the request is cancelled or the engine shuts down.
    pub fn fetch(&self, resource: &Resource) -> (RequestHandle, oneshot::Receiver<FetchResult>) {
        let (tx, rx) = oneshot::channel();
        let handle = self.request(resource, move |result| {
            let _ = tx.send(result);
        });
        (handle, rx)
    }

    /// Same as [`RequestHandle::cancel`].
    pub fn cancel(&self, handle: &RequestHandle) {
        handle.cancel();
    }

    /// Abort every in-flight operation and drop all pending callbacks without
    /// invoking them. Later requests are accepted but never complete.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }

    pub fn stats(&self) -> MuxStats {
        let in_flight = self.shared.table().len();
        self.shared.counters.snapshot(in_flight)
    }

    /// Subscribers currently waiting on `resource`'s key.
    pub fn subscriber_count(&self, resource: &Resource) -> usize {
        self.shared.table().subscriber_count(&resource.key())
    }
}

impl Drop for RequestMultiplexer {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

#[cfg(test)]
mod tests;
