//! Transport adapter contract.
//!
//! A transport starts one network operation per call to [`Transport::start`]
//! and reports its outcome at most once through the [`Completer`] it was given.
//! Completions may arrive on any thread, including synchronously from inside
//! `start`.

pub mod curl;

use std::fmt;

use crate::pending::Generation;
use crate::resource::{Resource, ResourceKey};
use crate::response::FetchResult;

pub use self::curl::CurlTransport;

/// Opaque id of one operation, issued by the transport that started it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportHandle(u64);

impl TransportHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

type Deliver = Box<dyn FnOnce(ResourceKey, Generation, FetchResult) + Send>;

/// One-shot completion token for a single started operation.
///
/// Consuming `self` in [`Completer::complete`] is what limits each start to one
/// completion. Dropping a completer delivers nothing, which is how aborted
/// operations go quiet.
pub struct Completer {
    key: ResourceKey,
    generation: Generation,
    deliver: Deliver,
}

impl Completer {
    pub fn new<F>(key: ResourceKey, generation: Generation, deliver: F) -> Self
    where
        F: FnOnce(ResourceKey, Generation, FetchResult) + Send + 'static,
    {
        Self {
            key,
            generation,
            deliver: Box::new(deliver),
        }
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn complete(self, result: FetchResult) {
        (self.deliver)(self.key, self.generation, result)
    }
}

impl fmt::Debug for Completer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("key", &self.key)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// A network client the multiplexer drives.
pub trait Transport: Send + Sync {
    /// Begin one operation for `resource`. Must eventually call
    /// `completer.complete` exactly once unless the operation is aborted.
    fn start(&self, resource: &Resource, completer: Completer) -> TransportHandle;

    /// Best-effort abort. The transport may still complete the operation
    /// afterwards, or may never report it.
    fn abort(&self, handle: TransportHandle);
}
