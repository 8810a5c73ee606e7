pub mod config;
pub mod logging;

pub mod multiplexer;
pub mod pending;
pub mod resource;
pub mod response;
pub mod transport;

pub use multiplexer::{MuxStats, RequestHandle, RequestMultiplexer};
pub use resource::{Resource, ResourceKey, ResourceKind};
pub use response::{FetchError, FetchResult, Response};
pub use transport::{Completer, CurlTransport, Transport, TransportHandle};
