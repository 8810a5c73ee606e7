//! In-flight operation table.
//!
//! Maps each [`ResourceKey`](crate::resource::ResourceKey) with an operation in
//! flight to the entry that owns the transport handle and the ordered list of
//! subscribers waiting for it. At most one entry, and so at most one transport
//! operation, exists per key at any time.

mod entry;
mod table;

pub use entry::{Callback, Generation, PendingEntry, Subscriber, SubscriberId};
pub use table::{Admission, Attach, Cancel, PendingTable};
