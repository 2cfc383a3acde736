//! Event outbox: durable, batching outbound queue for tracker events.
//!
//! Events are encoded, appended to a FIFO queue, mirrored into a durable
//! key-value record and drained to a remote collector.
//!
//! # Core Invariants
//!
//! 1. **One In-Flight**: at most one drain sequence, and so at most one
//!    network send, per queue at any time
//! 2. **Head-Only Removal**: entries leave only from the head, and only after
//!    the collector accepted exactly that segment
//! 3. **Persist On Change**: every change to the queue rewrites the durable
//!    record (unless persistence is disabled)
//! 4. **Budgeted Batches**: no batch reaches `max_payload_bytes`; an event that
//!    would on its own is dropped at enqueue time
//!
//! # Architecture
//!
//! ```text
//! enqueue -> codec -> queue tail -> store.save -> trigger?
//!                                                   |
//!          collector <- transport <- batcher <- drain loop
//!                           |                       ^
//!                           +--- accepted: pop head +
//! ```

pub mod batcher;
pub mod codec;
pub mod config;
pub mod drain;
pub mod entry;
pub mod error;
pub mod queue;
pub mod registry;
pub mod store;
pub mod transport;
pub mod trigger;

#[cfg(test)]
mod tests;

pub use config::{OutboxConfig, TransportMode};
pub use drain::SendOutcome;
pub use entry::{BatchEntry, BeaconEntry, Entry, EventFields, FieldMap};
pub use error::{OutboxError, OutboxResult};
pub use queue::{EnqueueOutcome, OutboundQueue};
pub use registry::{FlushHook, FlushRegistrar, FlushRegistry, NoopRegistrar};
pub use store::{DecodeError, DurableStore};
pub use transport::{BatchTransport, BeaconTransport, HttpTransport, PayloadEnvelope, Transports};
pub use trigger::TriggerPolicy;
