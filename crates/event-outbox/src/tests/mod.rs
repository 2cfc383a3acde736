//! Scenario tests for the outbound queue.
//!
//! - `harness.rs`    - Mock transport and queue builder
//! - `durability.rs` - Restore across instances, corrupted records, persistence failures
//! - `draining.rs`   - Acceptance, rejection, timeout, single in-flight drain
//! - `beacon.rs`     - Beacon ordering and capability downgrade
//! - `trigger.rs`    - Flush thresholds, capacity rejection, flush registry

pub(crate) mod harness;
