//! When to start draining.

use crate::config::TransportMode;
use crate::entry::Entry;

/// Decides, per enqueue and per external flush, whether a drain starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerPolicy {
    mode: TransportMode,
    max_payload_bytes: usize,
    flush_threshold: usize,
}

impl TriggerPolicy {
    /// Buffering beyond one entry is only safe when the queue survives a
    /// restart and batches are possible, so the requested threshold is
    /// clamped to 1 otherwise.
    pub fn new(
        mode: TransportMode,
        max_payload_bytes: usize,
        requested_threshold: usize,
        durable_store_active: bool,
    ) -> Self {
        let flush_threshold = if durable_store_active && mode == TransportMode::Batch {
            requested_threshold.max(1)
        } else {
            1
        };
        Self {
            mode,
            max_payload_bytes,
            flush_threshold,
        }
    }

    pub fn flush_threshold(&self) -> usize {
        self.flush_threshold
    }

    /// Size of `entry` when it can never fit in a batch on its own.
    pub fn oversized(&self, entry: &Entry) -> Option<usize> {
        match (self.mode, entry) {
            (TransportMode::Batch, Entry::Batch(batch))
                if batch.size_bytes() >= self.max_payload_bytes =>
            {
                Some(batch.size_bytes())
            }
            _ => None,
        }
    }

    /// After appending: drain when idle and either the entry could not be
    /// persisted or enough entries have accumulated.
    pub fn should_drain_after_enqueue(&self, draining: bool, persisted: bool, queue_len: usize) -> bool {
        !draining && (!persisted || queue_len >= self.flush_threshold)
    }

    /// External flush signals drain whenever idle.
    pub fn should_drain_on_flush(&self, draining: bool) -> bool {
        !draining
    }
}
