//! The drain state machine.
//!
//! A drain sequence repeats three steps until one of them says stop:
//!
//! ```text
//! plan ──► dispatch ──► reconcile ──┐
//!  ▲        (await)                 │ accepted: head removed, persisted
//!  └────────────────────────────────┘
//! ```
//!
//! `plan` and `reconcile` run under the queue lock and never await;
//! `dispatch` runs without it, so enqueues keep landing at the tail while a
//! send is in flight. Entries only ever leave from the head, and only the
//! segment the transport accepted.

use crate::batcher;
use crate::config::{TransportMode, BEACON_PATH};
use crate::entry::Entry;
use crate::store::DurableStore;
use crate::transport::{BatchTransport, BeaconTransport, PayloadEnvelope, Transports};
use reqwest::StatusCode;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Mutable queue state, guarded by the queue lock.
#[derive(Debug, Default)]
pub(crate) struct QueueState {
    pub entries: VecDeque<Entry>,
    /// Set while a drain sequence owns the head of the queue.
    pub draining: bool,
    pub collector_url: Option<String>,
}

/// One planned submission.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Outgoing {
    Batch {
        url: String,
        envelope: PayloadEnvelope,
    },
    Beacon {
        url: String,
    },
}

impl Outgoing {
    /// Number of head entries this submission covers.
    pub fn count(&self) -> usize {
        match self {
            Outgoing::Batch { envelope, .. } => envelope.data.len(),
            Outgoing::Beacon { .. } => 1,
        }
    }
}

/// How one submission ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Collector took the events (HTTP 2xx/3xx, or beacon load).
    Accepted,
    /// Collector answered with a non-accepting status.
    Rejected(StatusCode),
    /// No answer within the request timeout; the request was abandoned.
    TimedOut,
    /// The transport itself failed.
    Failed(String),
}

/// Whether a batch response status counts as delivery.
pub fn is_accepted(status: StatusCode) -> bool {
    (200..400).contains(&status.as_u16())
}

/// Write the queue back if a store is configured. No store counts as success.
pub(crate) fn persist(store: Option<&DurableStore>, entries: &VecDeque<Entry>) -> bool {
    store.map_or(true, |store| store.save(entries))
}

pub(crate) struct DrainEngine {
    mode: TransportMode,
    max_payload_bytes: usize,
    request_timeout: Duration,
    post_path: String,
    batch: Option<Arc<dyn BatchTransport>>,
    beacon: Arc<dyn BeaconTransport>,
}

impl DrainEngine {
    pub fn new(
        mode: TransportMode,
        max_payload_bytes: usize,
        request_timeout: Duration,
        post_path: String,
        transports: Transports,
    ) -> Self {
        Self {
            mode,
            max_payload_bytes,
            request_timeout,
            post_path,
            batch: transports.batch,
            beacon: transports.beacon,
        }
    }

    pub fn max_payload_bytes(&self) -> usize {
        self.max_payload_bytes
    }

    /// Prepare the next submission, or `None` when the sequence should end.
    pub fn plan(&self, state: &mut QueueState, store: Option<&DurableStore>) -> Option<Outgoing> {
        self.scrub_head(state, store);

        let base = state.collector_url.as_deref()?;
        let count = batcher::select(&state.entries, self.mode, self.max_payload_bytes);
        if count == 0 {
            if !state.entries.is_empty() {
                warn!(
                    max_payload_bytes = self.max_payload_bytes,
                    "Head entry does not fit the payload budget, not sending"
                );
            }
            return None;
        }

        match self.mode {
            TransportMode::Batch => {
                let data = state
                    .entries
                    .iter()
                    .take(count)
                    .filter_map(Entry::as_batch)
                    .map(|entry| entry.fields().clone())
                    .collect();
                Some(Outgoing::Batch {
                    url: format!("{}{}", base, self.post_path),
                    envelope: PayloadEnvelope::new(data),
                })
            }
            TransportMode::Beacon => {
                let head = state.entries.front().and_then(Entry::as_beacon)?;
                Some(Outgoing::Beacon {
                    url: format!("{}{}{}", base, BEACON_PATH, head.query()),
                })
            }
        }
    }

    /// Send one planned submission.
    pub async fn dispatch(&self, outgoing: &Outgoing) -> SendOutcome {
        match outgoing {
            Outgoing::Batch { url, envelope } => {
                let Some(transport) = &self.batch else {
                    return SendOutcome::Failed("no batch transport configured".to_string());
                };
                match tokio::time::timeout(self.request_timeout, transport.post_batch(url, envelope))
                    .await
                {
                    Err(_) => SendOutcome::TimedOut,
                    Ok(Ok(status)) if is_accepted(status) => SendOutcome::Accepted,
                    Ok(Ok(status)) => SendOutcome::Rejected(status),
                    Ok(Err(e)) => SendOutcome::Failed(e.to_string()),
                }
            }
            Outgoing::Beacon { url } => match self.beacon.send_beacon(url).await {
                Ok(()) => SendOutcome::Accepted,
                Err(e) => SendOutcome::Failed(e.to_string()),
            },
        }
    }

    /// Apply an outcome to the queue. Returns whether to keep draining.
    pub fn reconcile(
        &self,
        state: &mut QueueState,
        outgoing: &Outgoing,
        outcome: &SendOutcome,
        store: Option<&DurableStore>,
    ) -> bool {
        let count = outgoing.count();
        match outcome {
            SendOutcome::Accepted => {
                let removed = count.min(state.entries.len());
                state.entries.drain(..removed);
                let persisted = persist(store, &state.entries);
                info!(
                    mode = %self.mode,
                    sent = removed,
                    remaining = state.entries.len(),
                    persisted = persisted,
                    "Collector accepted events"
                );
                true
            }
            SendOutcome::Rejected(status) => {
                warn!(
                    mode = %self.mode,
                    status = status.as_u16(),
                    count = count,
                    "Collector rejected events, keeping them queued"
                );
                false
            }
            SendOutcome::TimedOut => {
                warn!(
                    mode = %self.mode,
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    count = count,
                    "Collector request timed out, keeping events queued"
                );
                false
            }
            SendOutcome::Failed(reason) => {
                error!(
                    mode = %self.mode,
                    error = %reason,
                    count = count,
                    "Transport failed, keeping events queued"
                );
                false
            }
        }
    }

    /// Drop leading entries that could not be decoded.
    fn scrub_head(&self, state: &mut QueueState, store: Option<&DurableStore>) {
        let mut scrubbed = 0;
        while state
            .entries
            .front()
            .is_some_and(|entry| !entry.is_recognized())
        {
            if let Some(Entry::Unrecognized(raw)) = state.entries.pop_front() {
                debug!(entry = %raw, "Discarding unrecognized queue entry");
            }
            scrubbed += 1;
        }

        if scrubbed > 0 {
            warn!(count = scrubbed, "Discarded unrecognized entries from queue head");
            persist(store, &state.entries);
        }
    }
}
