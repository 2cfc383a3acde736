//! The outbound queue.
//!
//! Owns the buffered entries for one `{product, namespace, mode}` identity,
//! keeps them in sync with the durable store and runs at most one drain
//! sequence at a time.

use crate::codec;
use crate::config::{OutboxConfig, TransportMode};
use crate::drain::{persist, DrainEngine, QueueState};
use crate::entry::{Entry, EventFields};
use crate::registry::{FlushHook, FlushRegistrar};
use crate::store::DurableStore;
use crate::transport::Transports;
use crate::trigger::TriggerPolicy;
use crate::{OutboxError, OutboxResult};
use outbox_storage::{KeyValueStore, StorageKeys};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Result of handing one event to the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Appended to the tail.
    Queued {
        queue_len: usize,
        /// Whether the durable record was updated (true when persistence is
        /// disabled).
        persisted: bool,
        /// Whether this enqueue started a drain sequence.
        drain_started: bool,
    },
    /// Dropped because it alone meets the payload budget.
    Oversized {
        size_bytes: usize,
        max_payload_bytes: usize,
    },
}

struct Shared {
    name: String,
    mode: TransportMode,
    engine: DrainEngine,
    policy: TriggerPolicy,
    store: Option<DurableStore>,
    state: Mutex<QueueState>,
    draining_tx: watch::Sender<bool>,
}

/// Durable, batching outbound queue.
///
/// Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct OutboundQueue {
    shared: Arc<Shared>,
}

impl OutboundQueue {
    /// Build a queue, restore any entries left by a previous run and register
    /// its flush hook with `registrar`.
    ///
    /// `storage` is only used when `config.use_durable_store` is set. A batch
    /// preference without a batch transport runs the queue in beacon mode.
    pub fn new(
        config: &OutboxConfig,
        storage: Option<Arc<dyn KeyValueStore>>,
        transports: Transports,
        registrar: &dyn FlushRegistrar,
    ) -> Self {
        let mode = match (config.transport_mode, transports.batch.is_some()) {
            (TransportMode::Batch, false) => {
                info!(
                    namespace = %config.namespace,
                    "No batch transport available, falling back to beacon mode"
                );
                TransportMode::Beacon
            }
            (mode, _) => mode,
        };

        let store = match (config.use_durable_store, storage) {
            (true, Some(backend)) => Some(DurableStore::new(
                backend,
                &config.product,
                &config.namespace,
                mode,
                config.max_persisted_entries,
            )),
            (true, None) => {
                warn!(
                    namespace = %config.namespace,
                    "Durable store requested but no storage backend given, queue is in-memory only"
                );
                None
            }
            (false, _) => None,
        };

        let entries = store.as_ref().map(restore).unwrap_or_default();

        let policy = TriggerPolicy::new(
            mode,
            config.max_payload_bytes,
            config.flush_threshold,
            store.is_some(),
        );
        if policy.flush_threshold() != config.flush_threshold {
            debug!(
                requested = config.flush_threshold,
                effective = policy.flush_threshold(),
                "Flush threshold clamped"
            );
        }

        let engine = DrainEngine::new(
            mode,
            config.max_payload_bytes,
            config.request_timeout(),
            config.post_path.clone(),
            transports,
        );

        let name = StorageKeys::queue(&config.product, &config.namespace, mode.storage_suffix());
        let (draining_tx, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            name: name.clone(),
            mode,
            engine,
            policy,
            store,
            state: Mutex::new(QueueState {
                entries,
                draining: false,
                collector_url: None,
            }),
            draining_tx,
        });

        registrar.register(name, flush_hook(&shared));

        Self { shared }
    }

    /// Encode and buffer one event, starting a drain when the trigger policy
    /// says so.
    ///
    /// `collector_url` is the collector base URL; it is retained for later
    /// drains. Only a URL that does not parse is an error.
    pub async fn enqueue(
        &self,
        fields: &EventFields,
        collector_url: &str,
    ) -> OutboxResult<EnqueueOutcome> {
        let collector_url = normalize_collector_url(collector_url)?;
        let shared = &self.shared;

        let entry = codec::encode(fields, shared.mode);
        if let Some(size_bytes) = shared.policy.oversized(&entry) {
            let max_payload_bytes = shared.engine.max_payload_bytes();
            warn!(
                queue = %shared.name,
                size_bytes = size_bytes,
                max_payload_bytes = max_payload_bytes,
                "Event exceeds the payload budget, dropping it"
            );
            return Ok(EnqueueOutcome::Oversized {
                size_bytes,
                max_payload_bytes,
            });
        }

        let (queue_len, persisted, drain_started) = {
            let mut state = shared.state.lock().await;
            state.entries.push_back(entry);
            state.collector_url = Some(collector_url);

            let persisted = persist(shared.store.as_ref(), &state.entries);
            let queue_len = state.entries.len();
            let drain_started =
                shared
                    .policy
                    .should_drain_after_enqueue(state.draining, persisted, queue_len);
            if drain_started {
                shared.mark_draining(&mut state);
            }
            (queue_len, persisted, drain_started)
        };

        debug!(
            queue = %shared.name,
            queue_len = queue_len,
            persisted = persisted,
            drain_started = drain_started,
            "Event queued"
        );

        if drain_started {
            shared.spawn_drain();
        }

        Ok(EnqueueOutcome::Queued {
            queue_len,
            persisted,
            drain_started,
        })
    }

    /// Set the collector base URL without enqueueing, so entries restored
    /// from a previous run can drain before the next event arrives.
    pub async fn set_collector_url(&self, collector_url: &str) -> OutboxResult<()> {
        let collector_url = normalize_collector_url(collector_url)?;
        self.shared.state.lock().await.collector_url = Some(collector_url);
        Ok(())
    }

    /// Start a drain unless one is already running.
    ///
    /// Returns whether a new drain sequence started. Errors only when entries
    /// are waiting and no collector URL was ever supplied.
    pub async fn drain_now(&self) -> OutboxResult<bool> {
        self.shared.flush().await
    }

    /// Wait until no drain sequence is running.
    pub async fn wait_idle(&self) {
        let mut rx = self.shared.draining_tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|draining| !*draining).await;
    }

    pub async fn len(&self) -> usize {
        self.shared.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.shared.state.lock().await.entries.is_empty()
    }

    /// Copy of the buffered entries, head first.
    pub async fn snapshot(&self) -> Vec<Entry> {
        self.shared.state.lock().await.entries.iter().cloned().collect()
    }

    /// Collector base URL retained from the last enqueue.
    pub async fn collector_url(&self) -> Option<String> {
        self.shared.state.lock().await.collector_url.clone()
    }

    pub fn is_draining(&self) -> bool {
        *self.shared.draining_tx.borrow()
    }

    /// Effective mode after capability downgrade.
    pub fn transport_mode(&self) -> TransportMode {
        self.shared.mode
    }

    /// Effective flush threshold after clamping.
    pub fn flush_threshold(&self) -> usize {
        self.shared.policy.flush_threshold()
    }

    /// Name the flush hook was registered under; equals the storage key.
    pub fn name(&self) -> &str {
        &self.shared.name
    }
}

impl Shared {
    async fn flush(self: &Arc<Self>) -> OutboxResult<bool> {
        {
            let mut state = self.state.lock().await;
            if !self.policy.should_drain_on_flush(state.draining) || state.entries.is_empty() {
                return Ok(false);
            }
            if state.collector_url.is_none() {
                return Err(OutboxError::Config(format!(
                    "no collector URL configured for queue {}",
                    self.name
                )));
            }
            self.mark_draining(&mut state);
        }

        self.spawn_drain();
        Ok(true)
    }

    fn mark_draining(&self, state: &mut QueueState) {
        state.draining = true;
        self.draining_tx.send_replace(true);
    }

    fn finish(&self, state: &mut QueueState) {
        state.draining = false;
        self.draining_tx.send_replace(false);
    }

    fn spawn_drain(self: &Arc<Self>) {
        let shared = self.clone();
        tokio::spawn(async move { shared.run_drain().await });
    }

    /// One drain sequence. The lock is released while a send is in flight.
    async fn run_drain(&self) {
        debug!(queue = %self.name, "Drain started");
        loop {
            let outgoing = {
                let mut state = self.state.lock().await;
                match self.engine.plan(&mut state, self.store.as_ref()) {
                    Some(outgoing) => outgoing,
                    None => {
                        self.finish(&mut state);
                        break;
                    }
                }
            };

            let outcome = self.engine.dispatch(&outgoing).await;

            let mut state = self.state.lock().await;
            if !self
                .engine
                .reconcile(&mut state, &outgoing, &outcome, self.store.as_ref())
            {
                self.finish(&mut state);
                break;
            }
        }
        debug!(queue = %self.name, "Drain finished");
    }
}

fn restore(store: &DurableStore) -> VecDeque<Entry> {
    match store.load() {
        Ok(entries) => {
            if !entries.is_empty() {
                info!(key = %store.key(), count = entries.len(), "Restored queued events");
            }
            entries
        }
        Err(e) => {
            warn!(key = %store.key(), error = %e, "Discarding unreadable queue record");
            VecDeque::new()
        }
    }
}

fn flush_hook(shared: &Arc<Shared>) -> FlushHook {
    let weak = Arc::downgrade(shared);
    Arc::new(move || -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let weak = weak.clone();
        Box::pin(async move {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if let Err(e) = shared.flush().await {
                warn!(queue = %shared.name, error = %e, "Scheduled flush failed");
            }
        })
    })
}

/// Validate a collector base URL and strip its trailing slash.
fn normalize_collector_url(raw: &str) -> OutboxResult<String> {
    url::Url::parse(raw)
        .map_err(|e| OutboxError::Config(format!("invalid collector URL {:?}: {}", raw, e)))?;
    Ok(raw.trim_end_matches('/').to_string())
}
