//! Test harness for outbound queue scenarios.
//!
//! Provides:
//! - MockTransport: scripted batch and beacon channels that record every send
//! - TestHarness: builds queues over shared in-memory storage and a registry

use crate::config::{OutboxConfig, TransportMode};
use crate::entry::{EventFields, FieldMap};
use crate::queue::OutboundQueue;
use crate::registry::FlushRegistry;
use crate::transport::{BatchTransport, BeaconTransport, PayloadEnvelope, Transports};
use crate::{OutboxError, OutboxResult};
use async_trait::async_trait;
use outbox_storage::MemoryStorage;
use reqwest::StatusCode;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub const COLLECTOR: &str = "https://collector.test";

/// What the mock answers to one request.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub enum MockResponse {
    /// Respond with this HTTP status
    Status(u16),
    /// Fail at the transport level
    Fail,
    /// Never respond
    Hang,
    /// Wait for the notify, then respond with this status
    Gate(Arc<Notify>, u16),
}

/// A request the mock received.
#[derive(Debug, Clone, PartialEq)]
pub enum SentRequest {
    Batch { url: String, data: Vec<FieldMap> },
    Beacon { url: String },
}

impl SentRequest {
    /// Event ids carried by this request, in order.
    pub fn event_ids(&self) -> Vec<String> {
        match self {
            SentRequest::Batch { data, .. } => data
                .iter()
                .filter_map(|fields| fields.get("eid").cloned())
                .collect(),
            SentRequest::Beacon { url } => url
                .split(|c| c == '?' || c == '&')
                .filter_map(|pair| pair.strip_prefix("eid="))
                .map(str::to_string)
                .collect(),
        }
    }
}

/// Scripted transport implementing both channels.
pub struct MockTransport {
    sent: Mutex<Vec<SentRequest>>,
    responses: Mutex<VecDeque<MockResponse>>,
    default_response: Mutex<MockResponse>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
            default_response: Mutex::new(MockResponse::Status(200)),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn set_default_response(&self, response: MockResponse) {
        *self.default_response.lock().unwrap() = response;
    }

    /// Queue a response for the next request.
    pub fn queue_response(&self, response: MockResponse) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn sent(&self) -> Vec<SentRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Event ids across all requests, in send order.
    pub fn sent_event_ids(&self) -> Vec<String> {
        self.sent().iter().flat_map(SentRequest::event_ids).collect()
    }

    /// Highest number of requests ever outstanding at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` requests have arrived.
    pub async fn wait_for_requests(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while self.sent_count() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("requests never arrived");
    }

    fn next_response(&self) -> MockResponse {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_response.lock().unwrap().clone())
    }

    /// Record `request`, then play out the scripted response.
    async fn respond(&self, request: SentRequest) -> Option<StatusCode> {
        self.sent.lock().unwrap().push(request);
        let response = self.next_response();

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        match response {
            MockResponse::Status(code) => Some(StatusCode::from_u16(code).unwrap()),
            MockResponse::Fail => None,
            MockResponse::Hang => std::future::pending().await,
            MockResponse::Gate(gate, code) => {
                gate.notified().await;
                Some(StatusCode::from_u16(code).unwrap())
            }
        }
    }
}

/// Decrements the in-flight counter even when the request future is dropped.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BatchTransport for MockTransport {
    async fn post_batch(&self, url: &str, envelope: &PayloadEnvelope) -> OutboxResult<StatusCode> {
        let request = SentRequest::Batch {
            url: url.to_string(),
            data: envelope.data.clone(),
        };
        self.respond(request)
            .await
            .ok_or_else(|| OutboxError::Transport("connection reset".to_string()))
    }
}

#[async_trait]
impl BeaconTransport for MockTransport {
    async fn send_beacon(&self, url: &str) -> OutboxResult<()> {
        let request = SentRequest::Beacon {
            url: url.to_string(),
        };
        match self.respond(request).await {
            Some(status) if status.is_success() => Ok(()),
            _ => Err(OutboxError::Transport("beacon error".to_string())),
        }
    }
}

/// Shared storage, registry and transport for building queues.
pub struct TestHarness {
    pub storage: Arc<MemoryStorage>,
    pub registry: Arc<FlushRegistry>,
    pub transport: Arc<MockTransport>,
    pub config: OutboxConfig,
}

impl TestHarness {
    pub fn new(mode: TransportMode) -> Self {
        let config = OutboxConfig {
            product: "test".to_string(),
            namespace: "ns".to_string(),
            transport_mode: mode,
            request_timeout_ms: 100,
            ..OutboxConfig::default()
        };
        Self {
            storage: Arc::new(MemoryStorage::new()),
            registry: Arc::new(FlushRegistry::new()),
            transport: Arc::new(MockTransport::new()),
            config,
        }
    }

    pub fn batch() -> Self {
        Self::new(TransportMode::Batch)
    }

    pub fn beacon() -> Self {
        Self::new(TransportMode::Beacon)
    }

    fn transports(&self) -> Transports {
        Transports {
            batch: Some(self.transport.clone()),
            beacon: self.transport.clone(),
        }
    }

    /// A queue over the harness storage with both channels available.
    pub fn queue(&self) -> OutboundQueue {
        OutboundQueue::new(
            &self.config,
            Some(self.storage.clone()),
            self.transports(),
            self.registry.as_ref(),
        )
    }

    /// A queue that only has the beacon channel.
    pub fn beacon_only_queue(&self) -> OutboundQueue {
        OutboundQueue::new(
            &self.config,
            Some(self.storage.clone()),
            Transports::beacon_only(self.transport.clone()),
            self.registry.as_ref(),
        )
    }

    /// A queue with persistence disabled.
    pub fn ephemeral_queue(&self) -> OutboundQueue {
        let config = OutboxConfig {
            use_durable_store: false,
            ..self.config.clone()
        };
        OutboundQueue::new(&config, None, self.transports(), self.registry.as_ref())
    }
}

/// A small page-view event with a recognisable id.
pub fn event(id: &str) -> EventFields {
    [
        ("e".to_string(), json!("pv")),
        ("eid".to_string(), json!(id)),
        ("aid".to_string(), json!("app")),
    ]
    .into_iter()
    .collect()
}

/// An event padded to roughly `bytes` of encoded size.
pub fn padded_event(id: &str, bytes: usize) -> EventFields {
    let mut fields = event(id);
    fields.insert("pad".to_string(), json!("x".repeat(bytes)));
    fields
}

/// Wait for the queue to go idle, failing the test if it never does.
pub async fn settle(queue: &OutboundQueue) {
    tokio::time::timeout(Duration::from_secs(2), queue.wait_idle())
        .await
        .expect("queue never went idle");
}

/// Ids of the entries still buffered, head first.
pub async fn queued_ids(queue: &OutboundQueue) -> Vec<String> {
    queue
        .snapshot()
        .await
        .iter()
        .filter_map(|entry| match entry {
            crate::Entry::Batch(batch) => batch.fields().get("eid").cloned(),
            crate::Entry::Beacon(beacon) => beacon
                .query()
                .trim_start_matches('?')
                .split('&')
                .find_map(|pair| pair.strip_prefix("eid="))
                .map(str::to_string),
            crate::Entry::Unrecognized(_) => None,
        })
        .collect()
}
