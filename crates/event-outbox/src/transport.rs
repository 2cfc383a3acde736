//! Collector transports.
//!
//! Two capabilities move bytes to the collector:
//! - [`BatchTransport`]: request/response POST of a JSON envelope
//! - [`BeaconTransport`]: fire-and-forget GET of one encoded event
//!
//! [`HttpTransport`] implements both on top of `reqwest`.

use crate::entry::FieldMap;
use crate::{OutboxError, OutboxResult};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Self-describing schema of a batch body.
pub const PAYLOAD_DATA_SCHEMA: &str =
    "iglu:com.snowplowanalytics.snowplow/payload_data/jsonschema/1-0-2";

/// Content type of batch submissions.
pub const BATCH_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

/// Body of a batch submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayloadEnvelope {
    pub schema: &'static str,
    pub data: Vec<FieldMap>,
}

impl PayloadEnvelope {
    pub fn new(data: Vec<FieldMap>) -> Self {
        Self {
            schema: PAYLOAD_DATA_SCHEMA,
            data,
        }
    }
}

/// Request/response channel for batches.
#[async_trait]
pub trait BatchTransport: Send + Sync {
    /// POST `envelope` to `url`, returning the response status.
    ///
    /// Dropping the returned future abandons the request.
    async fn post_batch(&self, url: &str, envelope: &PayloadEnvelope) -> OutboxResult<StatusCode>;
}

/// Single-shot fallback channel.
#[async_trait]
pub trait BeaconTransport: Send + Sync {
    /// Fire one GET at `url`; `Ok` when the channel reports a load.
    async fn send_beacon(&self, url: &str) -> OutboxResult<()>;
}

/// The channels a queue may drain through.
///
/// Without a batch transport a queue always runs in beacon mode.
#[derive(Clone)]
pub struct Transports {
    pub batch: Option<Arc<dyn BatchTransport>>,
    pub beacon: Arc<dyn BeaconTransport>,
}

impl Transports {
    /// Both capabilities backed by one HTTP client.
    pub fn http(transport: HttpTransport) -> Self {
        let transport = Arc::new(transport);
        Self {
            batch: Some(transport.clone()),
            beacon: transport,
        }
    }

    /// Only the single-shot channel is available.
    pub fn beacon_only(beacon: Arc<dyn BeaconTransport>) -> Self {
        Self { batch: None, beacon }
    }
}

/// HTTP transport for both modes.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    headers: HeaderMap,
}

impl HttpTransport {
    /// Create a transport with no extra headers.
    pub fn new() -> OutboxResult<Self> {
        Self::with_headers(&BTreeMap::new())
    }

    /// Create a transport that adds `headers` to every batch submission.
    pub fn with_headers(headers: &BTreeMap<String, String>) -> OutboxResult<Self> {
        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| OutboxError::Config(format!("invalid header name {:?}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| OutboxError::Config(format!("invalid header value for {}: {}", name, e)))?;
            header_map.insert(name, value);
        }
        header_map.insert(CONTENT_TYPE, HeaderValue::from_static(BATCH_CONTENT_TYPE));

        let client = Client::builder().build()?;

        Ok(Self {
            client,
            headers: header_map,
        })
    }
}

#[async_trait]
impl BatchTransport for HttpTransport {
    async fn post_batch(&self, url: &str, envelope: &PayloadEnvelope) -> OutboxResult<StatusCode> {
        let body = serde_json::to_vec(envelope)?;

        debug!(url = %url, events = envelope.data.len(), bytes = body.len(), "Posting batch");

        let response = self
            .client
            .post(url)
            .headers(self.headers.clone())
            .body(body)
            .send()
            .await?;

        Ok(response.status())
    }
}

#[async_trait]
impl BeaconTransport for HttpTransport {
    async fn send_beacon(&self, url: &str) -> OutboxResult<()> {
        debug!(url = %url, "Sending beacon");

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(OutboxError::Transport(format!("beacon returned HTTP {}", status)))
        }
    }
}
