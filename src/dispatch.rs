//! Endpoint failover dispatcher
//!
//! Delivers a reading to an ordered list of remote collection endpoints.
//! Endpoints are tried one at a time, top to bottom, and the first 2xx
//! answer ends the walk. Every call starts again from the first endpoint;
//! nothing is remembered between readings, and a reading that no endpoint
//! accepts is dropped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::types::heartrate::Reading;

/// Value of the `device` field sent to collection endpoints.
pub const DEVICE_TAG: &str = "wear-os";

/// Value of the `source` field sent to collection endpoints.
pub const SOURCE_TAG: &str = "android-app";

/// Heart rate used when probing endpoints.
pub const PROBE_BPM: f32 = 72.0;

const JSON_MEDIA_TYPE: &str = "application/json";

/// A remote collection service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: String,
    pub display_name: String,
}

impl Endpoint {
    pub fn new(url: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            display_name: display_name.into(),
        }
    }
}

/// JSON body posted to collection endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryPayload {
    pub bpm: f32,
    pub timestamp: i64,
    pub device: String,
    pub source: String,
}

impl From<&Reading> for DeliveryPayload {
    fn from(reading: &Reading) -> Self {
        Self {
            bpm: reading.value,
            timestamp: reading.captured_at_millis,
            device: DEVICE_TAG.to_string(),
            source: SOURCE_TAG.to_string(),
        }
    }
}

/// Why a single endpoint attempt failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AttemptError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("endpoint list is empty")]
    NoEndpoints,

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Posts a payload to one endpoint.
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    /// Returns the 2xx status code on success.
    async fn post(&self, endpoint: &Endpoint, payload: &DeliveryPayload)
        -> Result<u16, AttemptError>;
}

/// reqwest-backed client with a bounded per-attempt timeout.
pub struct HttpDeliveryClient {
    client: reqwest::Client,
}

impl HttpDeliveryClient {
    pub fn new(timeout: Duration) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DeliveryClient for HttpDeliveryClient {
    async fn post(
        &self,
        endpoint: &Endpoint,
        payload: &DeliveryPayload,
    ) -> Result<u16, AttemptError> {
        let response = self
            .client
            .post(&endpoint.url)
            .header(CONTENT_TYPE, JSON_MEDIA_TYPE)
            .header(ACCEPT, JSON_MEDIA_TYPE)
            .json(payload)
            .send()
            .await
            .map_err(|e| AttemptError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(AttemptError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

/// One endpoint contacted while delivering a reading.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    /// Position of the endpoint in the configured list.
    pub index: usize,
    pub display_name: String,
    pub result: Result<u16, AttemptError>,
}

impl AttemptRecord {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// The endpoint at `index` accepted the reading.
    Delivered {
        index: usize,
        attempts: Vec<AttemptRecord>,
    },
    /// Every endpoint was tried and none accepted the reading.
    Exhausted { attempts: Vec<AttemptRecord> },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }

    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            DeliveryOutcome::Delivered { attempts, .. } => attempts,
            DeliveryOutcome::Exhausted { attempts } => attempts,
        }
    }
}

#[derive(Clone)]
pub struct FailoverDispatcher {
    endpoints: Arc<[Endpoint]>,
    client: Arc<dyn DeliveryClient>,
}

impl FailoverDispatcher {
    pub fn new(
        endpoints: Vec<Endpoint>,
        client: Arc<dyn DeliveryClient>,
    ) -> Result<Self, DispatchError> {
        if endpoints.is_empty() {
            return Err(DispatchError::NoEndpoints);
        }
        Ok(Self {
            endpoints: endpoints.into(),
            client,
        })
    }

    /// Build a dispatcher posting over HTTP with `timeout` per attempt.
    pub fn http(endpoints: Vec<Endpoint>, timeout: Duration) -> Result<Self, DispatchError> {
        let client = HttpDeliveryClient::new(timeout)?;
        Self::new(endpoints, Arc::new(client))
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    async fn attempt(&self, index: usize, payload: &DeliveryPayload) -> AttemptRecord {
        let endpoint = &self.endpoints[index];
        let result = self.client.post(endpoint, payload).await;
        match &result {
            Ok(status) => log::info!(
                "[{}] Delivered {} BPM (HTTP {})",
                endpoint.display_name,
                payload.bpm,
                status
            ),
            Err(e) => log::warn!("[{}] Delivery failed: {}", endpoint.display_name, e),
        }
        AttemptRecord {
            index,
            display_name: endpoint.display_name.clone(),
            result,
        }
    }

    /// Deliver one reading, stopping at the first endpoint that accepts it.
    pub async fn deliver(&self, reading: &Reading) -> DeliveryOutcome {
        let payload = DeliveryPayload::from(reading);
        let mut attempts = Vec::with_capacity(self.endpoints.len());

        for index in 0..self.endpoints.len() {
            let record = self.attempt(index, &payload).await;
            let accepted = record.succeeded();
            attempts.push(record);
            if accepted {
                return DeliveryOutcome::Delivered { index, attempts };
            }
        }

        log::error!(
            "All {} endpoints failed; dropping reading of {} BPM at {}",
            self.endpoints.len(),
            reading.value,
            reading.captured_at_millis
        );
        DeliveryOutcome::Exhausted { attempts }
    }

    /// Run [`FailoverDispatcher::deliver`] on its own task.
    pub fn spawn_deliver(&self, reading: Reading) -> JoinHandle<DeliveryOutcome> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.deliver(&reading).await })
    }

    /// Post a sample reading to every endpoint, without stopping early.
    pub async fn probe_all(&self) -> Vec<AttemptRecord> {
        let payload = DeliveryPayload::from(&Reading::now(PROBE_BPM));
        let mut report = Vec::with_capacity(self.endpoints.len());
        for index in 0..self.endpoints.len() {
            let record = self.attempt(index, &payload).await;
            log::info!(
                "Probe {}: {}",
                record.display_name,
                if record.succeeded() { "ok" } else { "failed" }
            );
            report.push(record);
        }
        report
    }
}
