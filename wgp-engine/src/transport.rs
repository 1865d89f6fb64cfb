//! Outbound message transport.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::EngineError;

/// Publishes marshalled envelopes to a counterparty's messaging endpoint.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(
        &self,
        endpoint: &str,
        bearer_token: &str,
        subject: &str,
        wire: Vec<u8>,
    ) -> Result<(), EngineError>;
}

pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// `POST {endpoint}/inbound/{subject}` with the counterparty's bearer token.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

pub fn inbound_url(endpoint: &str, subject: &str) -> String {
    format!("{}/inbound/{}", endpoint.trim_end_matches('/'), subject)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn publish(
        &self,
        endpoint: &str,
        bearer_token: &str,
        subject: &str,
        wire: Vec<u8>,
    ) -> Result<(), EngineError> {
        let url = inbound_url(endpoint, subject);
        let response = self
            .client
            .post(&url)
            .bearer_auth(bearer_token)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(wire)
            .send()
            .await
            .map_err(|e| EngineError::Transport(format!("publish to {}: {}", url, e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(EngineError::Unauthorized(format!(
                "{} refused bearer token ({})",
                url, status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Transport(format!(
                "publish to {} returned {}: {}",
                url, status, body
            )));
        }
        debug!(%url, "published protocol message");
        Ok(())
    }
}

/// A publish recorded by [`MemoryTransport`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Published {
    pub endpoint: String,
    pub bearer_token: String,
    pub subject: String,
    pub wire: Vec<u8>,
}

/// In-process transport. Every publish is recorded; publishes to an endpoint
/// with a registered inbox are also delivered to it.
#[derive(Default)]
pub struct MemoryTransport {
    published: Mutex<Vec<Published>>,
    inboxes: Mutex<HashMap<String, mpsc::Sender<Vec<u8>>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, endpoint: impl Into<String>, inbox: mpsc::Sender<Vec<u8>>) {
        if let Ok(mut inboxes) = self.inboxes.lock() {
            inboxes.insert(endpoint.into(), inbox);
        }
    }

    pub fn published(&self) -> Vec<Published> {
        self.published
            .lock()
            .map(|published| published.clone())
            .unwrap_or_default()
    }

    pub fn take_published(&self) -> Vec<Published> {
        self.published
            .lock()
            .map(|mut published| std::mem::take(&mut *published))
            .unwrap_or_default()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(
        &self,
        endpoint: &str,
        bearer_token: &str,
        subject: &str,
        wire: Vec<u8>,
    ) -> Result<(), EngineError> {
        let inbox = self
            .inboxes
            .lock()
            .map_err(|_| EngineError::Transport("transport lock poisoned".into()))?
            .get(endpoint)
            .cloned();

        self.published
            .lock()
            .map_err(|_| EngineError::Transport("transport lock poisoned".into()))?
            .push(Published {
                endpoint: endpoint.to_string(),
                bearer_token: bearer_token.to_string(),
                subject: subject.to_string(),
                wire: wire.clone(),
            });

        if let Some(inbox) = inbox {
            if inbox.send(wire).await.is_err() {
                warn!(%endpoint, "in-process inbox closed");
                return Err(EngineError::Transport(format!("inbox for {} closed", endpoint)));
            }
        }
        Ok(())
    }
}
