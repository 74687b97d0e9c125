//! Fire-and-forget forwarding of hub events to the external sink.

use crate::error::{Error, Result};
use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Event type tag carried in the sink body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Trade,
    Quote,
    Depth,
    Account,
    Order,
    Position,
    UserTrade,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Trade => "trade",
            EventKind::Quote => "quote",
            EventKind::Depth => "depth",
            EventKind::Account => "account",
            EventKind::Order => "order",
            EventKind::Position => "position",
            EventKind::UserTrade => "user_trade",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body posted to the sink: `{"type": ..., "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub payload: Value,
}

/// Destination for relayed events.
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    async fn deliver(&self, event: &InboundEvent) -> Result<()>;
}

/// POSTs each event as JSON.
#[derive(Debug, Clone)]
pub struct HttpSink {
    http: reqwest::Client,
    url: String,
}

impl HttpSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl EventSink for HttpSink {
    async fn deliver(&self, event: &InboundEvent) -> Result<()> {
        let response = self
            .http
            .post(&self.url)
            .json(event)
            .send()
            .await
            .map_err(|e| Error::SinkDelivery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::SinkDelivery(format!(
                "sink returned status {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }
        Ok(())
    }
}

/// Forwards events without waiting on the sink.
#[derive(Clone)]
pub struct EventRelay {
    sink: Arc<dyn EventSink>,
}

impl EventRelay {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    /// Spawn one delivery. Failures are logged and the event is dropped.
    ///
    /// The returned handle is only useful for observing the outcome; dropping
    /// it does not cancel the delivery.
    pub fn forward(&self, kind: EventKind, payload: Value) -> JoinHandle<Result<()>> {
        let sink = self.sink.clone();
        tokio::spawn(async move {
            let event = InboundEvent { kind, payload };
            match sink.deliver(&event).await {
                Ok(()) => {
                    counter!("bridge_events_forwarded_total", "type" => kind.as_str()).increment(1);
                    debug!("Forwarded {} event", kind);
                    Ok(())
                }
                Err(e) => {
                    counter!("bridge_sink_errors_total", "type" => kind.as_str()).increment(1);
                    warn!("Dropping {} event: {}", kind, e);
                    Err(e)
                }
            }
        })
    }
}
