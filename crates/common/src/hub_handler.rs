//! Hub handler trait for the market and user channels.

use crate::error::Result;
use crate::messages::Invocation;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

/// Trait that channel handlers implement to react to hub events.
/// The HubManager calls these methods when events occur.
///
/// Lifecycle hooks return the invocations the manager should issue; the
/// manager sends each one independently, so one failing entry never blocks
/// the rest.
#[async_trait]
pub trait HubHandler: Send + Sync + 'static {
    /// Short channel name used in logs and metrics (e.g. "market").
    fn name(&self) -> &str;

    /// Called once, right after the first successful open.
    fn on_open(&self) -> Vec<Invocation>;

    /// Called after every successful automatic reconnect.
    fn on_reestablished(&self) -> Vec<Invocation>;

    /// Called for every server-to-client invocation (e.g. `GatewayQuote`).
    async fn on_invocation(&self, target: &str, arguments: Vec<Value>) -> Result<()>;

    /// Called when the transport is lost (before reconnect attempts).
    async fn on_disconnect(&self, _reason: &str) {}

    /// Called when the connection is closed for good, either by shutdown or
    /// because reconnect attempts ran out.
    async fn on_closed(&self, _reason: &str) {}

    /// Acknowledgement (or rejection) of an outbound invocation.
    fn on_completion(&self, target: &str, error: Option<&str>) {
        match error {
            Some(error) => warn!("[{}] {} failed: {}", self.name(), target, error),
            None => debug!("[{}] {} acknowledged", self.name(), target),
        }
    }
}
