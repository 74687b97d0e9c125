//! Hub handler shared by the market and user hubs.
//!
//! Inbound invocations are routed through a [`DispatchTable`] to the event
//! relay. Lifecycle hooks update the hub's [`SubscriptionManager`] and return
//! the calls the connection driver should issue.

use crate::relay::{EventKind, EventRelay};
use crate::subscription::SubscriptionManager;
use async_trait::async_trait;
use common::error::Result;
use common::{HubHandler, Invocation};
use external_services::projectx::hubs::events;
use external_services::projectx::{Hub, Topic};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Hub event name -> sink event tag.
#[derive(Debug, Clone)]
pub struct DispatchTable {
    routes: HashMap<&'static str, EventKind>,
}

impl DispatchTable {
    pub fn for_hub(hub: Hub) -> Self {
        match hub {
            Hub::Market => Self::market(),
            Hub::User => Self::user(),
        }
    }

    pub fn market() -> Self {
        Self::from_routes(&[
            (events::GATEWAY_TRADE, EventKind::Trade),
            (events::GATEWAY_QUOTE, EventKind::Quote),
            (events::GATEWAY_DEPTH, EventKind::Depth),
        ])
    }

    pub fn user() -> Self {
        Self::from_routes(&[
            (events::GATEWAY_USER_ACCOUNT, EventKind::Account),
            (events::GATEWAY_USER_ORDER, EventKind::Order),
            (events::GATEWAY_USER_POSITION, EventKind::Position),
            (events::GATEWAY_USER_TRADE, EventKind::UserTrade),
        ])
    }

    fn from_routes(routes: &[(&'static str, EventKind)]) -> Self {
        Self {
            routes: routes.iter().copied().collect(),
        }
    }

    pub fn lookup(&self, target: &str) -> Option<EventKind> {
        self.routes.get(target).copied()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Payload forwarded for an event.
///
/// Market events arrive as `[contractId, data]`, so with two or more
/// arguments the last one is the payload; a single argument is the payload
/// itself.
pub fn event_payload(mut arguments: Vec<Value>) -> Value {
    match arguments.len() {
        0 => Value::Null,
        1 => arguments.swap_remove(0),
        _ => arguments.pop().unwrap_or(Value::Null),
    }
}

/// Handler for one hub.
pub struct ChannelHandler {
    hub: Hub,
    subscriptions: Arc<Mutex<SubscriptionManager>>,
    dispatch: DispatchTable,
    relay: EventRelay,
}

impl ChannelHandler {
    pub fn new(subscriptions: Arc<Mutex<SubscriptionManager>>, relay: EventRelay) -> Self {
        let hub = lock(&subscriptions).hub();
        Self {
            hub,
            subscriptions,
            dispatch: DispatchTable::for_hub(hub),
            relay,
        }
    }

    pub fn hub(&self) -> Hub {
        self.hub
    }

    pub fn dispatch(&self) -> &DispatchTable {
        &self.dispatch
    }

    fn connected_sync(&self) -> Vec<Invocation> {
        let mut subs = lock(&self.subscriptions);
        subs.mark_connected();
        subs.sync_commands()
    }
}

fn lock(subs: &Mutex<SubscriptionManager>) -> MutexGuard<'_, SubscriptionManager> {
    subs.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl HubHandler for ChannelHandler {
    fn name(&self) -> &str {
        self.hub.as_str()
    }

    fn on_open(&self) -> Vec<Invocation> {
        let calls = self.connected_sync();
        info!("[{}] Hub opened, subscribing {} topics", self.hub, calls.len());
        calls
    }

    fn on_reestablished(&self) -> Vec<Invocation> {
        let calls = self.connected_sync();
        info!("[{}] Hub reestablished, replaying {} topics", self.hub, calls.len());
        calls
    }

    async fn on_invocation(&self, target: &str, arguments: Vec<Value>) -> Result<()> {
        match self.dispatch.lookup(target) {
            Some(kind) => {
                // fire and forget; the relay logs failures
                drop(self.relay.forward(kind, event_payload(arguments)));
            }
            None => debug!("[{}] No route for {}", self.hub, target),
        }
        Ok(())
    }

    async fn on_disconnect(&self, reason: &str) {
        lock(&self.subscriptions).mark_disconnected();
        warn!("[{}] Hub connection lost: {}", self.hub, reason);
    }

    async fn on_closed(&self, reason: &str) {
        lock(&self.subscriptions).mark_disconnected();
        info!("[{}] Hub closed: {}", self.hub, reason);
    }

    fn on_completion(&self, target: &str, error: Option<&str>) {
        match error {
            // depth is not offered for every contract
            Some(error) if target == Topic::Depth.subscribe_method() => {
                debug!("[{}] {} failed: {}", self.hub, target, error)
            }
            Some(error) => warn!("[{}] {} failed: {}", self.hub, target, error),
            None => debug!("[{}] {} acknowledged", self.hub, target),
        }
    }
}
