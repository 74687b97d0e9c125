//! Desired-subscription bookkeeping for one hub.
//!
//! The manager never talks to the socket itself. It produces the invocations
//! to send, and [`issue_all`] hands them to an [`InvocationSink`] one by one.

use common::{Invocation, InvocationSink};
use external_services::projectx::{Hub, Topic};
use std::fmt;
use tracing::{debug, info, warn};

/// One (topic, key) pair. `key` is the contract or account id, `None` for
/// the generic accounts topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub topic: Topic,
    pub key: Option<String>,
}

impl Subscription {
    pub fn keyed(topic: Topic, key: impl Into<String>) -> Self {
        Self {
            topic,
            key: Some(key.into()),
        }
    }

    pub fn unkeyed(topic: Topic) -> Self {
        Self { topic, key: None }
    }

    pub fn subscribe(&self) -> Invocation {
        self.topic.subscribe(self.key.as_deref())
    }

    pub fn unsubscribe(&self) -> Invocation {
        self.topic.unsubscribe(self.key.as_deref())
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}:{}", self.topic, key),
            None => write!(f, "{}", self.topic),
        }
    }
}

/// Ordered, duplicate-free list of subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSet {
    entries: Vec<Subscription>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Market topics for one contract, in subscribe order.
    pub fn market(contract_id: &str) -> Self {
        Topic::MARKET
            .iter()
            .map(|topic| Subscription::keyed(*topic, contract_id))
            .collect()
    }

    /// User topics: the accounts feed, plus the account-scoped topics once
    /// an account id is known.
    pub fn user(account_id: Option<&str>) -> Self {
        let mut set = Self::new();
        set.push(Subscription::unkeyed(Topic::Accounts));
        if let Some(account_id) = account_id {
            for topic in Topic::ACCOUNT_SCOPED {
                set.push(Subscription::keyed(topic, account_id));
            }
        }
        set
    }

    /// Append unless already present.
    pub fn push(&mut self, subscription: Subscription) {
        if !self.entries.contains(&subscription) {
            self.entries.push(subscription);
        }
    }

    pub fn contains(&self, subscription: &Subscription) -> bool {
        self.entries.contains(subscription)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<Subscription> for SubscriptionSet {
    fn from_iter<I: IntoIterator<Item = Subscription>>(iter: I) -> Self {
        let mut set = Self::new();
        for subscription in iter {
            set.push(subscription);
        }
        set
    }
}

/// Per-hub desired set plus whether the hub is currently Connected.
///
/// Shared between the hub's handler and the account coordinator behind one
/// mutex; holding that mutex is what orders lifecycle hooks against account
/// changes.
#[derive(Debug)]
pub struct SubscriptionManager {
    hub: Hub,
    desired: SubscriptionSet,
    connected: bool,
}

impl SubscriptionManager {
    pub fn new(hub: Hub, initial: SubscriptionSet) -> Self {
        Self {
            hub,
            desired: initial,
            connected: false,
        }
    }

    pub fn hub(&self) -> Hub {
        self.hub
    }

    pub fn desired(&self) -> &SubscriptionSet {
        &self.desired
    }

    /// Replace the desired set. Nothing is sent.
    pub fn declare_desired(&mut self, set: SubscriptionSet) {
        debug!(
            "[{}] Desired subscriptions: {}",
            self.hub,
            set.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(", ")
        );
        self.desired = set;
    }

    /// One subscribe call per desired entry, in order.
    pub fn sync_commands(&self) -> Vec<Invocation> {
        self.desired.iter().map(Subscription::subscribe).collect()
    }

    /// Unsubscribe calls for the account-scoped topics bound to `account_id`.
    pub fn retract_commands(&self, account_id: &str) -> Vec<Invocation> {
        Topic::ACCOUNT_SCOPED
            .iter()
            .filter(|topic| topic.hub() == self.hub)
            .map(|topic| topic.unsubscribe(Some(account_id)))
            .collect()
    }

    pub fn retract(&self, account_id: &str, sink: &dyn InvocationSink) -> usize {
        info!("[{}] Retracting subscriptions for account {}", self.hub, account_id);
        issue_all(sink, self.hub, self.retract_commands(account_id))
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn mark_connected(&mut self) {
        self.connected = true;
    }

    pub fn mark_disconnected(&mut self) {
        self.connected = false;
    }
}

/// Hand each invocation to `sink` independently; a rejected entry is logged
/// and the rest still go out.
pub fn issue_all(sink: &dyn InvocationSink, hub: Hub, invocations: Vec<Invocation>) -> usize {
    let mut accepted = 0;
    for invocation in invocations {
        let target = invocation.target.clone();
        match sink.invoke(invocation) {
            Ok(()) => accepted += 1,
            Err(e) => warn!("[{}] Failed to issue {}: {}", hub, target, e),
        }
    }
    accepted
}
