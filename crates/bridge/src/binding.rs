//! Account binding and the coordinator that keeps user-hub subscriptions in
//! line with it.

use crate::error::{Error, Result};
use crate::subscription::{issue_all, SubscriptionManager, SubscriptionSet};
use common::InvocationSink;
use external_services::projectx::{Hub, Topic};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Process-wide account id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AccountBinding {
    #[default]
    Unknown,
    Known(String),
}

impl AccountBinding {
    pub fn account_id(&self) -> Option<&str> {
        match self {
            AccountBinding::Unknown => None,
            AccountBinding::Known(id) => Some(id),
        }
    }
}

/// What a `set_account_id` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingTransition {
    /// Same id as before; nothing sent.
    Unchanged,
    /// Unknown -> Known.
    Bound,
    /// Known(previous) -> Known(new).
    Rebound { previous: String },
}

impl BindingTransition {
    pub fn changed(&self) -> bool {
        !matches!(self, BindingTransition::Unchanged)
    }
}

/// Sole writer of the account binding.
///
/// Lock order is binding, then the user subscription manager. The user hub's
/// lifecycle hooks take only the subscription manager, so a transition and a
/// (re)connect never interleave.
pub struct AccountCoordinator {
    binding: Mutex<AccountBinding>,
    user_subs: Arc<Mutex<SubscriptionManager>>,
    user_hub: Arc<dyn InvocationSink>,
}

impl AccountCoordinator {
    pub fn new(user_subs: Arc<Mutex<SubscriptionManager>>, user_hub: Arc<dyn InvocationSink>) -> Self {
        Self {
            binding: Mutex::new(AccountBinding::Unknown),
            user_subs,
            user_hub,
        }
    }

    /// Currently bound account id.
    pub fn current(&self) -> Option<String> {
        let binding = self.binding.lock().unwrap_or_else(|e| e.into_inner());
        binding.account_id().map(str::to_string)
    }

    /// Bind the bridge to `account_id`.
    ///
    /// While the user hub is Connected the old account's topics are retracted
    /// and the new ones subscribed right away. Otherwise only the desired set
    /// changes and the next (re)connect sends it.
    pub fn set_account_id(&self, account_id: &str) -> Result<BindingTransition> {
        let account_id = account_id.trim();
        if account_id.is_empty() {
            return Err(Error::Validation("accountId is required".to_string()));
        }

        let mut binding = self.binding.lock().unwrap_or_else(|e| e.into_inner());
        let transition = match &*binding {
            AccountBinding::Known(current) if current == account_id => {
                info!("Account id {} already bound", account_id);
                return Ok(BindingTransition::Unchanged);
            }
            AccountBinding::Known(previous) => BindingTransition::Rebound {
                previous: previous.clone(),
            },
            AccountBinding::Unknown => BindingTransition::Bound,
        };

        let mut subs = self.user_subs.lock().unwrap_or_else(|e| e.into_inner());
        subs.declare_desired(SubscriptionSet::user(Some(account_id)));
        *binding = AccountBinding::Known(account_id.to_string());

        if !subs.is_connected() {
            info!(
                "Account id set to {}; user hub not connected, subscriptions deferred",
                account_id
            );
            return Ok(transition);
        }

        if let BindingTransition::Rebound { previous } = &transition {
            subs.retract(previous, self.user_hub.as_ref());
        }
        let calls = Topic::ACCOUNT_SCOPED
            .iter()
            .map(|topic| topic.subscribe(Some(account_id)))
            .collect();
        let sent = issue_all(self.user_hub.as_ref(), Hub::User, calls);
        info!("Account id set to {}; issued {} subscriptions", account_id, sent);

        Ok(transition)
    }
}
