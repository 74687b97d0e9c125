//! Bridge supervisor - owns both hub connections and the shared state the
//! control API needs.

use crate::api::{create_router, AppState};
use crate::binding::AccountCoordinator;
use crate::config::BridgeConfig;
use crate::handler::ChannelHandler;
use crate::relay::{EventRelay, EventSink};
use crate::subscription::{SubscriptionManager, SubscriptionSet};
use axum::Router;
use common::{HubHandle, HubManager, HubManagerConfig, ReconnectPolicy};
use external_services::projectx::Hub;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Represents a running hub with its handle and task.
struct HubWorker {
    handle: HubHandle,
    join_handle: JoinHandle<()>,
}

/// Runs the market and user hubs and the account coordinator.
pub struct Bridge {
    market: HubWorker,
    user: HubWorker,
    coordinator: Arc<AccountCoordinator>,
    shutdown_timeout: Duration,
}

impl Bridge {
    /// Spawn both hubs. Must be called inside a tokio runtime.
    pub fn start(config: &BridgeConfig, access_token: String, sink: Arc<dyn EventSink>) -> Self {
        let relay = EventRelay::new(sink);

        let market_subs = Arc::new(Mutex::new(SubscriptionManager::new(
            Hub::Market,
            SubscriptionSet::market(&config.contract_id),
        )));
        let user_subs = Arc::new(Mutex::new(SubscriptionManager::new(
            Hub::User,
            SubscriptionSet::user(None),
        )));

        let market = spawn_hub(
            &config.market_hub_url,
            &access_token,
            config.reconnect,
            market_subs,
            relay.clone(),
        );
        let user = spawn_hub(
            &config.user_hub_url,
            &access_token,
            config.reconnect,
            user_subs.clone(),
            relay,
        );

        let coordinator = Arc::new(AccountCoordinator::new(
            user_subs,
            Arc::new(user.handle.clone()),
        ));

        info!(
            "Bridge started: contract {}, sink ready, reconnect {}x{:?}",
            config.contract_id, config.reconnect.max_attempts, config.reconnect.delay
        );

        Self {
            market,
            user,
            coordinator,
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    pub fn market(&self) -> &HubHandle {
        &self.market.handle
    }

    pub fn user(&self) -> &HubHandle {
        &self.user.handle
    }

    pub fn coordinator(&self) -> Arc<AccountCoordinator> {
        self.coordinator.clone()
    }

    /// Control API router bound to this bridge.
    pub fn router(&self) -> Router {
        create_router(Arc::new(AppState {
            coordinator: self.coordinator.clone(),
            market_state: self.market.handle.watch_state(),
            user_state: self.user.handle.watch_state(),
        }))
    }

    /// Close both hubs and wait for their tasks, bounded by the shutdown timeout.
    pub async fn shutdown(self) {
        info!("Shutting down hubs...");
        let Bridge {
            market,
            user,
            shutdown_timeout,
            ..
        } = self;
        market.handle.close();
        user.handle.close();

        let workers = async move {
            for worker in [market, user] {
                let name = worker.handle.name().to_string();
                if let Err(e) = worker.join_handle.await {
                    error!("[{}] Hub task panicked: {:?}", name, e);
                }
            }
        };

        if tokio::time::timeout(shutdown_timeout, workers).await.is_err() {
            warn!(
                "Hubs did not stop within {:?}, exiting anyway",
                shutdown_timeout
            );
        } else {
            info!("All hubs stopped");
        }
    }
}

fn spawn_hub(
    url: &str,
    access_token: &str,
    reconnect: ReconnectPolicy,
    subscriptions: Arc<Mutex<SubscriptionManager>>,
    relay: EventRelay,
) -> HubWorker {
    let handler = Arc::new(ChannelHandler::new(subscriptions, relay));
    let hub = handler.hub();
    let config = HubManagerConfig {
        reconnect,
        ..HubManagerConfig::new(url, Some(access_token.to_string()))
    };
    let (manager, handle) = HubManager::new(handler, config);

    let join_handle = tokio::spawn(async move {
        match manager.run().await {
            Ok(()) => info!("[{}] Hub stopped", hub),
            Err(common::Error::ReconnectExhausted { attempts }) => {
                error!("[{}] Hub failed after {} reconnect attempts", hub, attempts)
            }
            Err(e) => error!("[{}] Hub could not be opened: {}", hub, e),
        }
    });

    HubWorker {
        handle,
        join_handle,
    }
}
