//! HTTP control API for the bridge.
//!
//! Endpoints:
//! - `POST /set-account-id` - Bind the bridge to an account (`{"accountId": "..."}`)
//! - `GET /health` - Hub states and the bound account

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use common::ConnectionState;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::binding::AccountCoordinator;
use crate::error::Error;

/// Application state shared across handlers.
pub struct AppState {
    pub coordinator: Arc<AccountCoordinator>,
    pub market_state: watch::Receiver<ConnectionState>,
    pub user_state: watch::Receiver<ConnectionState>,
}

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/set-account-id", post(set_account_id_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Health check response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    market: ConnectionState,
    user: ConnectionState,
    account_id: Option<String>,
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let market = *state.market_state.borrow();
    let user = *state.user_state.borrow();
    Json(HealthResponse {
        status: "ok",
        market,
        user,
        account_id: state.coordinator.current(),
    })
}

/// API error response.
#[derive(Serialize)]
struct ErrorResponse {
    status: &'static str,
    message: String,
}

impl ErrorResponse {
    fn new(message: impl ToString) -> Self {
        Self {
            status: "error",
            message: message.to_string(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SetAccountResponse {
    status: &'static str,
    account_id: String,
    changed: bool,
}

/// Pull `accountId` out of an arbitrary body. Numbers are accepted as well
/// as strings; anything else counts as missing.
fn account_id_from_body(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    match value.get("accountId")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Bind account handler.
/// POST /set-account-id
async fn set_account_id_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> impl IntoResponse {
    let account_id = account_id_from_body(&body).unwrap_or_default();

    match state.coordinator.set_account_id(&account_id) {
        Ok(transition) => {
            let account_id = account_id.trim().to_string();
            info!("Account id {} accepted ({:?})", account_id, transition);
            (
                StatusCode::OK,
                Json(serde_json::json!(SetAccountResponse {
                    status: "success",
                    account_id,
                    changed: transition.changed(),
                })),
            )
        }
        Err(Error::Validation(message)) => {
            warn!("Rejected set-account-id request: {}", message);
            (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!(ErrorResponse::new(message))),
            )
        }
        Err(e) => {
            warn!("set-account-id failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!(ErrorResponse::new(e))),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::{SubscriptionManager, SubscriptionSet};
    use axum::body::Body;
    use axum::http::Request;
    use common::{Invocation, InvocationSink, Result as HubResult};
    use external_services::projectx::Hub;
    use std::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<Invocation>>,
    }

    impl InvocationSink for RecordingSink {
        fn invoke(&self, invocation: Invocation) -> HubResult<()> {
            self.calls.lock().unwrap().push(invocation);
            Ok(())
        }
    }

    struct Fixture {
        router: Router,
        sink: Arc<RecordingSink>,
        coordinator: Arc<AccountCoordinator>,
        _market_tx: watch::Sender<ConnectionState>,
        _user_tx: watch::Sender<ConnectionState>,
    }

    fn fixture(user_connected: bool) -> Fixture {
        let mut manager = SubscriptionManager::new(Hub::User, SubscriptionSet::user(None));
        if user_connected {
            manager.mark_connected();
        }
        let sink = Arc::new(RecordingSink::default());
        let coordinator = Arc::new(AccountCoordinator::new(
            Arc::new(Mutex::new(manager)),
            sink.clone(),
        ));
        let (market_tx, market_state) = watch::channel(ConnectionState::Connected);
        let user = if user_connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Reconnecting { attempt: 2 }
        };
        let (user_tx, user_state) = watch::channel(user);
        let router = create_router(Arc::new(AppState {
            coordinator: coordinator.clone(),
            market_state,
            user_state,
        }));
        Fixture {
            router,
            sink,
            coordinator,
            _market_tx: market_tx,
            _user_tx: user_tx,
        }
    }

    async fn post(router: Router, body: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/set-account-id")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_set_account_id_subscribes() {
        let fx = fixture(true);
        let (status, body) = post(fx.router.clone(), r#"{"accountId":"ACC-1"}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            serde_json::json!({"status": "success", "accountId": "ACC-1", "changed": true})
        );
        let targets: Vec<String> = fx.sink.calls.lock().unwrap().iter().map(|c| c.target.clone()).collect();
        assert_eq!(targets, vec!["SubscribeOrders", "SubscribePositions", "SubscribeTrades"]);

        let (status, body) = post(fx.router, r#"{"accountId":"ACC-1"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["changed"], false);
        assert_eq!(fx.sink.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_numeric_account_id_accepted() {
        let fx = fixture(true);
        let (status, body) = post(fx.router, r#"{"accountId":12345}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["accountId"], "12345");
        assert_eq!(fx.coordinator.current().as_deref(), Some("12345"));
    }

    #[tokio::test]
    async fn test_missing_account_id_rejected() {
        for body in ["", "{}", "not json", r#"{"accountId":""}"#, r#"{"accountId":"  "}"#, r#"{"accountId":null}"#] {
            let fx = fixture(true);
            let (status, response) = post(fx.router, body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "body: {:?}", body);
            assert_eq!(
                response,
                serde_json::json!({"status": "error", "message": "accountId is required"})
            );
            assert_eq!(fx.coordinator.current(), None);
            assert!(fx.sink.calls.lock().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_set_while_user_hub_down_defers() {
        let fx = fixture(false);
        let (status, _) = post(fx.router, r#"{"accountId":"ACC-9"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert!(fx.sink.calls.lock().unwrap().is_empty());
        assert_eq!(fx.coordinator.current().as_deref(), Some("ACC-9"));
    }

    #[tokio::test]
    async fn test_health() {
        let fx = fixture(false);
        fx.coordinator.set_account_id("ACC-3").unwrap();
        let response = fx
            .router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["market"]["state"], "connected");
        assert_eq!(body["user"]["state"], "reconnecting");
        assert_eq!(body["user"]["attempt"], 2);
        assert_eq!(body["accountId"], "ACC-3");
    }
}
