//! End-to-end: fake market and user hubs, a wiremock sink, and the control API.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use bridge::{Bridge, BridgeConfig, Credentials, HttpSink};
use common::{ConnectionState, ReconnectPolicy};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RS: char = '\u{1e}';

enum Outbound {
    Frame(String),
    Drop,
}

/// Minimal SignalR hub: accepts the handshake, acknowledges invocations and
/// reports them as (connection, target, arguments).
struct FakeHub {
    url: String,
    calls: mpsc::UnboundedReceiver<(usize, String, Vec<Value>)>,
    live: Arc<Mutex<Option<mpsc::UnboundedSender<Outbound>>>>,
}

impl FakeHub {
    async fn start(path: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}{}", listener.local_addr().unwrap(), path);
        let (calls_tx, calls) = mpsc::unbounded_channel();
        let live: Arc<Mutex<Option<mpsc::UnboundedSender<Outbound>>>> = Arc::new(Mutex::new(None));

        let live_slot = live.clone();
        tokio::spawn(async move {
            let mut index = 0;
            while let Ok((stream, _)) = listener.accept().await {
                index += 1;
                let (tx, mut rx) = mpsc::unbounded_channel();
                *live_slot.lock().unwrap() = Some(tx);
                let calls_tx = calls_tx.clone();
                tokio::spawn(async move {
                    let Ok(ws) = accept_async(stream).await else { return };
                    let (mut write, mut read) = ws.split();
                    loop {
                        tokio::select! {
                            msg = read.next() => {
                                let Some(Ok(Message::Text(text))) = msg else { return };
                                for record in text.as_str().split(RS).filter(|r| !r.is_empty()) {
                                    let value: Value = serde_json::from_str(record).unwrap();
                                    let reply = if value.get("protocol").is_some() {
                                        json!({})
                                    } else if value["type"] == 1 {
                                        let _ = calls_tx.send((
                                            index,
                                            value["target"].as_str().unwrap().to_string(),
                                            value["arguments"].as_array().cloned().unwrap_or_default(),
                                        ));
                                        json!({"type": 3, "invocationId": value["invocationId"]})
                                    } else {
                                        continue;
                                    };
                                    let _ = write.send(Message::Text(format!("{}{}", reply, RS).into())).await;
                                }
                            }
                            cmd = rx.recv() => match cmd {
                                Some(Outbound::Frame(frame)) => {
                                    let _ = write.send(Message::Text(frame.into())).await;
                                }
                                Some(Outbound::Drop) | None => return,
                            },
                        }
                    }
                });
            }
        });

        Self { url, calls, live }
    }

    fn push(&self, record: Value) {
        if let Some(tx) = self.live.lock().unwrap().as_ref() {
            let _ = tx.send(Outbound::Frame(format!("{}{}", record, RS)));
        }
    }

    fn kick(&self) {
        if let Some(tx) = self.live.lock().unwrap().take() {
            let _ = tx.send(Outbound::Drop);
        }
    }

    async fn next_call(&mut self) -> (usize, String, Vec<Value>) {
        timeout(Duration::from_secs(5), self.calls.recv())
            .await
            .expect("timed out waiting for hub call")
            .expect("hub stopped")
    }

    async fn next_targets(&mut self, n: usize) -> Vec<String> {
        let mut targets = Vec::new();
        for _ in 0..n {
            targets.push(self.next_call().await.1);
        }
        targets
    }

    fn assert_quiet(&mut self) {
        assert!(self.calls.try_recv().is_err(), "unexpected hub call");
    }
}

fn config(market: &FakeHub, user: &FakeHub, sink_url: String) -> BridgeConfig {
    BridgeConfig {
        credentials: Credentials::Token("token".to_string()),
        api_url: "http://127.0.0.1:1".to_string(),
        market_hub_url: market.url.clone(),
        user_hub_url: user.url.clone(),
        contract_id: "CON.F.US.EP.M25".to_string(),
        sink_url,
        control_port: 0,
        reconnect: ReconnectPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(20),
        },
        shutdown_timeout: Duration::from_secs(5),
        metrics_port: None,
    }
}

async fn set_account(bridge: &Bridge, body: &str) -> (StatusCode, Value) {
    let response = bridge
        .router()
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
async fn test_bridge_end_to_end() {
    let sink_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/data_stream"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&sink_server)
        .await;

    let mut market = FakeHub::start("/hubs/market").await;
    let mut user = FakeHub::start("/hubs/user").await;
    let cfg = config(&market, &user, format!("{}/data_stream", sink_server.uri()));
    let sink = Arc::new(HttpSink::new(cfg.sink_url.clone()));
    let bridge = Bridge::start(&cfg, "token".to_string(), sink);

    // market opens with the three contract topics, in order
    assert_eq!(
        market.next_targets(3).await,
        vec![
            "SubscribeContractTrades",
            "SubscribeContractQuotes",
            "SubscribeContractMarketDepth"
        ]
    );
    // user opens with only the accounts feed
    let (_, target, args) = user.next_call().await;
    assert_eq!(target, "SubscribeAccounts");
    assert!(args.is_empty());
    bridge
        .user()
        .wait_for_state(|s| s.is_connected())
        .await
        .unwrap();

    // bind an account while connected
    let (status, body) = set_account(&bridge, r#"{"accountId":"ACC-1"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], true);
    assert_eq!(
        user.next_targets(3).await,
        vec!["SubscribeOrders", "SubscribePositions", "SubscribeTrades"]
    );

    // same id again: nothing on the wire
    let (status, body) = set_account(&bridge, r#"{"accountId":"ACC-1"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], false);

    // empty body is rejected without touching the binding
    let (status, body) = set_account(&bridge, "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "accountId is required");
    assert_eq!(bridge.coordinator().current().as_deref(), Some("ACC-1"));

    // a trade is relayed to the sink with the contract id stripped
    market.push(json!({
        "type": 1,
        "target": "GatewayTrade",
        "arguments": ["CON.F.US.EP.M25", {"price": 100, "size": 2}]
    }));
    let delivered = timeout(Duration::from_secs(5), async {
        loop {
            let requests = sink_server.received_requests().await.unwrap_or_default();
            if let Some(request) = requests.first() {
                return serde_json::from_slice::<Value>(&request.body).unwrap();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(delivered, json!({"type": "trade", "payload": {"price": 100, "size": 2}}));

    // a dropped user hub comes back and replays the whole desired set
    user.kick();
    let mut replay = Vec::new();
    for _ in 0..4 {
        let (connection, target, _) = user.next_call().await;
        assert_eq!(connection, 2);
        replay.push(target);
    }
    assert_eq!(
        replay,
        vec![
            "SubscribeAccounts",
            "SubscribeOrders",
            "SubscribePositions",
            "SubscribeTrades"
        ]
    );
    user.assert_quiet();
    market.assert_quiet();

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_account_rebinding_retracts_first() {
    let sink_server = MockServer::start().await;
    let market = FakeHub::start("/hubs/market").await;
    let mut user = FakeHub::start("/hubs/user").await;
    let cfg = config(&market, &user, format!("{}/data_stream", sink_server.uri()));
    let bridge = Bridge::start(&cfg, "token".to_string(), Arc::new(HttpSink::new(cfg.sink_url.clone())));

    assert_eq!(user.next_call().await.1, "SubscribeAccounts");
    bridge
        .user()
        .wait_for_state(|s| s.is_connected())
        .await
        .unwrap();

    set_account(&bridge, r#"{"accountId":"111"}"#).await;
    user.next_targets(3).await;

    let (status, _) = set_account(&bridge, r#"{"accountId":"222"}"#).await;
    assert_eq!(status, StatusCode::OK);

    let mut calls = Vec::new();
    for _ in 0..6 {
        let (_, target, args) = user.next_call().await;
        calls.push((target, args));
    }
    let expected: Vec<(String, Vec<Value>)> = [
        ("UnsubscribeOrders", 111),
        ("UnsubscribePositions", 111),
        ("UnsubscribeTrades", 111),
        ("SubscribeOrders", 222),
        ("SubscribePositions", 222),
        ("SubscribeTrades", 222),
    ]
    .iter()
    .map(|(target, id)| (target.to_string(), vec![json!(id)]))
    .collect();
    assert_eq!(calls, expected);

    bridge.shutdown().await;
}

/// A bridge whose user hub is unreachable binds the account anyway and sends
/// nothing until the hub exists.
#[tokio::test]
async fn test_user_hub_unavailable_at_start() {
    let market = FakeHub::start("/hubs/market").await;
    // reserve a port with nothing behind it
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_url = format!("ws://{}/hubs/user", dead.local_addr().unwrap());
    drop(dead);

    let mut cfg = config(&market, &market, "http://127.0.0.1:9/data_stream".to_string());
    cfg.user_hub_url = dead_url;
    let bridge = Bridge::start(&cfg, "token".to_string(), Arc::new(HttpSink::new(cfg.sink_url.clone())));

    // the initial failure is not retried: the driver stops and the hub stays unopened
    let state = bridge.user().watch_state();
    timeout(Duration::from_secs(5), async {
        while state.has_changed().is_ok() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(bridge.user().state(), ConnectionState::Disconnected);

    let (status, body) = set_account(&bridge, r#"{"accountId":"ACC-7"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accountId"], "ACC-7");

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_bind_while_user_hub_reconnecting() {
    let sink_server = MockServer::start().await;
    let market = FakeHub::start("/hubs/market").await;
    let mut user = FakeHub::start("/hubs/user").await;
    let mut cfg = config(&market, &user, format!("{}/data_stream", sink_server.uri()));
    cfg.reconnect.delay = Duration::from_millis(300);
    let bridge = Bridge::start(&cfg, "token".to_string(), Arc::new(HttpSink::new(cfg.sink_url.clone())));

    assert_eq!(user.next_call().await.1, "SubscribeAccounts");
    bridge
        .user()
        .wait_for_state(|s| s.is_connected())
        .await
        .unwrap();

    user.kick();
    bridge
        .user()
        .wait_for_state(|s| matches!(s, ConnectionState::Reconnecting { .. }))
        .await
        .unwrap();

    // accepted, but nothing goes out while the hub is down
    let (status, body) = set_account(&bridge, r#"{"accountId":"ACC-5"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], true);
    user.assert_quiet();

    // the reconnect sends the full set for the new account exactly once
    let mut replay = Vec::new();
    for _ in 0..4 {
        let (connection, target, _) = user.next_call().await;
        assert_eq!(connection, 2);
        replay.push(target);
    }
    assert_eq!(
        replay,
        vec![
            "SubscribeAccounts",
            "SubscribeOrders",
            "SubscribePositions",
            "SubscribeTrades"
        ]
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    user.assert_quiet();

    bridge.shutdown().await;
}
