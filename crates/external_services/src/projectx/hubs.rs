//! ProjectX SignalR hub vocabulary.

use common::Invocation;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// E-mini S&P 500 front contract, the bridge's default instrument.
pub const DEFAULT_CONTRACT_ID: &str = "CON.F.US.EP.M25";

/// Server-to-client event names.
pub mod events {
    pub const GATEWAY_TRADE: &str = "GatewayTrade";
    pub const GATEWAY_QUOTE: &str = "GatewayQuote";
    pub const GATEWAY_DEPTH: &str = "GatewayDepth";
    pub const GATEWAY_USER_ACCOUNT: &str = "GatewayUserAccount";
    pub const GATEWAY_USER_ORDER: &str = "GatewayUserOrder";
    pub const GATEWAY_USER_POSITION: &str = "GatewayUserPosition";
    pub const GATEWAY_USER_TRADE: &str = "GatewayUserTrade";
}

/// Which hub a topic lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Hub {
    Market,
    User,
}

impl Hub {
    pub fn as_str(&self) -> &'static str {
        match self {
            Hub::Market => "market",
            Hub::User => "user",
        }
    }
}

impl fmt::Display for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A subscribable stream on one of the hubs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Trades,
    Quotes,
    Depth,
    Accounts,
    Orders,
    Positions,
    UserTrades,
}

impl Topic {
    /// Market topics in the order they are subscribed on open.
    pub const MARKET: [Topic; 3] = [Topic::Trades, Topic::Quotes, Topic::Depth];

    /// Topics keyed by an account id.
    pub const ACCOUNT_SCOPED: [Topic; 3] = [Topic::Orders, Topic::Positions, Topic::UserTrades];

    pub fn hub(&self) -> Hub {
        match self {
            Topic::Trades | Topic::Quotes | Topic::Depth => Hub::Market,
            _ => Hub::User,
        }
    }

    pub fn is_account_scoped(&self) -> bool {
        Self::ACCOUNT_SCOPED.contains(self)
    }

    pub fn subscribe_method(&self) -> &'static str {
        match self {
            Topic::Trades => "SubscribeContractTrades",
            Topic::Quotes => "SubscribeContractQuotes",
            Topic::Depth => "SubscribeContractMarketDepth",
            Topic::Accounts => "SubscribeAccounts",
            Topic::Orders => "SubscribeOrders",
            Topic::Positions => "SubscribePositions",
            Topic::UserTrades => "SubscribeTrades",
        }
    }

    pub fn unsubscribe_method(&self) -> &'static str {
        match self {
            Topic::Trades => "UnsubscribeContractTrades",
            Topic::Quotes => "UnsubscribeContractQuotes",
            Topic::Depth => "UnsubscribeContractMarketDepth",
            Topic::Accounts => "UnsubscribeAccounts",
            Topic::Orders => "UnsubscribeOrders",
            Topic::Positions => "UnsubscribePositions",
            Topic::UserTrades => "UnsubscribeTrades",
        }
    }

    /// Build the subscribe call. `key` is the contract or account id.
    pub fn subscribe(&self, key: Option<&str>) -> Invocation {
        Invocation::new(self.subscribe_method(), arguments(key))
    }

    pub fn unsubscribe(&self, key: Option<&str>) -> Invocation {
        Invocation::new(self.unsubscribe_method(), arguments(key))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Topic::Trades => "trades",
            Topic::Quotes => "quotes",
            Topic::Depth => "depth",
            Topic::Accounts => "accounts",
            Topic::Orders => "orders",
            Topic::Positions => "positions",
            Topic::UserTrades => "user_trades",
        };
        f.write_str(name)
    }
}

fn arguments(key: Option<&str>) -> Vec<Value> {
    key.map(key_argument).into_iter().collect()
}

/// Wire form of a subscription key.
///
/// Account ids are integers on the gateway, so a key in canonical decimal
/// form is sent as a JSON number. Anything else, including digits with a
/// leading zero, stays a string so the hub sees exactly the accepted id.
pub fn key_argument(key: &str) -> Value {
    if !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(n) = key.parse::<u64>() {
            if n.to_string() == key {
                return Value::from(n);
            }
        }
    }
    Value::String(key.to_string())
}
