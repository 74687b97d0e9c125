//! Bridge configuration from the environment.

use crate::error::{Error, Result};
use common::ReconnectPolicy;
use external_services::projectx::{API_BASE_URL, DEFAULT_CONTRACT_ID};
use std::time::Duration;

/// Default event sink (the local receiver's `/data_stream` route).
pub const DEFAULT_SINK_URL: &str = "http://localhost:5000/data_stream";

pub const DEFAULT_CONTROL_PORT: u16 = 3001;

/// How the bridge authenticates against the hubs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Ready-made session token.
    Token(String),
    /// Exchanged for a token through `/api/Auth/loginKey` at startup.
    ApiKey { user_name: String, api_key: String },
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub credentials: Credentials,
    pub api_url: String,
    pub market_hub_url: String,
    pub user_hub_url: String,
    pub contract_id: String,
    pub sink_url: String,
    pub control_port: u16,
    pub reconnect: ReconnectPolicy,
    pub shutdown_timeout: Duration,
    pub metrics_port: Option<u16>,
}

impl BridgeConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let require = |key: &str| get(key).ok_or_else(|| Error::MissingEnv(key.to_string()));

        let credentials = match get("PROJECTX_TOKEN") {
            Some(token) => Credentials::Token(token),
            None => match (get("PROJECTX_USERNAME"), get("PROJECTX_API_KEY")) {
                (Some(user_name), Some(api_key)) => Credentials::ApiKey { user_name, api_key },
                _ => {
                    return Err(Error::MissingEnv(
                        "PROJECTX_TOKEN (or PROJECTX_USERNAME and PROJECTX_API_KEY)".to_string(),
                    ))
                }
            },
        };

        let market_hub_url = require("MARKET_HUB_URL")?;
        let user_hub_url = require("USER_HUB_URL")?;

        let control_port = parse_or(get("CONTROL_PORT"), "CONTROL_PORT", DEFAULT_CONTROL_PORT)?;
        let max_attempts = parse_or(get("RECONNECT_MAX_ATTEMPTS"), "RECONNECT_MAX_ATTEMPTS", 5u32)?;
        let delay_secs = parse_or(get("RECONNECT_DELAY_SECS"), "RECONNECT_DELAY_SECS", 5u64)?;
        let shutdown_secs = parse_or(get("SHUTDOWN_TIMEOUT_SECS"), "SHUTDOWN_TIMEOUT_SECS", 10u64)?;
        let metrics_port = match get("METRICS_PORT") {
            Some(raw) => Some(parse(&raw, "METRICS_PORT")?),
            None => None,
        };

        Ok(Self {
            credentials,
            api_url: get("PROJECTX_API_URL").unwrap_or_else(|| API_BASE_URL.to_string()),
            market_hub_url,
            user_hub_url,
            contract_id: get("CONTRACT_ID").unwrap_or_else(|| DEFAULT_CONTRACT_ID.to_string()),
            sink_url: get("SINK_URL").unwrap_or_else(|| DEFAULT_SINK_URL.to_string()),
            control_port,
            reconnect: ReconnectPolicy {
                max_attempts,
                delay: Duration::from_secs(delay_secs),
            },
            shutdown_timeout: Duration::from_secs(shutdown_secs),
            metrics_port,
        })
    }
}

fn parse<T: std::str::FromStr>(raw: &str, key: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| Error::InvalidConfig(format!("{} has an invalid value: {}", key, raw)))
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T> {
    match raw {
        Some(raw) => parse(&raw, key),
        None => Ok(default),
    }
}
