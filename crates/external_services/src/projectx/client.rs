//! ProjectX REST API client.

use crate::error::{Error, Result};
use crate::projectx::types::{LoginKeyRequest, LoginKeyResponse};
use tracing::{debug, info};

/// Base URL for the TopstepX gateway API.
pub const API_BASE_URL: &str = "https://api.topstepx.com";

/// ProjectX REST API client.
#[derive(Debug, Clone)]
pub struct ProjectXClient {
    http: reqwest::Client,
    base_url: String,
}

impl Default for ProjectXClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectXClient {
    /// Create a new client against the production gateway.
    pub fn new() -> Self {
        Self::with_base_url(API_BASE_URL)
    }

    /// Create a new client with custom base URL.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Exchange a user name and API key for a session token.
    ///
    /// The token is what the hubs expect as `access_token`.
    pub async fn login_key(&self, user_name: &str, api_key: &str) -> Result<String> {
        let url = format!("{}/api/Auth/loginKey", self.base_url);
        debug!("Logging in {} via {}", user_name, url);

        let body = LoginKeyRequest {
            user_name: user_name.to_string(),
            api_key: api_key.to_string(),
        };
        let response = self.http.post(&url).json(&body).send().await?;

        if !response.status().is_success() {
            return Err(Error::Api(format!(
                "API returned status {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }

        let login: LoginKeyResponse = response.json().await?;
        match login.token {
            Some(token) if login.success && !token.is_empty() => {
                info!("Authenticated {} against {}", user_name, self.base_url);
                Ok(token)
            }
            _ => Err(Error::Auth {
                code: login.error_code,
                message: login
                    .error_message
                    .unwrap_or_else(|| "no token in response".to_string()),
            }),
        }
    }
}
