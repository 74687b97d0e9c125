//! ProjectX REST API types.

use serde::{Deserialize, Serialize};

/// Body of `POST /api/Auth/loginKey`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginKeyRequest {
    pub user_name: String,
    pub api_key: String,
}

/// Response of `POST /api/Auth/loginKey`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginKeyResponse {
    pub token: Option<String>,
    #[serde(default)]
    pub success: bool,
    pub error_code: Option<i32>,
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_is_camel_case() {
        let body = serde_json::to_value(LoginKeyRequest {
            user_name: "trader".to_string(),
            api_key: "key".to_string(),
        })
        .unwrap();
        assert_eq!(body["userName"], "trader");
        assert_eq!(body["apiKey"], "key");
    }

    #[test]
    fn test_failed_response_parses() {
        let resp: LoginKeyResponse = serde_json::from_str(
            r#"{"token":null,"success":false,"errorCode":3,"errorMessage":"Invalid credentials"}"#,
        )
        .unwrap();
        assert!(!resp.success);
        assert_eq!(resp.error_code, Some(3));
        assert!(resp.token.is_none());
    }
}
