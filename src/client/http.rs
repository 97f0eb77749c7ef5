//! Reqwest-based client for the backend's serverless functions.
//!
//! Every call carries the project's public `apikey` plus the user's bearer
//! token; the backend derives the caller from the token.

use crate::client::EntitlementBackend;
use crate::config::StreamgateConfig;
use crate::protocol::models::{
    parse_status_response, GrantTempAccessRequest, GrantTempAccessResponse,
    SubscriptionStatusRecord,
};
use crate::session::token_fingerprint;
use crate::StreamgateError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

/// Function path for the subscription status query.
pub const CHECK_SUBSCRIPTION_PATH: &str = "/functions/v1/check-subscription";

/// Function path for the temporary access grant.
pub const GRANT_TEMP_ACCESS_PATH: &str = "/functions/v1/grant-temp-access";

/// HTTP implementation of [`EntitlementBackend`].
pub struct RestBackend {
    client: Client,
    base_url: String,
    anon_key: String,
    user_agent: String,
}

impl RestBackend {
    /// Create a backend client from config.
    pub fn new(config: &StreamgateConfig) -> Result<Self, StreamgateError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                StreamgateError::BackendTransport(format!("Failed to create client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: config.backend_url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            user_agent: build_user_agent(config),
        })
    }

    /// Full URL of a function path.
    pub fn endpoint_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Get the configured base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json<B: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        access_token: &str,
        body: &B,
    ) -> Result<Vec<u8>, StreamgateError> {
        let url = self.endpoint_url(path);
        debug!(%url, token = %token_fingerprint(access_token), "Backend request");

        let response = self
            .client
            .post(&url)
            .header(USER_AGENT, &self.user_agent)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", access_token))
            .header("apikey", &self.anon_key)
            .json(body)
            .send()
            .await
            .map_err(|e| StreamgateError::BackendTransport(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            warn!(%url, status = status.as_u16(), "Backend returned non-2xx");
            return Err(error_for_status(status));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| StreamgateError::BackendTransport(format!("Failed to read body: {}", e)))?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl EntitlementBackend for RestBackend {
    async fn fetch_status(
        &self,
        user_id: &str,
        access_token: &str,
    ) -> Result<SubscriptionStatusRecord, StreamgateError> {
        let body = self
            .post_json(
                CHECK_SUBSCRIPTION_PATH,
                access_token,
                &serde_json::json!({ "user_id": user_id }),
            )
            .await?;
        parse_status_response(&body)
    }

    async fn grant_temp_access(
        &self,
        target_user_id: &str,
        days: u32,
        access_token: &str,
    ) -> Result<DateTime<Utc>, StreamgateError> {
        let request = GrantTempAccessRequest {
            user_id: target_user_id,
            days,
        };
        let body = self
            .post_json(GRANT_TEMP_ACCESS_PATH, access_token, &request)
            .await?;
        let response: GrantTempAccessResponse = serde_json::from_slice(&body).map_err(|e| {
            StreamgateError::ProtocolError(format!("Failed to parse grant response: {}", e))
        })?;
        Ok(response.expires_at)
    }
}

/// Map a non-success status to an error.
pub fn error_for_status(status: StatusCode) -> StreamgateError {
    match status {
        StatusCode::FORBIDDEN => {
            StreamgateError::Forbidden("backend rejected the caller's role".to_string())
        }
        other => StreamgateError::BackendStatus {
            status: other.as_u16(),
        },
    }
}

/// Build a User-Agent string from config.
///
/// Format: `<product> streamgate/<version>`
pub fn build_user_agent(config: &StreamgateConfig) -> String {
    format!(
        "{} streamgate/{}",
        config.user_agent_product,
        env!("CARGO_PKG_VERSION")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> StreamgateConfig {
        StreamgateConfig {
            backend_url: "https://project.example.co/".to_string(),
            anon_key: "anon-key".to_string(),
            user_agent_product: "catalog-web".to_string(),
            ..StreamgateConfig::default()
        }
    }

    #[test]
    fn test_build_user_agent_format() {
        let ua = build_user_agent(&test_config());
        assert_eq!(
            ua,
            format!("catalog-web streamgate/{}", env!("CARGO_PKG_VERSION"))
        );
    }

    #[test]
    fn test_client_creation_trims_trailing_slash() {
        let backend = RestBackend::new(&test_config()).unwrap();
        assert_eq!(backend.base_url(), "https://project.example.co");
        assert_eq!(
            backend.endpoint_url(CHECK_SUBSCRIPTION_PATH),
            "https://project.example.co/functions/v1/check-subscription"
        );
    }

    #[test]
    fn test_error_for_status() {
        assert!(matches!(
            error_for_status(StatusCode::FORBIDDEN),
            StreamgateError::Forbidden(_)
        ));
        assert!(matches!(
            error_for_status(StatusCode::BAD_GATEWAY),
            StreamgateError::BackendStatus { status: 502 }
        ));
        assert!(error_for_status(StatusCode::SERVICE_UNAVAILABLE).is_transient());
        assert!(!error_for_status(StatusCode::UNAUTHORIZED).is_transient());
    }

    #[test]
    fn test_grant_request_body_shape() {
        let request = GrantTempAccessRequest {
            user_id: "user-9",
            days: 7,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, serde_json::json!({"user_id": "user-9", "days": 7}));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transport_error() {
        let config = StreamgateConfig {
            backend_url: "http://127.0.0.1:9".to_string(),
            request_timeout: std::time::Duration::from_secs(2),
            ..test_config()
        };
        let backend = RestBackend::new(&config).unwrap();
        let result = backend.fetch_status("user-1", "token").await;
        assert!(matches!(result, Err(StreamgateError::BackendTransport(_))));
    }
}
