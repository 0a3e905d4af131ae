//! HTTP plumbing shared by the provider adapters.

use super::{ProviderError, ProviderToken};
use crate::APP_USER_AGENT;
use secrecy::SecretString;
use serde::{de::DeserializeOwned, Deserialize};
use std::time::Duration;
use tracing::debug;

/// Per-call timeout for every outbound provider request.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// OAuth client registration for one provider.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_url: String,
}

impl Credentials {
    #[must_use]
    pub fn new(client_id: &str, client_secret: &str, redirect_url: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            client_secret: SecretString::from(client_secret.to_string()),
            redirect_url: redirect_url.to_string(),
        }
    }
}

/// Build the client used for provider calls.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialized.
pub fn http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(APP_USER_AGENT)
        .timeout(HTTP_TIMEOUT)
        .build()
}

/// Send `request` and decode a JSON body, mapping non 2xx statuses to
/// `Upstream`.
pub(crate) async fn fetch_json<T: DeserializeOwned>(
    provider: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<T, ProviderError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        debug!(provider, status = status.as_u16(), "provider call failed");
        return Err(ProviderError::Upstream {
            provider,
            status: status.as_u16(),
        });
    }
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| ProviderError::InvalidResponse {
        provider,
        reason: e.to_string(),
    })
}

/// RFC 6749 token endpoint response.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub id_token: Option<String>,
}

impl TokenResponse {
    /// `default_ttl` applies when the provider does not say how long the
    /// token lives.
    pub fn into_token(self, now: i64, default_ttl: Option<i64>) -> ProviderToken {
        ProviderToken {
            access_token: self.access_token,
            token_type: self.token_type.unwrap_or_default(),
            refresh_token: self.refresh_token.unwrap_or_default(),
            expiry: self.expires_in.or(default_ttl).map(|ttl| now + ttl),
            id_token: self.id_token.filter(|t| !t.is_empty()),
        }
    }
}

pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn token_response_expiry() {
        let response: TokenResponse = serde_json::from_str(
            r#"{"access_token":"at","token_type":"bearer","expires_in":60,"id_token":""}"#,
        )
        .unwrap();
        let token = response.into_token(1_000, Some(3600));
        assert_eq!(token.access_token, "at");
        assert_eq!(token.token_type, "bearer");
        assert_eq!(token.expiry, Some(1_060));
        assert_eq!(token.id_token, None);

        let response: TokenResponse = serde_json::from_str(r#"{"access_token":"gh"}"#).unwrap();
        assert_eq!(response.into_token(1_000, Some(3600)).expiry, Some(4_600));
    }

    #[test]
    fn credentials_debug_hides_secret() {
        let creds = Credentials::new("id", "very-secret", "postmessage");
        assert!(!format!("{creds:?}").contains("very-secret"));
    }
}
