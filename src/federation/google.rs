use super::client::{now, Credentials, TokenResponse};
use super::{
    fetch_json, IdentityProvider, ProviderError, ProviderFuture, ProviderProfile, ProviderToken,
};
use crate::verification::{TokenKind, VerificationCache};
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument};

pub const CHANNEL: &str = "google";
pub const OAUTH_BASE: &str = "https://oauth2.googleapis.com";
pub const API_BASE: &str = "https://www.googleapis.com";

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    email: String,
    #[serde(default)]
    name: String,
}

pub struct Google {
    http: reqwest::Client,
    credentials: Credentials,
    cache: Arc<VerificationCache>,
    oauth_base: String,
    api_base: String,
}

impl Google {
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        credentials: Credentials,
        cache: Arc<VerificationCache>,
    ) -> Self {
        Self {
            http,
            credentials,
            cache,
            oauth_base: OAUTH_BASE.to_string(),
            api_base: API_BASE.to_string(),
        }
    }

    #[must_use]
    pub fn with_base_urls(mut self, oauth_base: &str, api_base: &str) -> Self {
        oauth_base.clone_into(&mut self.oauth_base);
        api_base.clone_into(&mut self.api_base);
        self
    }

    #[instrument(skip(self, code))]
    async fn exchange(&self, code: &str) -> Result<ProviderToken, ProviderError> {
        let request = self
            .http
            .post(format!("{}/token", self.oauth_base))
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.credentials.client_id.as_str()),
                (
                    "client_secret",
                    self.credentials.client_secret.expose_secret(),
                ),
                ("redirect_uri", self.credentials.redirect_url.as_str()),
            ]);
        let response: TokenResponse = fetch_json(CHANNEL, request).await?;
        Ok(response.into_token(now(), None))
    }

    async fn profile_from_id_token(&self, id_token: &str) -> Result<ProviderProfile, ProviderError> {
        let info = self.cache.lookup(TokenKind::IdToken, id_token).await?;
        if info.audience() != Some(self.credentials.client_id.as_str()) {
            return Err(ProviderError::AudienceMismatch);
        }
        let email = info.email().ok_or(ProviderError::MissingEmail(CHANNEL))?;
        Ok(ProviderProfile {
            email: email.to_string(),
            display_name: info.name().unwrap_or(email).to_string(),
        })
    }

    async fn profile_from_userinfo(&self, access_token: &str) -> Result<ProviderProfile, ProviderError> {
        let info = self.cache.lookup(TokenKind::AccessToken, access_token).await?;
        if info.audience() != Some(self.credentials.client_id.as_str()) {
            return Err(ProviderError::AudienceMismatch);
        }

        let request = self
            .http
            .get(format!("{}/oauth2/v2/userinfo", self.api_base))
            .bearer_auth(access_token);
        let info: UserInfo = fetch_json(CHANNEL, request).await?;
        if info.email.is_empty() {
            return Err(ProviderError::MissingEmail(CHANNEL));
        }
        let display_name = if info.name.is_empty() {
            info.email.clone()
        } else {
            info.name
        };
        Ok(ProviderProfile {
            email: info.email,
            display_name,
        })
    }

    #[instrument(skip_all)]
    async fn profile(&self, token: &ProviderToken) -> Result<ProviderProfile, ProviderError> {
        if let Some(id_token) = token.id_token.as_deref() {
            debug!("resolving google profile from id token");
            return self.profile_from_id_token(id_token).await;
        }
        self.profile_from_userinfo(&token.access_token).await
    }
}

impl IdentityProvider for Google {
    fn channel(&self) -> &'static str {
        CHANNEL
    }

    fn client_id(&self) -> &str {
        &self.credentials.client_id
    }

    fn exchange_code<'a>(&'a self, code: &'a str) -> ProviderFuture<'a, ProviderToken> {
        Box::pin(self.exchange(code))
    }

    fn fetch_profile<'a>(&'a self, token: &'a ProviderToken) -> ProviderFuture<'a, ProviderProfile> {
        Box::pin(self.profile(token))
    }
}
