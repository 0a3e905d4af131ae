use super::client::{now, Credentials, TokenResponse};
use super::{
    fetch_json, IdentityProvider, ProviderError, ProviderFuture, ProviderProfile, ProviderToken,
};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::instrument;

pub const CHANNEL: &str = "linkedin";
pub const WEB_BASE: &str = "https://www.linkedin.com";
pub const API_BASE: &str = "https://api.linkedin.com";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Me {
    #[serde(default)]
    localized_first_name: String,
    #[serde(default)]
    localized_last_name: String,
}

#[derive(Debug, Deserialize)]
struct EmailElements {
    #[serde(default)]
    elements: Vec<EmailElement>,
}

#[derive(Debug, Deserialize)]
struct EmailElement {
    #[serde(rename = "handle~")]
    handle: Option<EmailHandle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmailHandle {
    email_address: String,
}

pub struct LinkedIn {
    http: reqwest::Client,
    credentials: Credentials,
    web_base: String,
    api_base: String,
}

impl LinkedIn {
    #[must_use]
    pub fn new(http: reqwest::Client, credentials: Credentials) -> Self {
        Self {
            http,
            credentials,
            web_base: WEB_BASE.to_string(),
            api_base: API_BASE.to_string(),
        }
    }

    #[must_use]
    pub fn with_base_urls(mut self, web_base: &str, api_base: &str) -> Self {
        web_base.clone_into(&mut self.web_base);
        api_base.clone_into(&mut self.api_base);
        self
    }

    #[instrument(skip_all)]
    async fn exchange(&self, code: &str) -> Result<ProviderToken, ProviderError> {
        let request = self
            .http
            .post(format!("{}/oauth/v2/accessToken", self.web_base))
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.credentials.redirect_url.as_str()),
                ("client_id", self.credentials.client_id.as_str()),
                (
                    "client_secret",
                    self.credentials.client_secret.expose_secret(),
                ),
            ]);
        let response: TokenResponse = fetch_json(CHANNEL, request).await?;
        Ok(response.into_token(now(), None))
    }

    #[instrument(skip_all)]
    async fn profile(&self, token: &ProviderToken) -> Result<ProviderProfile, ProviderError> {
        let me: Me = fetch_json(
            CHANNEL,
            self.http
                .get(format!("{}/v2/me", self.api_base))
                .bearer_auth(&token.access_token),
        )
        .await?;

        let emails: EmailElements = fetch_json(
            CHANNEL,
            self.http
                .get(format!("{}/v2/emailAddress", self.api_base))
                .query(&[("q", "members"), ("projection", "(elements*(handle~))")])
                .bearer_auth(&token.access_token),
        )
        .await?;

        let email = emails
            .elements
            .into_iter()
            .filter_map(|e| e.handle)
            .map(|h| h.email_address)
            .find(|e| !e.is_empty())
            .ok_or(ProviderError::MissingEmail(CHANNEL))?;

        let full_name = format!("{} {}", me.localized_first_name, me.localized_last_name);
        let full_name = full_name.trim();
        Ok(ProviderProfile {
            display_name: if full_name.is_empty() {
                email.clone()
            } else {
                full_name.to_string()
            },
            email,
        })
    }
}

impl IdentityProvider for LinkedIn {
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
