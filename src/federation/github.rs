use super::client::{now, Credentials, TokenResponse};
use super::{
    fetch_json, IdentityProvider, ProviderError, ProviderFuture, ProviderProfile, ProviderToken,
};
use reqwest::header::ACCEPT;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{debug, instrument};

pub const CHANNEL: &str = "github";
pub const WEB_BASE: &str = "https://github.com";
pub const API_BASE: &str = "https://api.github.com";

/// GitHub access tokens do not expire on their own.
pub const TOKEN_TTL: i64 = 3600;

#[derive(Debug, Deserialize)]
struct GitHubUser {
    login: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubEmail {
    email: String,
    #[serde(default)]
    primary: bool,
    #[serde(default)]
    verified: bool,
}

pub struct GitHub {
    http: reqwest::Client,
    credentials: Credentials,
    web_base: String,
    api_base: String,
}

impl GitHub {
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

    fn api(&self, path: &str, token: &ProviderToken) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}{path}", self.api_base))
            .header(ACCEPT, "application/vnd.github+json")
            .header(
                reqwest::header::AUTHORIZATION,
                format!("token {}", token.access_token),
            )
    }

    #[instrument(skip_all)]
    async fn exchange(&self, code: &str) -> Result<ProviderToken, ProviderError> {
        let request = self
            .http
            .post(format!("{}/login/oauth/access_token", self.web_base))
            .header(ACCEPT, "application/json")
            .form(&[
                ("code", code),
                ("client_id", self.credentials.client_id.as_str()),
                (
                    "client_secret",
                    self.credentials.client_secret.expose_secret(),
                ),
                ("redirect_uri", self.credentials.redirect_url.as_str()),
            ]);
        let response: TokenResponse = fetch_json(CHANNEL, request).await?;
        if response.access_token.is_empty() {
            return Err(ProviderError::InvalidResponse {
                provider: CHANNEL,
                reason: "empty access token".to_string(),
            });
        }
        Ok(response.into_token(now(), Some(TOKEN_TTL)))
    }

    async fn primary_email(&self, token: &ProviderToken) -> Result<String, ProviderError> {
        let emails: Vec<GitHubEmail> = fetch_json(CHANNEL, self.api("/user/emails", token)).await?;
        emails
            .into_iter()
            .find(|e| e.primary && e.verified)
            .map(|e| e.email)
            .ok_or(ProviderError::MissingEmail(CHANNEL))
    }

    #[instrument(skip_all)]
    async fn profile(&self, token: &ProviderToken) -> Result<ProviderProfile, ProviderError> {
        let user: GitHubUser = fetch_json(CHANNEL, self.api("/user", token)).await?;
        let email = match user.email.filter(|e| !e.is_empty()) {
            Some(email) => email,
            None => {
                debug!(login = %user.login, "github email is private, reading /user/emails");
                self.primary_email(token).await?
            }
        };
        let display_name = user
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or(user.login);
        Ok(ProviderProfile {
            email,
            display_name,
        })
    }
}

impl IdentityProvider for GitHub {
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
