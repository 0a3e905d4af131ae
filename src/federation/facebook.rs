use super::client::{now, Credentials, TokenResponse};
use super::{
    fetch_json, IdentityProvider, ProviderError, ProviderFuture, ProviderProfile, ProviderToken,
};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::instrument;

pub const CHANNEL: &str = "facebook";
pub const GRAPH_BASE: &str = "https://graph.facebook.com";

#[derive(Debug, Deserialize)]
struct Me {
    #[serde(default)]
    email: String,
    #[serde(default)]
    name: String,
}

/// The Facebook JS SDK hands the client a short lived user token; login
/// exchanges it for a long lived one.
pub struct Facebook {
    http: reqwest::Client,
    credentials: Credentials,
    graph_base: String,
}

impl Facebook {
    #[must_use]
    pub fn new(http: reqwest::Client, credentials: Credentials) -> Self {
        Self {
            http,
            credentials,
            graph_base: GRAPH_BASE.to_string(),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, graph_base: &str) -> Self {
        graph_base.clone_into(&mut self.graph_base);
        self
    }

    #[instrument(skip_all)]
    async fn exchange(&self, client_token: &str) -> Result<ProviderToken, ProviderError> {
        let request = self
            .http
            .get(format!("{}/oauth/access_token", self.graph_base))
            .query(&[
                ("grant_type", "fb_exchange_token"),
                ("client_id", self.credentials.client_id.as_str()),
                (
                    "client_secret",
                    self.credentials.client_secret.expose_secret(),
                ),
                ("fb_exchange_token", client_token),
            ]);
        let response: TokenResponse = fetch_json(CHANNEL, request).await?;
        Ok(response.into_token(now(), None))
    }

    #[instrument(skip_all)]
    async fn profile(&self, token: &ProviderToken) -> Result<ProviderProfile, ProviderError> {
        let request = self
            .http
            .get(format!("{}/me", self.graph_base))
            .query(&[
                ("fields", "id,name,email"),
                ("access_token", token.access_token.as_str()),
            ]);
        let me: Me = fetch_json(CHANNEL, request).await?;
        if me.email.is_empty() {
            return Err(ProviderError::MissingEmail(CHANNEL));
        }
        let display_name = if me.name.is_empty() {
            me.email.clone()
        } else {
            me.name
        };
        Ok(ProviderProfile {
            email: me.email,
            display_name,
        })
    }
}

impl IdentityProvider for Facebook {
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

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> Facebook {
        Facebook::new(
            reqwest::Client::new(),
            Credentials::new("fb-app", "fb-secret", "unused"),
        )
        .with_base_url(&server.uri())
    }

    #[tokio::test]
    async fn exchanges_short_lived_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oauth/access_token"))
            .and(query_param("grant_type", "fb_exchange_token"))
            .and(query_param("client_id", "fb-app"))
            .and(query_param("fb_exchange_token", "short"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "long",
                "token_type": "bearer",
                "expires_in": 5_183_944
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = provider(&server).exchange_code("short").await.unwrap();
        assert_eq!(token.access_token, "long");
        assert_eq!(token.token_type, "bearer");
    }

    #[tokio::test]
    async fn fetches_profile_from_graph() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me"))
            .and(query_param("access_token", "long"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "1",
                "name": "Carol",
                "email": "carol@example.com"
            })))
            .mount(&server)
            .await;

        let profile = provider(&server)
            .fetch_profile(&ProviderToken::bearer("long"))
            .await
            .unwrap();
        assert_eq!(profile.email, "carol@example.com");
        assert_eq!(profile.display_name, "Carol");
    }

    #[tokio::test]
    async fn profile_without_email_is_refused() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "1", "name": "Carol"})))
            .mount(&server)
            .await;

        assert!(matches!(
            provider(&server)
                .fetch_profile(&ProviderToken::bearer("long"))
                .await,
            Err(ProviderError::MissingEmail("facebook"))
        ));
    }
}
