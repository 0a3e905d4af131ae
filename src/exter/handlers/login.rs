use crate::exter::{
    handlers::{active_app, substitute_token, ApiError},
    Exter,
};
use crate::storage::Entity;
use axum::{extract::Extension, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize, Debug)]
pub struct LoginRequest {
    app: String,
    /// Provider channel, e.g. `google` or `github`
    source: String,
    /// Authorization code (or client token for facebook) from the provider
    code: String,
    #[serde(default)]
    return_url: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    pub token: String,
    pub return_url: String,
}

#[utoipa::path(
    post,
    path= "/login",
    request_body = LoginRequest,
    responses (
        (status = 200, description = "Pre-login token, poll /verifyLoginToken with it", body = LoginResponse),
        (status = 400, description = "Unsupported or disabled source", body = String),
        (status = 403, description = "Invalid app, return url or provider code", body = String),
        (status = 500, description = "Session could not be created", body = String)
    ),
    tag = "login",
)]
#[instrument(skip(state, payload), fields(app = %payload.app, source = %payload.source))]
pub async fn login(
    Extension(state): Extension<Arc<Exter>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let app = active_app(&state, &payload.app).await?;

    let provider = match state.providers.get(&payload.source) {
        Some(provider) if state.is_channel_enabled(&payload.source) => provider,
        _ => {
            debug!("unsupported source: {}", payload.source);
            return Err((StatusCode::BAD_REQUEST, "Unsupported source".to_string()));
        }
    };
    if !app.is_source_enabled(&payload.source) {
        debug!("source {} is not enabled for {}", payload.source, app.id());
        return Err((StatusCode::BAD_REQUEST, "Source not enabled".to_string()));
    }

    let return_url = app.generate_return_url(&payload.return_url).ok_or_else(|| {
        debug!("rejected return url: {}", payload.return_url);
        (StatusCode::FORBIDDEN, "Invalid return url".to_string())
    })?;

    let provider_token = provider.exchange_code(&payload.code).await.map_err(|e| {
        warn!("Code exchange failed: {}", e);
        (StatusCode::FORBIDDEN, "Invalid code".to_string())
    })?;

    let bytes = provider_token.to_bytes().map_err(|e| {
        error!("Failed to serialize provider token: {}", e);
        internal_error()
    })?;
    let issued = state
        .sessions
        .begin_pre_login(app.id(), provider.channel(), &bytes)
        .await
        .map_err(|e| {
            error!("Failed to create pre-login session: {}", e);
            internal_error()
        })?;

    if !state
        .reconciler
        .spawn(&issued.claims.jti, provider.channel())
    {
        warn!("Reconciliation not scheduled for {}", issued.claims.jti);
    }

    Ok(Json(LoginResponse {
        return_url: substitute_token(&return_url, &issued.token),
        token: issued.token,
    }))
}

fn internal_error() -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Error creating session".to_string(),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crate::exter::handlers::test_support::{call, post_json, test_app};
    use crate::session::LoginStatus;
    use crate::token::TokenType;
    use axum::http::StatusCode;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn login_issues_pre_login_token() {
        let app = test_app().await;
        let (status, body) = call(
            &app.router,
            post_json(
                "/login",
                &json!({"app": "app1", "source": "github", "code": "abc", "return_url": "/cb?t=${token}"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let token = body["token"].as_str().unwrap();
        assert_eq!(
            body["return_url"],
            format!("https://app1.example.com/cb?t={token}")
        );
        let claims = app.state.sessions.codec().verify(token).unwrap();
        assert_eq!(claims.token_type, TokenType::PreLogin);
        assert_eq!(claims.aud, "app1");
        assert_eq!(claims.sub, "github");

        assert!(app
            .state
            .reconciler
            .pool()
            .shutdown(Duration::from_secs(5))
            .await);
        assert!(matches!(
            app.state.sessions.poll_login(token, "app1").await.unwrap(),
            LoginStatus::Ready(_)
        ));
    }

    #[tokio::test]
    async fn login_rejects_bad_requests() {
        let app = test_app().await;
        let cases = [
            (json!({"app": "nope", "source": "github", "code": "abc"}), StatusCode::FORBIDDEN),
            (json!({"app": "disabled", "source": "github", "code": "abc"}), StatusCode::FORBIDDEN),
            (json!({"app": "app1", "source": "myspace", "code": "abc"}), StatusCode::BAD_REQUEST),
            // configured but no provider behind it
            (json!({"app": "app1", "source": "google", "code": "abc"}), StatusCode::BAD_REQUEST),
            (
                json!({"app": "app1", "source": "github", "code": "abc", "return_url": "https://evil.example.org/"}),
                StatusCode::FORBIDDEN,
            ),
            (json!({"app": "app1", "source": "github", "code": "bad"}), StatusCode::FORBIDDEN),
        ];
        for (request, expected) in cases {
            let (status, _) = call(&app.router, post_json("/login", &request)).await;
            assert_eq!(status, expected, "{request}");
        }
        assert_eq!(app.state.reconciler.pool().in_flight(), 0);
    }

    #[tokio::test]
    async fn login_requires_source_enabled_for_app() {
        let app = test_app().await;
        let mut other = crate::apps::App::new("app2", "owner@example.com")
            .with_default_return_url("https://app2.example.com/");
        app.state.apps.save(&mut other).await.unwrap();

        let (status, _) = call(
            &app.router,
            post_json("/login", &json!({"app": "app2", "source": "github", "code": "abc"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
