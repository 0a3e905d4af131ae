use crate::exter::{
    handlers::{login_user, ApiError},
    Exter,
};
use axum::{extract::Extension, http::HeaderMap, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionInfo {
    uid: String,
    display_name: String,
    channel: String,
    app: String,
    exp: i64,
    /// The client should send the user through login again soon
    near_expiry: bool,
}

#[utoipa::path(
    get,
    path= "/session",
    responses (
        (status = 200, description = "Current login session", body = SessionInfo),
        (status = 401, description = "Missing, invalid or expired token", body = String)
    ),
    tag = "session",
)]
#[instrument(skip(state, headers))]
pub async fn session(
    Extension(state): Extension<Arc<Exter>>,
    headers: HeaderMap,
) -> Result<Json<SessionInfo>, ApiError> {
    let (claims, user) = login_user(&state, &headers).await?;

    let near_expiry =
        claims.is_near_expiry(state.sessions.now(), state.sessions.config().near_expiry);

    Ok(Json(SessionInfo {
        uid: claims.uid,
        display_name: user.display_name().to_string(),
        channel: claims.sub,
        app: claims.aud,
        exp: claims.exp,
        near_expiry,
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crate::exter::handlers::test_support::{call, test_app};
    use crate::session::{DEFAULT_LOGIN_TTL, DEFAULT_NEAR_EXPIRY};
    use axum::{body::Body, http::Request, http::StatusCode};

    fn get_session(token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/session");
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn session_describes_login() {
        let app = test_app().await;
        let sessions = &app.state.sessions;
        sessions
            .users()
            .resolve_or_create("octo@example.com", "Octo")
            .await
            .unwrap();
        let pre = sessions.begin_pre_login("app1", "github", b"{}").await.unwrap();
        let login = sessions
            .promote_to_login(&pre.claims.jti, "octo@example.com", "Octo", b"{}")
            .await
            .unwrap();

        let (status, body) = call(&app.router, get_session(Some(&login.token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["uid"], "octo@example.com");
        assert_eq!(body["display_name"], "Octo");
        assert_eq!(body["channel"], "github");
        assert_eq!(body["app"], "app1");
        assert_eq!(body["near_expiry"], false);

        app.clock.advance(DEFAULT_LOGIN_TTL - DEFAULT_NEAR_EXPIRY + 1);
        let (_, body) = call(&app.router, get_session(Some(&login.token))).await;
        assert_eq!(body["near_expiry"], true);

        app.clock.advance(DEFAULT_NEAR_EXPIRY);
        let (status, _) = call(&app.router, get_session(Some(&login.token))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn session_requires_login_token() {
        let app = test_app().await;
        let (status, _) = call(&app.router, get_session(None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let pre = app
            .state
            .sessions
            .begin_pre_login("app1", "github", b"{}")
            .await
            .unwrap();
        let (status, body) = call(&app.router, get_session(Some(&pre.token))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, serde_json::Value::Null);
    }
}
