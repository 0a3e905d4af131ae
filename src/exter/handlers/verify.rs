use crate::exter::{
    handlers::{active_app, session_error, substitute_token, ApiError},
    handlers::login::LoginResponse,
    Exter,
};
use crate::session::LoginStatus;
use crate::storage::Entity;
use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize, Debug)]
pub struct VerifyRequest {
    /// Token returned by /login
    token: String,
    app: String,
    #[serde(default)]
    return_url: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Pending {
    message: String,
}

#[utoipa::path(
    post,
    path= "/verifyLoginToken",
    request_body = VerifyRequest,
    responses (
        (status = 200, description = "Login finished, returns the login token", body = LoginResponse),
        (status = 202, description = "Login still pending", body = Pending),
        (status = 403, description = "Token expired, invalid or for another app", body = String)
    ),
    tag = "login",
)]
#[instrument(skip(state, payload), fields(app = %payload.app))]
pub async fn verify(
    Extension(state): Extension<Arc<Exter>>,
    Json(payload): Json<VerifyRequest>,
) -> Result<Response, ApiError> {
    let app = active_app(&state, &payload.app).await?;
    let return_url = app
        .generate_return_url(&payload.return_url)
        .ok_or_else(|| (StatusCode::FORBIDDEN, "Invalid return url".to_string()))?;

    match state.sessions.poll_login(&payload.token, app.id()).await {
        Ok(LoginStatus::Pending) => Ok((
            StatusCode::ACCEPTED,
            Json(Pending {
                message: "login pending".to_string(),
            }),
        )
            .into_response()),
        Ok(LoginStatus::Ready(issued)) => {
            debug!("login ready for session {}", issued.claims.jti);
            Ok(Json(LoginResponse {
                return_url: substitute_token(&return_url, &issued.token),
                token: issued.token,
            })
            .into_response())
        }
        Err(e) => Err(session_error(&e, StatusCode::FORBIDDEN)),
    }
}
