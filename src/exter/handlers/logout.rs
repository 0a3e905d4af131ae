use crate::exter::{
    handlers::{bearer_token, session_error, ApiError},
    Exter,
};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
};
use std::sync::Arc;
use tracing::{debug, instrument};

#[utoipa::path(
    post,
    path= "/logout",
    responses (
        (status = 204, description = "Session removed"),
        (status = 401, description = "Missing or invalid token", body = String)
    ),
    tag = "session",
)]
#[instrument(skip(state, headers))]
pub async fn logout(
    Extension(state): Extension<Arc<Exter>>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let token = bearer_token(&headers)
        .ok_or_else(|| (StatusCode::UNAUTHORIZED, "Missing token".to_string()))?;

    let removed = state
        .sessions
        .end_session(token)
        .await
        .map_err(|e| session_error(&e, StatusCode::UNAUTHORIZED))?;
    if !removed {
        debug!("logout for a session that was already gone");
    }

    Ok(StatusCode::NO_CONTENT)
}
