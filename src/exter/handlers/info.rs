use crate::apps::SYSTEM_APP_ID;
use crate::exter::{handlers::ApiError, Exter};
use crate::federation::{facebook, github, google, linkedin};
use axum::{extract::Extension, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, instrument};
use utoipa::ToSchema;

/// What a login page needs to render its buttons.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Info {
    app: String,
    login_channels: Vec<String>,
    rsa_public_key: String,
    google_client_id: String,
    github_client_id: String,
    facebook_app_id: String,
    linkedin_client_id: String,
}

#[utoipa::path(
    get,
    path= "/info",
    responses (
        (status = 200, description = "Public login configuration", body = Info),
        (status = 500, description = "Public key could not be exported", body = String)
    ),
    tag = "info",
)]
#[instrument(skip(state))]
pub async fn info(Extension(state): Extension<Arc<Exter>>) -> Result<Json<Info>, ApiError> {
    let rsa_public_key = state.sessions.codec().public_key_pem().map_err(|e| {
        error!("Failed to export public key: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Error exporting public key".to_string(),
        )
    })?;

    let client_id = |channel: &str| state.providers.client_id(channel).unwrap_or_default();

    Ok(Json(Info {
        app: SYSTEM_APP_ID.to_string(),
        login_channels: state
            .login_channels
            .iter()
            .filter(|c| state.is_channel_enabled(c))
            .cloned()
            .collect(),
        rsa_public_key,
        google_client_id: client_id(google::CHANNEL),
        github_client_id: client_id(github::CHANNEL),
        facebook_app_id: client_id(facebook::CHANNEL),
        linkedin_client_id: client_id(linkedin::CHANNEL),
    }))
}
