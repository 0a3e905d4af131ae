use crate::apps::{App, SYSTEM_APP_ID};
use crate::exter::{
    handlers::{login_user, ApiError},
    Exter,
};
use crate::storage::{Entity, StoreError};
use crate::token::TokenCodec;
use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    Json,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, error, info, instrument};
use utoipa::ToSchema;

/// Settings an owner submits when registering or updating an app.
#[derive(ToSchema, Deserialize, Debug, Default)]
pub struct AppSettings {
    #[serde(default)]
    is_active: bool,
    #[serde(default)]
    description: String,
    /// Absolute http(s) url, or empty
    #[serde(default)]
    default_return_url: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    id_sources: BTreeMap<String, bool>,
    #[serde(default)]
    rsa_public_key: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct RegisterApp {
    /// Letters, digits and underscores; stored lower case
    id: String,
    #[serde(flatten)]
    settings: AppSettings,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AppConfig {
    is_active: bool,
    description: String,
    default_return_url: String,
    tags: Vec<String>,
    id_sources: BTreeMap<String, bool>,
    rsa_public_key: String,
    /// Sources enabled by both the app and this deployment
    sources: BTreeMap<String, bool>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AppInfo {
    id: String,
    config: AppConfig,
}

fn app_info(state: &Exter, app: &App) -> AppInfo {
    let sources = app
        .identity_sources()
        .iter()
        .filter(|(source, enabled)| **enabled && state.is_channel_enabled(source))
        .map(|(source, _)| (source.clone(), true))
        .collect();
    AppInfo {
        id: app.id().to_string(),
        config: AppConfig {
            is_active: app.is_active(),
            description: app.description().to_string(),
            default_return_url: app.default_return_url().to_string(),
            tags: app.tags().to_vec(),
            id_sources: app.identity_sources().clone(),
            rsa_public_key: app.rsa_public_key().to_string(),
            sources,
        },
    }
}

fn valid_app_id(id: &str) -> bool {
    Regex::new(r"^[0-9A-Za-z_]+$").map_or(false, |re| re.is_match(id))
}

fn valid_return_url(url: &str) -> bool {
    url.is_empty() || Regex::new(r"(?i)^https?://").map_or(false, |re| re.is_match(url))
}

fn bad_request(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, message.to_string())
}

fn not_found(id: &str) -> ApiError {
    (StatusCode::NOT_FOUND, format!("App {id} not found"))
}

fn storage_error(id: &str, e: &StoreError) -> ApiError {
    error!("Storage error for app {}: {}", id, e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Error accessing app".to_string(),
    )
}

/// Check `settings` and write them onto `app`, replacing what was there.
fn apply(app: App, settings: AppSettings) -> Result<App, ApiError> {
    let default_return_url = settings.default_return_url.trim();
    if !valid_return_url(default_return_url) {
        return Err(bad_request("Invalid default_return_url"));
    }
    let rsa_public_key = settings.rsa_public_key.as_str();
    if !rsa_public_key.trim().is_empty() && TokenCodec::from_public_key_pem(rsa_public_key).is_err()
    {
        return Err(bad_request("Invalid rsa_public_key"));
    }
    let tags = settings
        .tags
        .iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect();

    Ok(app
        .with_active(settings.is_active)
        .with_description(settings.description.trim())
        .with_default_return_url(default_return_url)
        .with_tags(tags)
        .with_rsa_public_key(rsa_public_key)
        .with_source_flags(settings.id_sources))
}

async fn load(state: &Exter, id: &str) -> Result<App, ApiError> {
    match state.apps.get(id).await {
        Ok(Some(app)) => Ok(app),
        Ok(None) => Err(not_found(id)),
        Err(e) => Err(storage_error(id, &e)),
    }
}

/// Load an app the caller may modify.
async fn load_owned(state: &Exter, id: &str, owner_id: &str) -> Result<App, ApiError> {
    let app = load(state, id).await?;
    if app.owner_id() != owner_id {
        debug!("{} does not own app {}", owner_id, id);
        return Err((
            StatusCode::FORBIDDEN,
            format!("App {id} does not belong to user"),
        ));
    }
    Ok(app)
}

#[utoipa::path(
    get,
    path= "/app/{id}",
    params(("id" = String, Path, description = "App id")),
    responses (
        (status = 200, description = "Public app configuration", body = AppInfo),
        (status = 404, description = "Unknown app", body = String)
    ),
    tag = "apps",
)]
#[instrument(skip(state))]
pub async fn get_app(
    Extension(state): Extension<Arc<Exter>>,
    Path(id): Path<String>,
) -> Result<Json<AppInfo>, ApiError> {
    let app = load(&state, id.trim()).await?;
    Ok(Json(app_info(&state, &app)))
}

#[utoipa::path(
    get,
    path= "/myApp",
    responses (
        (status = 200, description = "Apps owned by the caller", body = [AppInfo]),
        (status = 401, description = "Missing, invalid or expired token", body = String)
    ),
    tag = "apps",
)]
#[instrument(skip(state, headers))]
pub async fn my_apps(
    Extension(state): Extension<Arc<Exter>>,
    headers: HeaderMap,
) -> Result<Json<Vec<AppInfo>>, ApiError> {
    let (claims, _) = login_user(&state, &headers).await?;
    let apps = state
        .apps
        .owned_by(&claims.uid)
        .await
        .map_err(|e| storage_error(&claims.uid, &e))?;
    Ok(Json(apps.iter().map(|app| app_info(&state, app)).collect()))
}

#[utoipa::path(
    get,
    path= "/myApp/{id}",
    params(("id" = String, Path, description = "App id")),
    responses (
        (status = 200, description = "App owned by the caller", body = AppInfo),
        (status = 401, description = "Missing, invalid or expired token", body = String),
        (status = 404, description = "Unknown app or owned by someone else", body = String)
    ),
    tag = "apps",
)]
#[instrument(skip(state, headers))]
pub async fn get_my_app(
    Extension(state): Extension<Arc<Exter>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<AppInfo>, ApiError> {
    let (claims, _) = login_user(&state, &headers).await?;
    let app = load(&state, id.trim()).await?;
    // other owners' apps are reported as missing
    if app.owner_id() != claims.uid {
        return Err(not_found(&id));
    }
    Ok(Json(app_info(&state, &app)))
}

#[utoipa::path(
    post,
    path= "/myApp",
    request_body = RegisterApp,
    responses (
        (status = 201, description = "App registered", body = AppInfo),
        (status = 400, description = "Invalid app settings", body = String),
        (status = 401, description = "Missing, invalid or expired token", body = String),
        (status = 409, description = "App id already taken", body = String)
    ),
    tag = "apps",
)]
#[instrument(skip(state, headers, payload), fields(app = %payload.id))]
pub async fn register_app(
    Extension(state): Extension<Arc<Exter>>,
    headers: HeaderMap,
    Json(payload): Json<RegisterApp>,
) -> Result<(StatusCode, Json<AppInfo>), ApiError> {
    let (claims, _) = login_user(&state, &headers).await?;
    let id = payload.id.trim();
    if !valid_app_id(id) {
        return Err(bad_request("Invalid app id"));
    }
    let id = id.to_lowercase();

    let mut app = apply(App::new(&id, &claims.uid), payload.settings)?;
    match state.apps.create(&mut app).await {
        Ok(()) => {
            info!("app {} registered by {}", id, claims.uid);
            Ok((StatusCode::CREATED, Json(app_info(&state, &app))))
        }
        Err(StoreError::Conflict(_)) => {
            Err((StatusCode::CONFLICT, format!("App {id} already exists")))
        }
        Err(e) => Err(storage_error(&id, &e)),
    }
}

#[utoipa::path(
    put,
    path= "/myApp/{id}",
    params(("id" = String, Path, description = "App id")),
    request_body = AppSettings,
    responses (
        (status = 200, description = "App updated", body = AppInfo),
        (status = 400, description = "Invalid app settings", body = String),
        (status = 401, description = "Missing, invalid or expired token", body = String),
        (status = 403, description = "App owned by someone else", body = String),
        (status = 404, description = "Unknown app", body = String)
    ),
    tag = "apps",
)]
#[instrument(skip(state, headers, settings))]
pub async fn update_my_app(
    Extension(state): Extension<Arc<Exter>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(settings): Json<AppSettings>,
) -> Result<Json<AppInfo>, ApiError> {
    let (claims, _) = login_user(&state, &headers).await?;
    let id = id.trim().to_lowercase();
    let app = load_owned(&state, &id, &claims.uid).await?;

    let mut app = apply(app, settings)?;
    state
        .apps
        .save(&mut app)
        .await
        .map_err(|e| storage_error(&id, &e))?;
    Ok(Json(app_info(&state, &app)))
}

#[utoipa::path(
    delete,
    path= "/myApp/{id}",
    params(("id" = String, Path, description = "App id")),
    responses (
        (status = 204, description = "App deleted"),
        (status = 401, description = "Missing, invalid or expired token", body = String),
        (status = 403, description = "System app or owned by someone else", body = String),
        (status = 404, description = "Unknown app", body = String)
    ),
    tag = "apps",
)]
#[instrument(skip(state, headers))]
pub async fn delete_my_app(
    Extension(state): Extension<Arc<Exter>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let (claims, _) = login_user(&state, &headers).await?;
    let id = id.trim().to_lowercase();
    if id == SYSTEM_APP_ID {
        return Err((
            StatusCode::FORBIDDEN,
            format!("App {id} can not be deleted"),
        ));
    }
    let app = load_owned(&state, &id, &claims.uid).await?;

    let removed = state
        .apps
        .delete(&app)
        .await
        .map_err(|e| storage_error(&id, &e))?;
    if !removed {
        debug!("app {} was already gone", id);
    }
    info!("app {} deleted by {}", id, claims.uid);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::exter::handlers::test_support::{call, test_app, TestApp};
    use crate::testing::TEST_PRIVATE_KEY_PEM;
    use axum::{body::Body, http::Request};
    use serde_json::{json, Value};

    async fn login_token(app: &TestApp, email: &str) -> String {
        let sessions = &app.state.sessions;
        sessions.users().resolve_or_create(email, "Owner").await.unwrap();
        let pre = sessions.begin_pre_login("exter", "github", b"{}").await.unwrap();
        sessions
            .promote_to_login(&pre.claims.jti, email, "Owner", b"{}")
            .await
            .unwrap()
            .token
    }

    fn request(method: &str, uri: &str, token: Option<&str>, body: Option<&Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        match body {
            Some(body) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    #[test]
    fn id_and_url_rules() {
        assert!(valid_app_id("My_App1"));
        assert!(!valid_app_id("my-app"));
        assert!(!valid_app_id(""));
        assert!(valid_return_url(""));
        assert!(valid_return_url("HTTPS://a.example.com/"));
        assert!(!valid_return_url("/relative"));
        assert!(!valid_return_url("ftp://a.example.com/"));
    }

    #[tokio::test]
    async fn public_app_lists_usable_sources() {
        let app = test_app().await;
        let mut both = App::new("both", "owner@example.com")
            .with_identity_sources(["github", "google"])
            .with_description("Two sources");
        app.state.apps.save(&mut both).await.unwrap();

        let (status, body) = call(&app.router, request("GET", "/app/both", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], "both");
        assert_eq!(body["config"]["description"], "Two sources");
        assert_eq!(body["config"]["id_sources"], json!({"github": true, "google": true}));
        // google is configured but has no provider
        assert_eq!(body["config"]["sources"], json!({"github": true}));

        let (status, body) = call(&app.router, request("GET", "/app/disabled", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["config"]["is_active"], false);

        let (status, _) = call(&app.router, request("GET", "/app/missing", None, None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn owner_manages_own_apps() {
        let app = test_app().await;
        let token = login_token(&app, "octo@example.com").await;
        let token = Some(token.as_str());

        let settings = json!({
            "id": "My_App",
            "is_active": true,
            "default_return_url": "https://my.example.com/",
            "tags": [" web ", ""],
            "id_sources": {"github": true, "facebook": false}
        });
        let (status, body) =
            call(&app.router, request("POST", "/myApp", token, Some(&settings))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["id"], "my_app");
        assert_eq!(body["config"]["tags"], json!(["web"]));
        assert_eq!(body["config"]["sources"], json!({"github": true}));

        let (status, _) =
            call(&app.router, request("POST", "/myApp", token, Some(&settings))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(&app.router, request("GET", "/myApp", token, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["id"], "my_app");

        // updates replace every setting
        let (status, body) = call(
            &app.router,
            request("PUT", "/myApp/MY_APP", token, Some(&json!({"description": "renamed"}))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["config"]["description"], "renamed");
        assert_eq!(body["config"]["is_active"], false);
        assert_eq!(body["config"]["default_return_url"], "");

        let (status, body) = call(&app.router, request("GET", "/myApp/my_app", token, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["config"]["description"], "renamed");

        let (status, _) = call(&app.router, request("DELETE", "/myApp/my_app", token, None)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&app.router, request("GET", "/myApp/my_app", token, None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(app.state.apps.get("my_app").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn apps_of_other_owners_are_off_limits() {
        let app = test_app().await;
        let token = login_token(&app, "octo@example.com").await;
        let token = Some(token.as_str());

        let (status, _) = call(&app.router, request("GET", "/myApp/app1", token, None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(
            &app.router,
            request("PUT", "/myApp/app1", token, Some(&json!({"is_active": true}))),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = call(&app.router, request("DELETE", "/myApp/app1", token, None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = call(&app.router, request("DELETE", "/myApp/exter", token, None)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = call(&app.router, request("PUT", "/myApp/nope", token, Some(&json!({})))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(&app.router, request("GET", "/myApp", token, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
        assert!(app.state.apps.get("app1").await.unwrap().unwrap().is_active());
    }

    #[tokio::test]
    async fn owner_endpoints_require_login_token() {
        let app = test_app().await;
        let (status, _) = call(&app.router, request("GET", "/myApp", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let pre = app
            .state
            .sessions
            .begin_pre_login("app1", "github", b"{}")
            .await
            .unwrap();
        let (status, _) = call(
            &app.router,
            request("POST", "/myApp", Some(&pre.token), Some(&json!({"id": "x"}))),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(app.state.apps.get("x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_settings_are_rejected() {
        let app = test_app().await;
        let token = login_token(&app, "octo@example.com").await;

        let codec = TokenCodec::from_pem(TEST_PRIVATE_KEY_PEM.as_bytes(), None).unwrap();
        let pem = codec.public_key_pem().unwrap();
        let (status, body) = call(
            &app.router,
            request("POST", "/myApp", Some(&token), Some(&json!({"id": "keyed", "rsa_public_key": pem}))),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["config"]["rsa_public_key"], pem);

        for settings in [
            json!({"id": "bad id"}),
            json!({"id": "x", "default_return_url": "ftp://a.example.com/"}),
            json!({"id": "x", "default_return_url": "/relative"}),
            json!({"id": "x", "rsa_public_key": "not a key"}),
        ] {
            let (status, _) =
                call(&app.router, request("POST", "/myApp", Some(&token), Some(&settings))).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{settings}");
        }
        assert!(app.state.apps.get("x").await.unwrap().is_none());
    }
}
