pub mod health;
pub use self::health::health;

pub mod info;
pub use self::info::info;

pub mod login;
pub use self::login::login;

pub mod verify;
pub use self::verify::verify;

pub mod session;
pub use self::session::session;

pub mod logout;
pub use self::logout::logout;

pub mod apps;
pub use self::apps::{delete_my_app, get_app, get_my_app, my_apps, register_app, update_my_app};

// common functions for the handlers
use crate::apps::App;
use crate::exter::Exter;
use crate::session::SessionError;
use crate::token::SessionClaims;
use crate::users::User;
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use tracing::{debug, error};

pub(crate) type ApiError = (StatusCode, String);

pub const TOKEN_PLACEHOLDER: &str = "${token}";

/// Replace the `${token}` placeholder a client may put in its return url.
#[must_use]
pub fn substitute_token(return_url: &str, token: &str) -> String {
    return_url.replace(TOKEN_PLACEHOLDER, token)
}

/// Extract the token from an `Authorization: Bearer` header.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Authenticate the caller by the login token in its `Authorization` header.
pub(crate) async fn login_user(
    state: &Exter,
    headers: &HeaderMap,
) -> Result<(SessionClaims, User), ApiError> {
    let token = bearer_token(headers)
        .ok_or_else(|| (StatusCode::UNAUTHORIZED, "Missing token".to_string()))?;
    state
        .sessions
        .check_token(token)
        .await
        .map_err(|e| session_error(&e, StatusCode::UNAUTHORIZED))
}

/// Look up an active app, refusing unknown and disabled ones.
pub(crate) async fn active_app(state: &Exter, app_id: &str) -> Result<App, ApiError> {
    match state.apps.get(app_id).await {
        Ok(Some(app)) if app.is_active() => Ok(app),
        Ok(_) => {
            debug!("unknown or inactive app: {}", app_id);
            Err((StatusCode::FORBIDDEN, "Invalid app".to_string()))
        }
        Err(e) => {
            error!("Error loading app {}: {}", app_id, e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error loading app".to_string(),
            ))
        }
    }
}

/// Map a session error onto a response. `denied` is the status for refused
/// or invalid tokens.
pub(crate) fn session_error(err: &SessionError, denied: StatusCode) -> ApiError {
    match err {
        SessionError::Storage(e) => {
            error!("Session storage error: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error loading session".to_string(),
            )
        }
        SessionError::NoPermission(denial) => (denied, denial.to_string()),
        other => {
            debug!("Invalid token: {}", other);
            (denied, "Invalid token".to_string())
        }
    }
}
