#![allow(clippy::needless_for_each)]

#[allow(unused_imports)]
use crate::exter::handlers::{
    apps, apps::__path_delete_my_app, apps::__path_get_app, apps::__path_get_my_app,
    apps::__path_my_apps, apps::__path_register_app, apps::__path_update_my_app, health,
    health::__path_health, info, info::__path_info, login, login::__path_login, logout,
    logout::__path_logout, session, session::__path_session, verify, verify::__path_verify,
};
use crate::{
    apps::AppRegistry,
    federation::{ProviderRegistry, Reconciler},
    session::SessionManager,
};
use anyhow::Result;
use axum::{
    body::Body,
    http::{header::AUTHORIZATION, header::CONTENT_TYPE, HeaderName, HeaderValue, Method, Request},
    routing::{get, post},
    Extension, Json, Router,
};
use std::{future::Future, sync::Arc};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{debug_span, info, Span};
use ulid::Ulid;
use utoipa::OpenApi;

pub mod handlers;

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        info,
        login,
        verify,
        session,
        logout,
        get_app,
        my_apps,
        get_my_app,
        register_app,
        update_my_app,
        delete_my_app
    ),
    components(
        schemas(
            health::Health,
            info::Info,
            login::LoginRequest,
            login::LoginResponse,
            verify::VerifyRequest,
            verify::Pending,
            session::SessionInfo,
            apps::AppSettings,
            apps::RegisterApp,
            apps::AppConfig,
            apps::AppInfo,
        )
    ),
    tags(
        (name = "exter", description = "Federated login and session tokens"),
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

/// Everything the handlers share.
pub struct Exter {
    pub sessions: Arc<SessionManager>,
    pub apps: AppRegistry,
    pub providers: Arc<ProviderRegistry>,
    pub reconciler: Reconciler,
    /// Channels enabled for this deployment, in configuration order.
    pub login_channels: Vec<String>,
    pub store_backend: &'static str,
}

impl Exter {
    /// A channel is usable when it is configured and has a provider.
    #[must_use]
    pub fn is_channel_enabled(&self, channel: &str) -> bool {
        self.login_channels.iter().any(|c| c == channel) && self.providers.get(channel).is_some()
    }
}

/// Build the router around `state`.
pub fn router(state: Arc<Exter>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_origin(Any);

    Router::new()
        .route("/info", get(handlers::info))
        .route("/login", post(handlers::login))
        .route("/verifyLoginToken", post(handlers::verify))
        .route("/session", get(handlers::session))
        .route("/logout", post(handlers::logout))
        .route("/app/:id", get(handlers::get_app))
        .route(
            "/myApp",
            get(handlers::my_apps).post(handlers::register_app),
        )
        .route(
            "/myApp/:id",
            get(handlers::get_my_app)
                .put(handlers::update_my_app)
                .delete(handlers::delete_my_app),
        )
        .route("/openapi.json", get(|| async { Json(openapi()) }))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(state.clone())),
        )
        .route("/health", get(handlers::health).options(handlers::health))
        .layer(Extension(state))
}

/// Serve until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the port cannot be bound or the server fails.
pub async fn serve<F>(port: u16, state: Arc<Exter>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

// span
fn make_span(request: &Request<Body>) -> Span {
    let headers = request.headers();
    let path = request.uri().path();
    let request_id = headers
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", path, request_id)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::exter::handlers::test_support::{call, test_app};
    use tower::ServiceExt;

    #[test]
    fn openapi_lists_every_route() {
        let doc = openapi();
        for path in [
            "/health",
            "/info",
            "/login",
            "/verifyLoginToken",
            "/session",
            "/logout",
            "/app/{id}",
            "/myApp",
            "/myApp/{id}",
        ] {
            assert!(doc.paths.paths.contains_key(path), "{path}");
        }
    }

    #[tokio::test]
    async fn openapi_is_served() {
        let app = test_app().await;
        let (status, body) = call(
            &app.router,
            Request::builder()
                .uri("/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, axum::http::StatusCode::OK);
        assert!(body["paths"]["/login"].is_object());
    }

    #[tokio::test]
    async fn request_id_is_propagated() {
        let app = test_app().await;
        let response = app
            .router
            .clone()
            .oneshot(Request::builder().uri("/info").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let request_id = response.headers().get("x-request-id").unwrap();
        assert!(Ulid::from_string(request_id.to_str().unwrap()).is_ok());

        let response = app
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/info")
                    .header("x-request-id", "given")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers().get("x-request-id").unwrap(), "given");
    }

    #[tokio::test]
    async fn channel_needs_configuration_and_provider() {
        let app = test_app().await;
        assert!(app.state.is_channel_enabled("github"));
        assert!(!app.state.is_channel_enabled("google"));
        assert!(!app.state.is_channel_enabled("facebook"));
    }
}
