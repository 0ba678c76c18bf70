pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

use axum::{
    extract::State,
    http::{header, HeaderValue, Method, Request},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    rate_limit::{ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{openapi::security::SecurityScheme, Modify, OpenApi};

use crate::services::IdentityService;
use crate::store::IdentityStore;

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::auth::registration::register,
        handlers::auth::registration::verify_code,
        handlers::auth::session::request_login_code,
        handlers::auth::session::login,
        handlers::auth::session::refresh,
        handlers::auth::session::logout,
        handlers::auth::session::global_logout,
        handlers::auth::provider::provider_login,
        handlers::admin::change_account_status,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::MessageResponse,
            dtos::auth::RegisterRequest,
            dtos::auth::RegisterResponse,
            dtos::auth::VerifyCodeRequest,
            dtos::auth::VerifyResponse,
            dtos::auth::LoginCodeRequest,
            dtos::auth::LoginCodeResponse,
            dtos::auth::LoginRequest,
            dtos::auth::LoginResponse,
            dtos::auth::ProviderLoginRequest,
            dtos::auth::RefreshRequest,
            dtos::auth::LogoutRequest,
            dtos::auth::GlobalLogoutResponse,
            dtos::admin::ChangeStatusRequest,
            services::TokenResponse,
            models::AccountSummary,
            models::AccountStatus,
            models::Role,
            models::Provider,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "Registration, login codes and sessions"),
        (name = "Admin", description = "Administrative account lifecycle"),
        (name = "Observability", description = "Service health"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub struct AppState<S> {
    pub identity: IdentityService<S>,
    pub service_name: String,
    pub service_version: String,
    /// Budget for one identity flow, applied as a deadline per request.
    pub request_timeout: Duration,
    pub allowed_origins: Vec<String>,
    pub login_rate_limiter: IpRateLimiter,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            identity: self.identity.clone(),
            service_name: self.service_name.clone(),
            service_version: self.service_version.clone(),
            request_timeout: self.request_timeout,
            allowed_origins: self.allowed_origins.clone(),
            login_rate_limiter: self.login_rate_limiter.clone(),
        }
    }
}

pub fn build_router<S: IdentityStore>(state: AppState<S>) -> Router {
    // Routes that send codes or check them share the per-IP limiter
    let limited_routes = Router::new()
        .route("/auth/register", post(handlers::auth::register::<S>))
        .route("/auth/verify", post(handlers::auth::verify_code::<S>))
        .route("/auth/login/code", post(handlers::auth::request_login_code::<S>))
        .route("/auth/login", post(handlers::auth::login::<S>))
        .layer(from_fn_with_state(
            state.login_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let bearer_routes = Router::new()
        .route("/auth/logout/all", post(handlers::auth::global_logout::<S>))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware::<S>,
        ));

    // Layers run bottom-up: the admin check sees the claims set by auth
    let admin_routes = Router::new()
        .route(
            "/admin/accounts/:account_id/status",
            post(handlers::admin::change_account_status::<S>),
        )
        .layer(from_fn(middleware::admin_auth_middleware))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware::<S>,
        ));

    let cors = CorsLayer::new()
        .allow_origin(
            state
                .allowed_origins
                .iter()
                .filter_map(|origin| match origin.parse::<HeaderValue>() {
                    Ok(value) => Some(value),
                    Err(e) => {
                        tracing::error!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                        None
                    }
                })
                .collect::<Vec<HeaderValue>>(),
        )
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_check::<S>))
        .route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .route("/auth/refresh", post(handlers::auth::refresh::<S>))
        .route("/auth/logout", post(handlers::auth::logout::<S>))
        .route("/auth/provider/login", post(handlers::auth::provider_login::<S>))
        .merge(limited_routes)
        .merge(bearer_routes)
        .merge(admin_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|value| value.to_str().ok())
                .unwrap_or("-");

            tracing::info_span!(
                "http_request",
                request_id = %request_id,
                method = %request.method(),
                uri = %request.uri(),
            )
        }))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors)
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 503, description = "Store is unreachable")
    ),
    tag = "Observability"
)]
pub async fn health_check<S: IdentityStore>(
    State(state): State<AppState<S>>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.identity.check_store().await.map_err(|e| {
        tracing::error!(error = %e, "Store health check failed");
        AppError::ServiceUnavailable
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.service_name,
        "version": state.service_version,
        "checks": {
            "store": "up"
        }
    })))
}
