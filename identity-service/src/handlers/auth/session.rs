use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::{
        auth::{
            GlobalLogoutResponse, LoginCodeRequest, LoginCodeResponse, LoginRequest,
            LoginResponse, LogoutRequest, RefreshRequest,
        },
        MessageResponse,
    },
    handlers::ClientContext,
    middleware::AuthUser,
    store::IdentityStore,
    utils::ValidatedJson,
    AppState,
};

/// Send a one-time login code to a verified identity
#[utoipa::path(
    post,
    path = "/auth/login/code",
    request_body = LoginCodeRequest,
    responses(
        (status = 202, description = "Login code sent", body = LoginCodeResponse),
        (status = 400, description = "Provider does not use codes", body = ErrorResponse),
        (status = 401, description = "Unknown or unverified identity", body = ErrorResponse),
        (status = 403, description = "Account is not active", body = ErrorResponse),
        (status = 429, description = "Too many requests", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn request_login_code<S: IdentityStore>(
    State(state): State<AppState<S>>,
    ClientContext(ctx): ClientContext,
    ValidatedJson(req): ValidatedJson<LoginCodeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let issued = state
        .identity
        .request_login_code(&ctx, req.provider, &req.external_id)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(LoginCodeResponse {
            expires_in: issued.expires_in,
        }),
    ))
}

/// Exchange a login code for a session
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 401, description = "Invalid credentials or code", body = ErrorResponse),
        (status = 403, description = "Account is not active", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Too many requests", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn login<S: IdentityStore>(
    State(state): State<AppState<S>>,
    ClientContext(ctx): ClientContext,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = state
        .identity
        .complete_login(&ctx, req.provider, &req.external_id, &req.code)
        .await?;
    Ok((StatusCode::OK, Json(LoginResponse::from(session))))
}

/// Mint a new access token from a refresh token
#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Token refreshed successfully", body = TokenResponse),
        (status = 401, description = "Invalid or expired token", body = ErrorResponse),
        (status = 403, description = "Account is not active", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn refresh<S: IdentityStore>(
    State(state): State<AppState<S>>,
    ClientContext(ctx): ClientContext,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let tokens = state.identity.refresh_access(&ctx, &req.refresh_token).await?;
    Ok((StatusCode::OK, Json(tokens)))
}

/// End the session that owns a refresh token
#[utoipa::path(
    post,
    path = "/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 200, description = "Logged out successfully", body = MessageResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn logout<S: IdentityStore>(
    State(state): State<AppState<S>>,
    ClientContext(ctx): ClientContext,
    ValidatedJson(req): ValidatedJson<LogoutRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.identity.logout(&ctx, &req.refresh_token).await?;
    Ok((
        StatusCode::OK,
        Json(MessageResponse::new("Logged out successfully")),
    ))
}

/// Revoke every session of the calling account
#[utoipa::path(
    post,
    path = "/auth/logout/all",
    responses(
        (status = 200, description = "Sessions revoked", body = GlobalLogoutResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn global_logout<S: IdentityStore>(
    State(state): State<AppState<S>>,
    ClientContext(ctx): ClientContext,
    user: AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let account_id = user
        .0
        .account_id()
        .map_err(AppError::Unauthorized)?;
    let revoked = state.identity.global_logout(&ctx, account_id).await?;
    Ok((StatusCode::OK, Json(GlobalLogoutResponse { revoked })))
}
