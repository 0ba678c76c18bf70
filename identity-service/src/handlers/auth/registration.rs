use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::auth::{RegisterRequest, RegisterResponse, VerifyCodeRequest, VerifyResponse},
    handlers::ClientContext,
    store::IdentityStore,
    utils::ValidatedJson,
    AppState,
};

/// Register an account bound to a provider identity
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account registered", body = RegisterResponse),
        (status = 400, description = "Malformed external id", body = ErrorResponse),
        (status = 409, description = "Identity already registered", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 503, description = "Deadline exceeded", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn register<S: IdentityStore>(
    State(state): State<AppState<S>>,
    ClientContext(ctx): ClientContext,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let registration = state
        .identity
        .register(&ctx, req.provider, &req.external_id)
        .await?;
    Ok((StatusCode::CREATED, Json(RegisterResponse::from(registration))))
}

/// Verify a pending registration with the code that was sent
#[utoipa::path(
    post,
    path = "/auth/verify",
    request_body = VerifyCodeRequest,
    responses(
        (status = 200, description = "Account activated", body = VerifyResponse),
        (status = 401, description = "Invalid or expired code", body = ErrorResponse),
        (status = 403, description = "Account is not pending", body = ErrorResponse),
        (status = 404, description = "Unknown identity", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Too many requests", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn verify_code<S: IdentityStore>(
    State(state): State<AppState<S>>,
    ClientContext(ctx): ClientContext,
    ValidatedJson(req): ValidatedJson<VerifyCodeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let verification = state
        .identity
        .verify_code(&ctx, req.provider, &req.external_id, &req.code)
        .await?;
    Ok((StatusCode::OK, Json(VerifyResponse::from(verification))))
}
