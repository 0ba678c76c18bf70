use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::auth::{LoginResponse, ProviderLoginRequest},
    handlers::ClientContext,
    store::IdentityStore,
    utils::ValidatedJson,
    AppState,
};

/// Sign in with an ID token issued by an external provider
///
/// The token's signature, issuer, audience and expiry are checked before
/// its subject is used. The first login for a subject registers an active
/// account.
#[utoipa::path(
    post,
    path = "/auth/provider/login",
    request_body = ProviderLoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 400, description = "Provider requires a code", body = ErrorResponse),
        (status = 401, description = "Missing or invalid assertion", body = ErrorResponse),
        (status = 403, description = "Account is not active", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn provider_login<S: IdentityStore>(
    State(state): State<AppState<S>>,
    ClientContext(ctx): ClientContext,
    ValidatedJson(req): ValidatedJson<ProviderLoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = state
        .identity
        .complete_provider_login(&ctx, req.provider, &req.assertion)
        .await?;
    Ok((StatusCode::OK, Json(LoginResponse::from(session))))
}
