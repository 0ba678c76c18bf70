use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::{
    dtos::admin::ChangeStatusRequest,
    handlers::ClientContext,
    middleware::AuthUser,
    store::IdentityStore,
    AppState,
};

/// Move an account along its lifecycle
#[utoipa::path(
    post,
    path = "/admin/accounts/{account_id}/status",
    request_body = ChangeStatusRequest,
    params(
        ("account_id" = Uuid, Path, description = "Account to update")
    ),
    responses(
        (status = 200, description = "Status changed", body = AccountSummary),
        (status = 403, description = "Transition not allowed or caller is not admin", body = ErrorResponse),
        (status = 404, description = "Account not found", body = ErrorResponse)
    ),
    tag = "Admin",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn change_account_status<S: IdentityStore>(
    State(state): State<AppState<S>>,
    ClientContext(ctx): ClientContext,
    admin: AuthUser,
    Path(account_id): Path<Uuid>,
    Json(req): Json<ChangeStatusRequest>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!(admin = %admin.0.sub, account_id = %account_id, "Admin status change requested");
    let account = state
        .identity
        .change_account_status(&ctx, account_id, req.status)
        .await?;
    Ok((StatusCode::OK, Json(account)))
}
